use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Per-host request spacing. Each `acquire` reserves the next allowed slot
/// for the host and sleeps until it, so concurrent workers hitting the same
/// host are serialized `delay` apart regardless of interleaving.
pub struct DomainThrottle {
    last_access: DashMap<String, Instant>,
    default_delay: Duration,
}

impl DomainThrottle {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            last_access: DashMap::new(),
            default_delay,
        }
    }

    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Wait until the host's next slot. A robots.txt Crawl-delay larger than
    /// the configured default is passed as `override_delay`.
    pub async fn acquire(&self, host: &str, override_delay: Option<Duration>) {
        let delay = override_delay.unwrap_or(self.default_delay);
        if delay.is_zero() {
            return;
        }

        let now = Instant::now();
        let slot = match self.last_access.entry(host.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = (*occupied.get() + delay).max(now);
                *occupied.get_mut() = slot;
                slot
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                now
            }
        };

        let wait = slot.saturating_duration_since(now);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_access_does_not_wait() {
        let throttle = DomainThrottle::new(Duration::from_millis(200));
        let start = Instant::now();
        throttle.acquire("a.test", None).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn consecutive_accesses_are_spaced() {
        let delay = Duration::from_millis(50);
        let throttle = DomainThrottle::new(delay);
        let start = Instant::now();
        throttle.acquire("a.test", None).await;
        throttle.acquire("a.test", None).await;
        throttle.acquire("a.test", None).await;
        assert!(start.elapsed() >= delay * 2);
    }

    #[tokio::test]
    async fn different_hosts_do_not_block_each_other() {
        let throttle = DomainThrottle::new(Duration::from_millis(200));
        let start = Instant::now();
        throttle.acquire("a.test", None).await;
        throttle.acquire("b.test", None).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn override_delay_wins() {
        let throttle = DomainThrottle::new(Duration::from_millis(1));
        let start = Instant::now();
        throttle.acquire("a.test", Some(Duration::from_millis(60))).await;
        throttle.acquire("a.test", Some(Duration::from_millis(60))).await;
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
