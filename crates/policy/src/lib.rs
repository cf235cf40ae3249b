mod blacklist;
mod robots;
mod tos;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;
use url::Url;

use webtrawl_core::config::{GeneralConfig, PolicyConfig};
use webtrawl_core::{Admission, CrawlError, DropReason, WriteRequest, MAX_URL_LEN};

pub use blacklist::Blacklist;
pub use robots::RobotsCache;
pub use tos::{TosChecker, TOS_PATHS};

/// Decides whether a URL may be crawled. Checks run in a fixed order and
/// the first veto wins: depth, scheme, length, blacklist, robots.txt,
/// terms-of-service heuristic.
pub struct PolicyGate {
    pub blacklist: Blacklist,
    robots: RobotsCache,
    tos: TosChecker,
    respect_robots: AtomicBool,
    ignore_tos: AtomicBool,
    max_depth: u32,
}

impl PolicyGate {
    pub fn new(
        general: &GeneralConfig,
        policy: &PolicyConfig,
        writer: mpsc::Sender<WriteRequest>,
    ) -> Result<Self, CrawlError> {
        // Probes share one small client; page fetching has its own pool.
        let client = reqwest::Client::builder()
            .user_agent(&general.user_agent)
            .timeout(Duration::from_secs(policy.tos_timeout_seconds))
            .build()
            .map_err(|e| CrawlError::Config(format!("policy http client: {e}")))?;

        Ok(Self {
            blacklist: Blacklist::new(),
            robots: RobotsCache::new(client.clone(), general.user_agent.clone()),
            tos: TosChecker::new(
                client,
                policy.tos_keywords.clone(),
                Duration::from_secs(policy.tos_timeout_seconds),
                writer,
            ),
            respect_robots: AtomicBool::new(policy.respect_robots),
            ignore_tos: AtomicBool::new(policy.ignore_tos),
            max_depth: general.max_depth,
        })
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn preload_blocked_domains<I: IntoIterator<Item = String>>(&self, domains: I) {
        self.tos.preload_blocked(domains);
    }

    pub async fn evaluate(&self, url: &Url, depth: u32) -> Admission {
        if depth > self.max_depth {
            return Admission::Drop(DropReason::DepthExceeded);
        }
        if url.scheme() != "http" && url.scheme() != "https" {
            return Admission::Drop(DropReason::UnsupportedScheme);
        }
        if url.as_str().len() > MAX_URL_LEN {
            return Admission::Drop(DropReason::UrlTooLong);
        }
        let Some(host) = url.host_str() else {
            return Admission::Drop(DropReason::UnsupportedScheme);
        };
        if self.blacklist.matches(host) {
            return Admission::Drop(DropReason::Blacklisted);
        }
        if self.respect_robots.load(Ordering::Relaxed) && !self.robots.allowed(url).await {
            return Admission::Drop(DropReason::RobotsDisallowed);
        }
        if !self.ignore_tos.load(Ordering::Relaxed) && self.tos.is_blocked(host).await {
            return Admission::Drop(DropReason::TermsOfService);
        }
        Admission::Admit
    }

    /// Crawl-delay the host advertises, when it exceeds nothing the caller
    /// already enforces; passed to the fetcher as a per-host override.
    pub async fn crawl_delay(&self, url: &Url) -> Option<Duration> {
        if !self.respect_robots.load(Ordering::Relaxed) {
            return None;
        }
        self.robots.crawl_delay(url).await
    }

    /// Operator kill-switch: stop consulting robots.txt and the ToS
    /// heuristic, and forget cached verdicts so the change takes effect
    /// immediately.
    pub fn disable_robots_and_tos(&self) {
        self.respect_robots.store(false, Ordering::Relaxed);
        self.ignore_tos.store(true, Ordering::Relaxed);
        self.robots.clear();
        self.tos.clear();
        info!("robots.txt and ToS checks disabled");
    }

    pub fn robots_enforced(&self) -> bool {
        self.respect_robots.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webtrawl_core::config::{GeneralConfig, PolicyConfig};

    fn test_gate() -> PolicyGate {
        let general = GeneralConfig {
            user_agent: "webtrawl-test/0".to_string(),
            max_depth: 5,
            max_body_size_mb: 1,
        };
        // Robots and ToS off so evaluate never touches the network.
        let policy = PolicyConfig {
            respect_robots: false,
            ignore_tos: true,
            tos_timeout_seconds: 1,
            tos_keywords: vec!["crawl".to_string()],
        };
        let (tx, _rx) = mpsc::channel(4);
        PolicyGate::new(&general, &policy, tx).expect("gate")
    }

    #[tokio::test]
    async fn depth_veto_comes_first() {
        let gate = test_gate();
        let url = Url::parse("http://a.test/").unwrap();
        assert_eq!(
            gate.evaluate(&url, 6).await,
            Admission::Drop(DropReason::DepthExceeded)
        );
        assert_eq!(gate.evaluate(&url, 5).await, Admission::Admit);
    }

    #[tokio::test]
    async fn non_http_schemes_are_dropped() {
        let gate = test_gate();
        let url = Url::parse("ftp://a.test/file").unwrap();
        assert_eq!(
            gate.evaluate(&url, 0).await,
            Admission::Drop(DropReason::UnsupportedScheme)
        );
    }

    #[tokio::test]
    async fn oversized_urls_are_dropped() {
        let gate = test_gate();
        let url = Url::parse(&format!("http://a.test/{}", "x".repeat(3000))).unwrap();
        assert_eq!(
            gate.evaluate(&url, 0).await,
            Admission::Drop(DropReason::UrlTooLong)
        );
    }

    #[tokio::test]
    async fn blacklisted_hosts_are_dropped() {
        let gate = test_gate();
        gate.blacklist.add("*.bad.test");
        let url = Url::parse("http://sub.bad.test/foo").unwrap();
        assert_eq!(
            gate.evaluate(&url, 0).await,
            Admission::Drop(DropReason::Blacklisted)
        );
        let ok = Url::parse("http://good.test/").unwrap();
        assert_eq!(gate.evaluate(&ok, 0).await, Admission::Admit);
    }

    #[tokio::test]
    async fn kill_switch_disables_robots() {
        let gate = test_gate();
        assert!(!gate.robots_enforced());
        gate.disable_robots_and_tos();
        assert!(!gate.robots_enforced());
        assert_eq!(
            gate.crawl_delay(&Url::parse("http://a.test/").unwrap()).await,
            None
        );
    }
}
