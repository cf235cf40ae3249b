use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::mpsc;
use tracing::{info, warn};

use webtrawl_core::WriteRequest;

/// Well-known paths where a site's terms of service tend to live.
pub const TOS_PATHS: &[&str] = &["/terms", "/terms-of-service", "/tos", "/legal/terms"];

/// Heuristic check for sites whose terms forbid automated access. Each host
/// is probed at most once per process; positive results are persisted via
/// the writer so the probe is not repeated across runs.
pub struct TosChecker {
    client: reqwest::Client,
    checked: DashSet<String>,
    blocked: DashSet<String>,
    keywords: Vec<String>,
    timeout: Duration,
    writer: mpsc::Sender<WriteRequest>,
}

impl TosChecker {
    pub fn new(
        client: reqwest::Client,
        keywords: Vec<String>,
        timeout: Duration,
        writer: mpsc::Sender<WriteRequest>,
    ) -> Self {
        Self {
            client,
            checked: DashSet::new(),
            blocked: DashSet::new(),
            keywords,
            timeout,
            writer,
        }
    }

    /// Seed the in-memory block set from the persisted table at startup.
    pub fn preload_blocked<I: IntoIterator<Item = String>>(&self, domains: I) {
        for domain in domains {
            self.checked.insert(domain.clone());
            self.blocked.insert(domain);
        }
    }

    pub fn clear(&self) {
        self.checked.clear();
        self.blocked.clear();
    }

    /// True when this host's terms forbid crawling. The first caller for a
    /// host performs the probe; concurrent callers see it as already checked
    /// and pass, which at worst lets one extra page through.
    pub async fn is_blocked(&self, host: &str) -> bool {
        if self.blocked.contains(host) {
            return true;
        }
        if !self.checked.insert(host.to_string()) {
            return false;
        }

        for path in TOS_PATHS {
            let probe = format!("https://{}{}", host, path);
            let resp = match self
                .client
                .get(&probe)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(r) => r,
                Err(_) => continue,
            };
            if resp.status().as_u16() != 200 {
                continue;
            }
            let text = match resp.text().await {
                Ok(t) => t.to_lowercase(),
                Err(_) => continue,
            };
            if let Some(keyword) = self.keywords.iter().find(|k| text.contains(k.as_str())) {
                info!(host = %host, keyword = %keyword, path = %path, "terms of service forbids automated access, blocking domain");
                self.blocked.insert(host.to_string());
                if self
                    .writer
                    .send(WriteRequest::RecordBlockedDomain(host.to_string()))
                    .await
                    .is_err()
                {
                    warn!(host = %host, "writer closed, blocked domain not persisted");
                }
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preloaded_domains_are_blocked_without_probing() {
        let (tx, _rx) = mpsc::channel(4);
        let checker = TosChecker::new(
            reqwest::Client::new(),
            vec!["crawl".to_string()],
            Duration::from_secs(5),
            tx,
        );
        checker.preload_blocked(["blocked.test".to_string()]);
        assert!(checker.is_blocked("blocked.test").await);
    }

    #[test]
    fn probe_paths_match_the_well_known_set() {
        assert_eq!(
            TOS_PATHS,
            &["/terms", "/terms-of-service", "/tos", "/legal/terms"]
        );
    }
}
