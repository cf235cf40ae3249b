use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use robotstxt::DefaultMatcher;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
struct RobotsEntry {
    content: String,
    crawl_delay: Option<u64>,
}

/// Lazily-filled robots.txt cache, one entry per host, never invalidated
/// within a process run. A host whose robots.txt cannot be fetched is
/// treated as permissive (cached as None).
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    entries: DashMap<String, Option<Arc<RobotsEntry>>>,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client, user_agent: String) -> Self {
        Self {
            client,
            user_agent,
            entries: DashMap::new(),
        }
    }

    /// Whether the declared user-agent may fetch this URL.
    pub async fn allowed(&self, url: &Url) -> bool {
        match self.entry_for(url).await {
            Some(entry) => DefaultMatcher::default().one_agent_allowed_by_robots(
                &entry.content,
                &self.user_agent,
                url.as_str(),
            ),
            None => true,
        }
    }

    /// Crawl-delay advertised for this host, if any.
    pub async fn crawl_delay(&self, url: &Url) -> Option<Duration> {
        self.entry_for(url)
            .await
            .and_then(|e| e.crawl_delay)
            .map(Duration::from_secs)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    async fn entry_for(&self, url: &Url) -> Option<Arc<RobotsEntry>> {
        let host = url.host_str()?.to_string();
        if let Some(cached) = self.entries.get(&host) {
            return cached.value().clone();
        }

        let robots_url = format!("{}://{}/robots.txt", url.scheme(), host);
        let fetched = match self.client.get(&robots_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(content) => {
                    let crawl_delay = parse_crawl_delay(&content);
                    debug!(host = %host, crawl_delay, "robots.txt cached");
                    Some(Arc::new(RobotsEntry {
                        content,
                        crawl_delay,
                    }))
                }
                Err(_) => None,
            },
            _ => {
                debug!(host = %host, "robots.txt unavailable, treating host as permissive");
                None
            }
        };

        self.entries.insert(host, fetched.clone());
        fetched
    }
}

/// Line-scan for a Crawl-delay directive. Servers rarely scope it per agent,
/// so the first parsable value wins.
fn parse_crawl_delay(content: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let line = line.trim();
        let rest = line
            .strip_prefix("Crawl-delay:")
            .or_else(|| line.strip_prefix("crawl-delay:"))?;
        rest.trim().parse::<u64>().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crawl_delay_is_parsed() {
        let robots = "User-agent: *\nCrawl-delay: 7\nDisallow: /priv\n";
        assert_eq!(parse_crawl_delay(robots), Some(7));
    }

    #[test]
    fn missing_or_garbage_delay_is_none() {
        assert_eq!(parse_crawl_delay("User-agent: *\nDisallow:\n"), None);
        assert_eq!(parse_crawl_delay("Crawl-delay: soon\n"), None);
    }

    #[test]
    fn matcher_honors_disallow_rules() {
        let robots = "User-agent: *\nDisallow: /priv\n";
        let mut matcher = DefaultMatcher::default();
        assert!(!matcher.one_agent_allowed_by_robots(
            robots,
            "webtrawl/0.1",
            "http://x.test/priv/a"
        ));
        let mut matcher = DefaultMatcher::default();
        assert!(matcher.one_agent_allowed_by_robots(
            robots,
            "webtrawl/0.1",
            "http://x.test/public"
        ));
    }
}
