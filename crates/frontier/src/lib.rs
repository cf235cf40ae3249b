use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashSet;
use tracing::debug;

/// How one dispatched URL ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// Fetched, extracted and handed to the writer.
    Crawled,
    /// Fetch failed after retries; the URL stays out of the durable visited
    /// set so a later run may rediscover it.
    Failed,
    /// Vetoed by policy before any request went out.
    Dropped,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FrontierStats {
    pub crawled: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// In-process admission state for the crawl session: the visited mirror that
/// short-circuits duplicate dispatches, plus outcome counters. The durable
/// pending/visited sets live in the store; this mirror is preloaded from
/// them at startup.
#[derive(Default)]
pub struct Frontier {
    visited: DashSet<String>,
    crawled: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark URLs as already crawled (startup preload from the store).
    pub fn mark_visited_batch<I: IntoIterator<Item = String>>(&self, urls: I) {
        let mut count = 0usize;
        for url in urls {
            self.visited.insert(url);
            count += 1;
        }
        debug!(count, "preloaded visited URLs");
    }

    /// Whether this URL is still worth dispatching.
    pub fn should_fetch(&self, url: &str) -> bool {
        !self.visited.contains(url)
    }

    /// Claim the URL for this session. Returns false when another worker
    /// got there first; the loser must not fetch.
    pub fn note_dispatch(&self, url: &str) -> bool {
        self.visited.insert(url.to_string())
    }

    pub fn note_completion(&self, url: &str, outcome: CrawlOutcome) {
        let counter = match outcome {
            CrawlOutcome::Crawled => &self.crawled,
            CrawlOutcome::Failed => &self.failed,
            CrawlOutcome::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(url, ?outcome, "crawl outcome recorded");
    }

    pub fn stats(&self) -> FrontierStats {
        FrontierStats {
            crawled: self.crawled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_claims_are_exclusive() {
        let frontier = Frontier::new();
        assert!(frontier.should_fetch("http://a.test/"));
        assert!(frontier.note_dispatch("http://a.test/"));
        assert!(!frontier.note_dispatch("http://a.test/"));
        assert!(!frontier.should_fetch("http://a.test/"));
    }

    #[test]
    fn preloaded_urls_are_not_refetched() {
        let frontier = Frontier::new();
        frontier.mark_visited_batch(["http://a.test/".to_string(), "http://b.test/".to_string()]);
        assert!(!frontier.should_fetch("http://a.test/"));
        assert!(!frontier.should_fetch("http://b.test/"));
        assert!(frontier.should_fetch("http://c.test/"));
        assert_eq!(frontier.visited_len(), 2);
    }

    #[test]
    fn outcomes_are_counted() {
        let frontier = Frontier::new();
        frontier.note_completion("http://a.test/", CrawlOutcome::Crawled);
        frontier.note_completion("http://b.test/", CrawlOutcome::Failed);
        frontier.note_completion("http://c.test/", CrawlOutcome::Dropped);
        frontier.note_completion("http://d.test/", CrawlOutcome::Crawled);
        let stats = frontier.stats();
        assert_eq!(stats.crawled, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.dropped, 1);
    }
}
