use serde::{Deserialize, Serialize};
use url::Url;

/// URLs longer than this are truncated on extraction and rejected on submit.
pub const MAX_URL_LEN: usize = 2048;

/// At most this many image URLs are kept per page.
pub const MAX_IMAGES_PER_PAGE: usize = 5;

/// At most this many outbound URLs are accepted per coordinator submission.
pub const MAX_NEW_URLS_PER_SUBMIT: usize = 50;

/// A unit of crawl work popped from the pending set. Depth 0 = seed.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub url: Url,
    pub depth: u32,
}

/// Everything the writer needs to persist one crawled page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub title: String,
    pub summary: String,
    /// 64-bit simhash of the summary text, stored as its decimal string.
    pub content_hash: u64,
    pub domain: String,
    pub tags: Vec<String>,
    pub images: Vec<String>,
}

/// Why the policy gate refused a URL. First veto wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    DepthExceeded,
    UnsupportedScheme,
    UrlTooLong,
    Blacklisted,
    RobotsDisallowed,
    TermsOfService,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Drop(DropReason),
}

/// Mutations of the durable store. Only the DB writer executes these;
/// every other component produces them as values.
#[derive(Debug, Clone)]
pub enum WriteRequest {
    RecordVisited(String),
    EnqueuePending { url: String, depth: u32 },
    DequeuePending(String),
    SavePage(Box<PageRecord>),
    RecordLanguage { url: String, language: String },
    RecordBlockedDomain(String),
    Blacklist(String),
    Unblacklist(String),
    ClearUrlsForDomain(String),
}

impl WriteRequest {
    /// Short name used in writer failure logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteRequest::RecordVisited(_) => "record_visited",
            WriteRequest::EnqueuePending { .. } => "enqueue_pending",
            WriteRequest::DequeuePending(_) => "dequeue_pending",
            WriteRequest::SavePage(_) => "save_page",
            WriteRequest::RecordLanguage { .. } => "record_language",
            WriteRequest::RecordBlockedDomain(_) => "record_blocked_domain",
            WriteRequest::Blacklist(_) => "blacklist",
            WriteRequest::Unblacklist(_) => "unblacklist",
            WriteRequest::ClearUrlsForDomain(_) => "clear_urls_for_domain",
        }
    }
}

/// Match a host against a blacklist pattern: exact host, or any subdomain
/// when the pattern is a `*.suffix` glob.
pub fn blacklist_pattern_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => host
            .strip_suffix(suffix)
            .is_some_and(|rest| rest.ends_with('.')),
        None => pattern == host,
    }
}

/// Truncate a URL string to `MAX_URL_LEN`, keeping char boundaries intact.
pub fn truncate_url(url: &str) -> &str {
    if url.len() <= MAX_URL_LEN {
        return url;
    }
    let mut end = MAX_URL_LEN;
    while !url.is_char_boundary(end) {
        end -= 1;
    }
    &url[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_that_host() {
        assert!(blacklist_pattern_matches("bad.test", "bad.test"));
        assert!(!blacklist_pattern_matches("bad.test", "sub.bad.test"));
        assert!(!blacklist_pattern_matches("bad.test", "notbad.test"));
    }

    #[test]
    fn glob_pattern_matches_subdomains() {
        assert!(blacklist_pattern_matches("*.bad.test", "sub.bad.test"));
        assert!(blacklist_pattern_matches("*.bad.test", "a.b.bad.test"));
        assert!(!blacklist_pattern_matches("*.bad.test", "bad.test"));
        assert!(!blacklist_pattern_matches("*.bad.test", "verybad.test"));
    }

    #[test]
    fn truncate_url_respects_char_boundaries() {
        let short = "http://a.test/";
        assert_eq!(truncate_url(short), short);

        let long = format!("http://a.test/{}", "x".repeat(3000));
        assert_eq!(truncate_url(&long).len(), MAX_URL_LEN);

        // Multi-byte char straddling the cut must not split.
        let tricky = format!("{}é", "x".repeat(MAX_URL_LEN - 1));
        let cut = truncate_url(&tricky);
        assert!(cut.len() < MAX_URL_LEN + 1);
        assert!(std::str::from_utf8(cut.as_bytes()).is_ok());
    }
}
