mod throttle;

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

use webtrawl_core::CrawlError;

pub use throttle::DomainThrottle;

/// Status codes worth another attempt, mirroring the retry adapter the
/// drivers were tuned against.
const RETRY_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_body_bytes: usize,
    /// Extra attempts after the first, GET only.
    pub retries: u32,
    pub backoff_base: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "webtrawl/0.1".to_string(),
            timeout: Duration::from_secs(10),
            max_body_bytes: 10 * 1024 * 1024,
            retries: 2,
            backoff_base: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: Url,
    pub final_url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    /// True when the body was cut at `max_body_bytes`.
    pub truncated: bool,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

impl FetchResponse {
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Redirect target, if the server sent one we did not follow.
    pub fn location(&self) -> Option<&str> {
        self.headers.get("location").map(String::as_str)
    }

    pub fn is_html(&self) -> bool {
        // Missing content-type is treated as HTML so extraction still runs.
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(true)
    }
}

/// One shared keep-alive client for all workers, plus a verification-free
/// twin used for a single retry after a TLS failure.
pub struct Fetcher {
    client: reqwest::Client,
    insecure_client: reqwest::Client,
    throttle: DomainThrottle,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig, domain_delay: Duration) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| CrawlError::Config(format!("http client: {e}")))?;

        let insecure_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .cookie_store(true)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| CrawlError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            insecure_client,
            throttle: DomainThrottle::new(domain_delay),
            config,
        })
    }

    pub fn throttle(&self) -> &DomainThrottle {
        &self.throttle
    }

    /// GET a URL with per-domain spacing, retry with backoff on transient
    /// failures, and a one-shot unverified-TLS fallback.
    pub async fn fetch(
        &self,
        url: &Url,
        delay_override: Option<Duration>,
    ) -> Result<FetchResponse, CrawlError> {
        let host = url.host_str().unwrap_or_default();
        self.throttle.acquire(host, delay_override).await;

        let mut attempt: u32 = 0;
        loop {
            let result = self.fetch_once(&self.client, url).await;

            let error = match result {
                Ok(resp) if RETRY_STATUS.contains(&resp.status) => {
                    CrawlError::Transient(format!("status {}", resp.status))
                }
                Ok(resp) if resp.status >= 400 => {
                    return Err(CrawlError::Permanent(format!("status {}", resp.status)));
                }
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };

            if is_tls_failure(&error) {
                warn!(url = %url, "TLS verification failed, retrying without verification");
                return self.fetch_once(&self.insecure_client, url).await;
            }

            if !error.is_retryable() || attempt >= self.config.retries {
                return Err(error);
            }

            let backoff = self.config.backoff_base * 2u32.pow(attempt);
            debug!(url = %url, attempt, backoff_ms = backoff.as_millis() as u64, "retrying fetch");
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn fetch_once(
        &self,
        client: &reqwest::Client,
        url: &Url,
    ) -> Result<FetchResponse, CrawlError> {
        let resp = client
            .get(url.as_str())
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = resp.status().as_u16();
        let final_url = Url::parse(resp.url().as_str()).unwrap_or_else(|_| url.clone());

        let mut headers = HashMap::new();
        for (k, v) in resp.headers() {
            if let Ok(val) = v.to_str() {
                headers.insert(k.as_str().to_ascii_lowercase(), val.to_string());
            }
        }
        let content_type = headers.get("content-type").cloned();

        let body = resp.bytes().await.map_err(classify_reqwest_error)?;
        let mut body = body.to_vec();
        let truncated = body.len() > self.config.max_body_bytes;
        if truncated {
            debug!(url = %url, size = body.len(), cap = self.config.max_body_bytes, "truncating oversized body");
            body.truncate(self.config.max_body_bytes);
        }

        Ok(FetchResponse {
            url: url.clone(),
            final_url,
            status,
            headers,
            body,
            content_type,
            truncated,
            fetched_at: chrono::Utc::now(),
        })
    }
}

/// Sort transport failures into the retryable/permanent buckets. Message
/// inspection over the error's source chain is the only signal reqwest
/// exposes for DNS and TLS causes.
fn classify_reqwest_error(e: reqwest::Error) -> CrawlError {
    let mut msg = e.to_string();
    let mut source = std::error::Error::source(&e);
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    let lower = msg.to_lowercase();

    if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        return CrawlError::Permanent(format!("tls: {msg}"));
    }
    if lower.contains("dns") || lower.contains("name or service not known") {
        return CrawlError::Permanent(format!("dns: {msg}"));
    }
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        return CrawlError::Transient(msg);
    }
    CrawlError::Transient(msg)
}

fn is_tls_failure(e: &CrawlError) -> bool {
    matches!(e, CrawlError::Permanent(msg) if msg.starts_with("tls:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_statuses_match_policy() {
        for status in [429, 500, 502, 503, 504] {
            assert!(RETRY_STATUS.contains(&status));
        }
        for status in [200, 301, 403, 404, 410] {
            assert!(!RETRY_STATUS.contains(&status));
        }
    }

    #[test]
    fn missing_content_type_counts_as_html() {
        let resp = FetchResponse {
            url: Url::parse("http://a.test/").unwrap(),
            final_url: Url::parse("http://a.test/").unwrap(),
            status: 200,
            headers: HashMap::new(),
            body: b"<html></html>".to_vec(),
            content_type: None,
            truncated: false,
            fetched_at: chrono::Utc::now(),
        };
        assert!(resp.is_html());
    }

    #[test]
    fn location_header_is_exposed() {
        let mut headers = HashMap::new();
        headers.insert("location".to_string(), "http://b.test/next".to_string());
        let resp = FetchResponse {
            url: Url::parse("http://a.test/").unwrap(),
            final_url: Url::parse("http://a.test/").unwrap(),
            status: 301,
            headers,
            body: Vec::new(),
            content_type: Some("text/plain".to_string()),
            truncated: false,
            fetched_at: chrono::Utc::now(),
        };
        assert_eq!(resp.location(), Some("http://b.test/next"));
        assert!(!resp.is_html());
    }
}
