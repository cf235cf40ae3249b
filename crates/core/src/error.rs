use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlError {
    /// Network trouble that is worth retrying: timeout, 5xx, 429, reset.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// The server answered and the answer is final (4xx, DNS NXDOMAIN).
    #[error("permanent fetch failure: {0}")]
    Permanent(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// Whether another fetch attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CrawlError::Transient(_))
    }
}
