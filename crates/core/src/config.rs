use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub crawl: CrawlConfig,
    pub database: DatabaseConfig,
    pub policy: PolicyConfig,
    pub tags: TagConfig,
    pub dedupe: DedupeConfig,
    pub coordinator: CoordinatorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// Fixed identifying user-agent presented to robots.txt and every fetch.
    pub user_agent: String,
    pub max_depth: u32,
    pub max_body_size_mb: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    /// Embedded driver worker pool size; also the batch-pop size.
    pub threads: usize,
    /// Minimum spacing between two requests to the same host, unless
    /// robots.txt advertises a longer Crawl-delay.
    pub domain_delay_seconds: u64,
    pub request_timeout_seconds: u64,
    /// Extra attempts after the first, on retryable failures only.
    pub fetch_retries: u32,
    pub seed_file: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub postgres_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    pub respect_robots: bool,
    pub ignore_tos: bool,
    pub tos_timeout_seconds: u64,
    #[serde(default = "default_tos_keywords")]
    pub tos_keywords: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TagConfig {
    /// Embedded extractor floor.
    pub min_tags: usize,
    pub max_tags: usize,
    /// Coordinator submission floor. Intentionally independent of min_tags.
    pub worker_min_tags: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dedupe_interval")]
    pub interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoordinatorConfig {
    pub bind: String,
    pub jwt_secret: String,
}

fn default_true() -> bool {
    true
}

fn default_dedupe_interval() -> u64 {
    600
}

fn default_tos_keywords() -> Vec<String> {
    [
        "automated",
        "robot",
        "scrap",
        "crawl",
        "not allowed",
        "disallow",
        "unauthorized",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let raw = include_str!("../../../config/default.toml");
        let config: AppConfig = toml::from_str(raw).expect("default config must parse");
        assert_eq!(config.general.max_depth, 5);
        assert_eq!(config.crawl.threads, 2);
        assert_eq!(config.tags.min_tags, 40);
        assert_eq!(config.tags.max_tags, 100);
        assert_eq!(config.tags.worker_min_tags, 20);
        assert!(config.policy.respect_robots);
        assert!(config.dedupe.enabled);
        assert!(config
            .policy
            .tos_keywords
            .iter()
            .any(|k| k == "automated"));
    }
}
