use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use webtrawl_core::config::AppConfig;
use webtrawl_core::{truncate_url, CrawlError, MAX_NEW_URLS_PER_SUBMIT};
use webtrawl_fetcher::{FetchConfig, FetchResponse, Fetcher};
use webtrawl_parser::{
    compose_worker_tags, extract_xml_links, is_xml_content, parse_html, simhash,
};
use webtrawl_policy::RobotsCache;

/// Remote blacklist verdicts are cached this long before re-asking.
const BLACKLIST_CACHE_TTL: Duration = Duration::from_secs(300);
const API_ATTEMPTS: u32 = 3;

pub struct WorkerOptions {
    /// Coordinator base, e.g. `http://coordinator:5001/api/crawler`.
    pub api_base: String,
    pub token: Option<String>,
    pub threads: usize,
    pub enforce_robots: bool,
}

/// Run a remote crawl worker: pull domain-coherent batches from the
/// coordinator, crawl them politely, submit the results. Thread count is
/// capped at the node's logical CPU count.
pub async fn run_worker(config: &AppConfig, opts: WorkerOptions) -> Result<()> {
    let threads = opts.threads.clamp(1, num_cpus::get());
    info!(threads, api = %opts.api_base, enforce_robots = opts.enforce_robots, "starting crawl workers");

    let ctx = Arc::new(WorkerContext::new(config, &opts)?);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut handles = Vec::new();
    for worker_id in 0..threads {
        let ctx = Arc::clone(&ctx);
        let mut shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!(worker_id, "worker shutting down");
                        break;
                    }
                    _ = ctx.work_cycle(worker_id) => {}
                }
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SubmitBody {
    url: String,
    title: String,
    summary: String,
    tags: Vec<String>,
    content_hash: String,
    domain: String,
    new_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UrlBatch {
    #[serde(default)]
    urls: Vec<String>,
}

struct WorkerContext {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
    fetcher: Fetcher,
    robots: RobotsCache,
    enforce_robots: bool,
    min_tags: usize,
    max_tags: usize,
    blacklist_cache: DashMap<String, (bool, Instant)>,
}

impl WorkerContext {
    fn new(config: &AppConfig, opts: &WorkerOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(&config.general.user_agent)
            .timeout(Duration::from_secs(10))
            .build()
            .context("api client")?;

        let fetch_config = FetchConfig {
            user_agent: config.general.user_agent.clone(),
            timeout: Duration::from_secs(config.crawl.request_timeout_seconds),
            max_body_bytes: config.general.max_body_size_mb * 1024 * 1024,
            retries: config.crawl.fetch_retries,
            backoff_base: Duration::from_secs(1),
        };
        let fetcher = Fetcher::new(
            fetch_config,
            Duration::from_secs(config.crawl.domain_delay_seconds),
        )
        .map_err(|e| anyhow!("fetcher: {e}"))?;

        Ok(Self {
            http: http.clone(),
            api_base: opts.api_base.trim_end_matches('/').to_string(),
            token: opts.token.clone(),
            fetcher,
            robots: RobotsCache::new(http, config.general.user_agent.clone()),
            enforce_robots: opts.enforce_robots,
            min_tags: config.tags.worker_min_tags,
            max_tags: config.tags.max_tags,
            blacklist_cache: DashMap::new(),
        })
    }

    async fn work_cycle(&self, worker_id: usize) {
        let urls = self.fetch_url_batch().await;
        if urls.is_empty() {
            let wait = { rand::thread_rng().gen_range(5.0..10.0) };
            debug!(worker_id, wait_secs = wait, "no urls to crawl, waiting");
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            return;
        }

        for url in urls {
            self.process_url(worker_id, &url).await;
            let pause = { rand::thread_rng().gen_range(0.5..2.0) };
            tokio::time::sleep(Duration::from_secs_f64(pause)).await;
        }
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Pull one batch from the coordinator, with backoff; after the last
    /// empty attempt, ask for a queue reset so completed rows recycle.
    async fn fetch_url_batch(&self) -> Vec<String> {
        let endpoint = format!("{}/urls", self.api_base);
        for attempt in 0..API_ATTEMPTS {
            let result = self
                .authorized(self.http.get(&endpoint))
                .send()
                .await
                .and_then(|r| r.error_for_status());
            match result {
                Ok(resp) => match resp.json::<UrlBatch>().await {
                    Ok(batch) if !batch.urls.is_empty() => return batch.urls,
                    Ok(_) if attempt == API_ATTEMPTS - 1 => {
                        // Nothing pending after retries: completed rows may
                        // be clogging the queue, ask for a reset.
                        self.request_reset().await;
                        return Vec::new();
                    }
                    Ok(_) => debug!(attempt, "no pending urls yet"),
                    Err(e) => warn!(error = %e, "bad /urls response"),
                },
                Err(e) => warn!(attempt, error = %e, "failed to fetch urls"),
            }
            tokio::time::sleep(Duration::from_secs(2u64.pow(attempt + 1))).await;
        }
        Vec::new()
    }

    async fn request_reset(&self) {
        let endpoint = format!("{}/urls", self.api_base);
        let result = self
            .authorized(self.http.post(&endpoint))
            .json(&serde_json::json!({ "reset": true }))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => info!("requested queue reset"),
            Ok(resp) => warn!(status = %resp.status(), "queue reset refused"),
            Err(e) => warn!(error = %e, "queue reset request failed"),
        }
    }

    /// Ask the coordinator whether a host is blacklisted. Verdicts are
    /// cached; any failure to get an answer counts as blacklisted so an
    /// unreachable coordinator never licenses unauthorized crawling.
    async fn is_domain_blacklisted(&self, host: &str) -> bool {
        if let Some(cached) = self.blacklist_cache.get(host) {
            let (verdict, stamp) = *cached;
            if stamp.elapsed() < BLACKLIST_CACHE_TTL {
                return verdict;
            }
        }

        let endpoint = format!("{}/blacklist_domain", self.api_base);
        let verdict = match self
            .authorized(self.http.get(&endpoint).query(&[("domain", host)]))
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(resp) => resp
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("blacklisted").and_then(|b| b.as_bool()))
                .unwrap_or(true),
            Err(e) => {
                warn!(host, error = %e, "blacklist check failed, failing closed");
                true
            }
        };
        self.blacklist_cache
            .insert(host.to_string(), (verdict, Instant::now()));
        verdict
    }

    async fn process_url(&self, worker_id: usize, url_str: &str) {
        let Ok(url) = Url::parse(url_str) else {
            warn!(worker_id, url = url_str, "unparsable url from queue");
            return;
        };
        let Some(host) = url.host_str().map(str::to_string) else {
            return;
        };

        if self.is_domain_blacklisted(&host).await {
            info!(worker_id, url = %url, "skipping blacklisted domain");
            return;
        }
        if self.enforce_robots && !self.robots.allowed(&url).await {
            info!(worker_id, url = %url, "disallowed by robots.txt");
            return;
        }

        let delay = if self.enforce_robots {
            self.robots.crawl_delay(&url).await
        } else {
            None
        };

        info!(worker_id, url = %url, "fetching");
        let submission = match self.fetcher.fetch(&url, delay).await {
            Ok(resp) => self.build_submission(&url, &host, &resp).await,
            Err(e @ CrawlError::Transient(_)) | Err(e @ CrawlError::Permanent(_)) => {
                warn!(worker_id, url = %url, error = %e, "fetch failed, submitting fallback record");
                self.build_fallback(&url, &host)
            }
            Err(e) => {
                warn!(worker_id, url = %url, error = %e, "fetch failed");
                return;
            }
        };

        match self.submit(&submission).await {
            Ok(true) => debug!(worker_id, url = %url, "submitted"),
            Ok(false) => info!(worker_id, url = %url, "submission rejected by coordinator"),
            Err(e) => warn!(worker_id, url = %url, error = %e, "submission failed"),
        }
    }

    async fn build_submission(
        &self,
        url: &Url,
        host: &str,
        resp: &FetchResponse,
    ) -> SubmitBody {
        let body = resp.body_text().into_owned();
        let mut new_urls: Vec<String> = Vec::new();

        // Redirect targets count as discovered links even for non-HTML.
        if let Some(location) = resp.location() {
            if let Ok(resolved) = url.join(location) {
                if resolved.scheme() == "http" || resolved.scheme() == "https" {
                    new_urls.push(truncate_url(resolved.as_str()).to_string());
                }
            }
        }

        let (title, summary, tags, fingerprint) = if is_xml_content(&body) {
            new_urls.extend(extract_xml_links(&body, url));
            let summary = summary_from_url(url);
            let tags = compose_worker_tags(url, None, None, self.min_tags, self.max_tags);
            (title_from_url(url), summary.clone(), tags, simhash(&summary))
        } else if resp.is_html() {
            let extract = parse_html(&body, url);
            new_urls.extend(extract.links.iter().cloned());
            let title = extract
                .title
                .clone()
                .unwrap_or_else(|| host.to_string());
            let tags = compose_worker_tags(
                url,
                Some(&extract.text),
                extract.title.as_deref(),
                self.min_tags,
                self.max_tags,
            );
            let fingerprint = simhash(&extract.summary);
            (title, extract.summary, tags, fingerprint)
        } else {
            let summary = summary_from_url(url);
            let tags = compose_worker_tags(url, None, None, self.min_tags, self.max_tags);
            (title_from_url(url), summary.clone(), tags, simhash(&summary))
        };

        let mut filtered: Vec<String> = Vec::new();
        for link in new_urls {
            if filtered.len() >= MAX_NEW_URLS_PER_SUBMIT {
                break;
            }
            let Some(link_host) = Url::parse(&link).ok().and_then(|u| u.host_str().map(str::to_string))
            else {
                continue;
            };
            if self.is_domain_blacklisted(&link_host).await {
                continue;
            }
            filtered.push(truncate_url(&link).to_string());
        }

        SubmitBody {
            url: truncate_url(url.as_str()).to_string(),
            title,
            summary,
            tags,
            content_hash: fingerprint.to_string(),
            domain: host.to_string(),
            new_urls: filtered,
        }
    }

    /// Best-effort record built from the URL alone, so a dead page still
    /// completes its queue row. The coordinator rejects it if the tags end
    /// up purely generic.
    fn build_fallback(&self, url: &Url, host: &str) -> SubmitBody {
        let summary = summary_from_url(url);
        SubmitBody {
            url: truncate_url(url.as_str()).to_string(),
            title: title_from_url(url),
            summary: summary.clone(),
            tags: compose_worker_tags(url, None, None, self.min_tags, self.max_tags),
            content_hash: simhash(&summary).to_string(),
            domain: host.to_string(),
            new_urls: Vec::new(),
        }
    }

    /// POST the submission. A 400 is a final verdict; transport errors are
    /// retried with backoff.
    async fn submit(&self, body: &SubmitBody) -> Result<bool> {
        let endpoint = format!("{}/submit", self.api_base);
        for attempt in 0..API_ATTEMPTS {
            match self.http.post(&endpoint).json(body).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(true),
                Ok(resp) if resp.status() == reqwest::StatusCode::BAD_REQUEST => {
                    let detail = resp.text().await.unwrap_or_default();
                    debug!(url = %body.url, detail = %detail, "submission rejected");
                    return Ok(false);
                }
                Ok(resp) => warn!(status = %resp.status(), "unexpected submit status"),
                Err(e) => warn!(attempt, error = %e, "submit transport error"),
            }
            tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
        }
        Err(anyhow!("submission failed after {} attempts", API_ATTEMPTS))
    }
}

/// Human-readable title derived from the URL path, falling back to the host.
fn title_from_url(url: &Url) -> String {
    let path = url.path().trim_matches('/');
    let source = if path.is_empty() {
        url.host_str().unwrap_or_default().replace('.', " ")
    } else {
        path.replace(['/', '-', '_'], " ")
    };
    title_case(&source)
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn summary_from_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    let path = url.path().replace(['/', '-', '_'], " ");
    let query = url.query().unwrap_or_default().replace(['&', '='], " ");
    let combined = format!("Web content from {} {} {}", host, path.trim(), query.trim());
    let collapsed = combined.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_comes_from_the_path() {
        let url = Url::parse("http://a.test/rust-web-crawlers/intro").unwrap();
        assert_eq!(title_from_url(&url), "Rust Web Crawlers Intro");
    }

    #[test]
    fn title_falls_back_to_host() {
        let url = Url::parse("http://docs.a.test/").unwrap();
        assert_eq!(title_from_url(&url), "Docs A Test");
    }

    #[test]
    fn summary_mentions_host_and_path() {
        let url = Url::parse("http://a.test/some/page?q=term").unwrap();
        let summary = summary_from_url(&url);
        assert!(summary.starts_with("Web content from a.test"));
        assert!(summary.contains("some page"));
        assert!(summary.contains("q term"));
        assert!(summary.chars().count() <= 200);
    }
}
