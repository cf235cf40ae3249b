use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use webtrawl_core::{truncate_url, MAX_NEW_URLS_PER_SUBMIT, MAX_URL_LEN};
use webtrawl_parser::is_generic_tag_set;

use crate::auth::Privileged;
use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/crawler/status", get(status))
        .route("/api/crawler/config", post(update_config))
        .route("/api/crawler/urls", get(fetch_urls).post(manage_urls))
        .route("/api/crawler/submit", post(submit))
        .route("/api/crawler/skip_domain", post(skip_domain))
        .route("/api/crawler/blacklist", get(list_blacklist))
        .route(
            "/api/crawler/blacklist_domain",
            get(check_blacklist).post(add_blacklist),
        )
        .route("/api/crawler/unblacklist_domain", post(remove_blacklist))
        .route(
            "/api/crawler/clear_blacklisted_urls",
            post(clear_blacklisted_urls),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    pending: i64,
    processing: i64,
    completed: i64,
    current_domain: Option<String>,
}

async fn status(
    _auth: Privileged,
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let counts = state.storage.queue_counts().await?;
    let current_domain = state.current_domain.read().await.clone();
    Ok(Json(StatusResponse {
        pending: counts.pending,
        processing: counts.processing,
        completed: counts.completed,
        current_domain,
    }))
}

#[derive(Debug, Deserialize)]
struct ConfigPayload {
    dedupe_enabled: Option<bool>,
    dedupe_interval: Option<u64>,
}

async fn update_config(
    _auth: Privileged,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfigPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(enabled) = payload.dedupe_enabled {
        state.set_dedupe_enabled(enabled);
    }
    if let Some(interval) = payload.dedupe_interval {
        state.set_dedupe_interval_secs(interval);
    }
    info!(
        dedupe_enabled = state.dedupe_enabled(),
        dedupe_interval = state.dedupe_interval_secs(),
        "configuration updated"
    );
    Ok(Json(
        serde_json::json!({ "message": "configuration updated" }),
    ))
}

#[derive(Debug, Serialize)]
struct UrlBatch {
    urls: Vec<String>,
}

async fn fetch_urls(
    _auth: Privileged,
    State(state): State<Arc<AppState>>,
) -> Result<Json<UrlBatch>, ApiError> {
    let urls = state
        .storage
        .claim_host_batch(&state.blacklist.list())
        .await?;

    if let Some(host) = urls
        .first()
        .and_then(|u| Url::parse(u).ok())
        .and_then(|u| u.host_str().map(|h| h.to_string()))
    {
        *state.current_domain.write().await = Some(host);
    }

    Ok(Json(UrlBatch { urls }))
}

#[derive(Debug, Deserialize)]
struct ManagePayload {
    #[serde(default)]
    reset: bool,
}

async fn manage_urls(
    _auth: Privileged,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ManagePayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !payload.reset {
        return Err(ApiError::BadRequest("nothing to do".to_string()));
    }
    let (reverted, purged) = state.storage.reset_queue().await?;
    *state.current_domain.write().await = None;
    info!(reverted, purged, "crawl queue reset");
    Ok(Json(serde_json::json!({ "message": "queue reset" })))
}

#[derive(Debug, Deserialize)]
pub struct SubmitPayload {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub new_urls: Vec<String>,
}

/// Validate a submission. Pure so the rules are testable without a server.
pub fn validate_submission(
    payload: &SubmitPayload,
    min_tags: usize,
) -> Result<String, String> {
    if payload.url.is_empty() || payload.url.len() > MAX_URL_LEN {
        return Err("invalid url".to_string());
    }
    let host = Url::parse(&payload.url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .ok_or_else(|| "invalid url".to_string())?;
    if payload.tags.len() < min_tags {
        return Err(format!(
            "insufficient tags ({} < {})",
            payload.tags.len(),
            min_tags
        ));
    }
    if is_generic_tag_set(&payload.tags) {
        return Err("generic tag set rejected".to_string());
    }
    Ok(host)
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let host = validate_submission(&payload, state.worker_min_tags).map_err(ApiError::BadRequest)?;

    if state.blacklist.matches(&host) {
        info!(url = %payload.url, host = %host, "submission rejected, domain blacklisted");
        return Err(ApiError::BadRequest(format!(
            "domain {} is blacklisted",
            host
        )));
    }

    let domain = if payload.domain.is_empty() {
        host.clone()
    } else {
        payload.domain.clone()
    };

    state
        .storage
        .save_submission(
            &payload.url,
            &payload.title,
            &payload.summary,
            &payload.content_hash,
            &domain,
            &payload.tags,
        )
        .await?;
    state.storage.complete_url(&payload.url).await?;

    let new_urls: Vec<String> = payload
        .new_urls
        .iter()
        .take(MAX_NEW_URLS_PER_SUBMIT)
        .map(|u| truncate_url(u).to_string())
        .filter(|u| {
            Url::parse(u)
                .ok()
                .and_then(|parsed| parsed.host_str().map(|h| !state.blacklist.matches(h)))
                .unwrap_or(false)
        })
        .collect();
    let enqueued = state.storage.enqueue_crawl_urls(&new_urls).await?;

    info!(url = %payload.url, tags = payload.tags.len(), enqueued, "submission accepted");
    Ok(Json(
        serde_json::json!({ "message": "data saved successfully" }),
    ))
}

async fn skip_domain(
    _auth: Privileged,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(host) = state.current_domain.write().await.take() else {
        return Err(ApiError::BadRequest("no current domain".to_string()));
    };
    let skipped = state.storage.skip_host(&host).await?;
    info!(host = %host, skipped, "domain skipped");
    Ok(Json(
        serde_json::json!({ "message": format!("skipped domain {}", host) }),
    ))
}

async fn list_blacklist(
    _auth: Privileged,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(
        serde_json::json!({ "domains": state.blacklist.list() }),
    ))
}

#[derive(Debug, Deserialize)]
struct DomainQuery {
    domain: Option<String>,
}

async fn check_blacklist(
    _auth: Privileged,
    State(state): State<Arc<AppState>>,
    Query(query): Query<DomainQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(domain) = query.domain.filter(|d| !d.is_empty()) else {
        return Err(ApiError::BadRequest("domain is required".to_string()));
    };
    let blacklisted =
        state.blacklist.matches(&domain) || state.blacklist.contains_pattern(&domain);
    Ok(Json(serde_json::json!({ "blacklisted": blacklisted })))
}

#[derive(Debug, Deserialize)]
struct DomainPayload {
    domain: Option<String>,
}

async fn add_blacklist(
    _auth: Privileged,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DomainPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(domain) = payload.domain.filter(|d| !d.is_empty()) else {
        return Err(ApiError::BadRequest("domain is required".to_string()));
    };

    state.blacklist.add(&domain);
    state.storage.add_blacklist_pattern(&domain).await?;
    let stats = state.storage.purge_blacklisted(&domain).await?;
    info!(
        domain = %domain,
        queue_rows = stats.queue_rows,
        pages = stats.pages,
        "domain blacklisted"
    );
    Ok(Json(
        serde_json::json!({ "message": format!("domain {} blacklisted", domain) }),
    ))
}

async fn remove_blacklist(
    _auth: Privileged,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DomainPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(domain) = payload.domain.filter(|d| !d.is_empty()) else {
        return Err(ApiError::BadRequest("domain is required".to_string()));
    };

    let removed = state.blacklist.remove(&domain);
    state.storage.remove_blacklist_pattern(&domain).await?;
    let message = if removed {
        format!("domain {} unblacklisted", domain)
    } else {
        format!("domain {} not in blacklist", domain)
    };
    info!(domain = %domain, removed, "unblacklist requested");
    Ok(Json(serde_json::json!({ "message": message })))
}

async fn clear_blacklisted_urls(
    _auth: Privileged,
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DomainPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(domain) = payload.domain.filter(|d| !d.is_empty()) else {
        return Err(ApiError::BadRequest("domain is required".to_string()));
    };

    let deleted = state.storage.clear_queue_urls_for_pattern(&domain).await?;
    info!(domain = %domain, deleted, "queue rows cleared for domain");
    Ok(Json(serde_json::json!({
        "message": format!("cleared {} urls for domain {}", deleted, domain)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use webtrawl_parser::generic_tags;

    fn payload(url: &str, tags: Vec<String>) -> SubmitPayload {
        SubmitPayload {
            url: url.to_string(),
            title: "Title".to_string(),
            summary: "Summary".to_string(),
            tags,
            content_hash: "12345".to_string(),
            domain: String::new(),
            new_urls: Vec::new(),
        }
    }

    fn real_tags(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("topic{}", i)).collect()
    }

    #[test]
    fn accepts_a_valid_submission() {
        let p = payload("http://a.test/page", real_tags(20));
        assert_eq!(validate_submission(&p, 20).unwrap(), "a.test");
    }

    #[test]
    fn rejects_too_few_tags() {
        let p = payload("http://a.test/page", real_tags(19));
        let err = validate_submission(&p, 20).unwrap_err();
        assert!(err.contains("insufficient tags"));
    }

    #[test]
    fn rejects_the_generic_tag_set() {
        let p = payload("http://a.test/page", generic_tags(20));
        let err = validate_submission(&p, 20).unwrap_err();
        assert!(err.contains("generic"));
    }

    #[test]
    fn rejects_oversized_and_empty_urls() {
        let long = format!("http://a.test/{}", "x".repeat(3000));
        assert!(validate_submission(&payload(&long, real_tags(20)), 20).is_err());
        assert!(validate_submission(&payload("", real_tags(20)), 20).is_err());
        assert!(validate_submission(&payload("not a url", real_tags(20)), 20).is_err());
    }
}
