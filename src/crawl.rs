use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use webtrawl_core::config::TagConfig;
use webtrawl_core::{Admission, AppConfig, CrawlTask, PageRecord, WriteRequest};
use webtrawl_fetcher::{FetchConfig, Fetcher};
use webtrawl_frontier::{CrawlOutcome, Frontier};
use webtrawl_parser as parser;
use webtrawl_policy::PolicyGate;
use webtrawl_storage::{DbWriter, Storage};

use crate::seeds::collect_seeds;

/// How long the writer gets to drain after the crawl loop stops.
const WRITER_DRAIN_WINDOW: Duration = Duration::from_secs(30);

pub async fn run_crawl(
    mut config: AppConfig,
    seeds_arg: Option<String>,
    seed: Option<String>,
    depth: Option<u32>,
    threads: Option<usize>,
    no_robots: bool,
) -> Result<()> {
    if let Some(d) = depth {
        config.general.max_depth = d;
    }
    let threads = threads.unwrap_or(config.crawl.threads).max(1);

    // Pool sized for the workers plus writer headroom.
    let pool_size = (threads as u32 + 5).max(10);
    let storage = Storage::with_pool_size(&config.database.postgres_url, pool_size)
        .await
        .context("fatal: cannot connect to database")?;
    storage
        .run_migrations()
        .await
        .context("fatal: schema migration failed")?;

    let (write_tx, write_rx) = mpsc::channel::<WriteRequest>(1024);
    let writer_handle = DbWriter::spawn(storage.pool().clone(), write_rx);

    let gate = Arc::new(PolicyGate::new(
        &config.general,
        &config.policy,
        write_tx.clone(),
    )?);
    gate.preload_blocked_domains(storage.load_blocked_domains().await.unwrap_or_default());
    for pattern in storage.load_blacklisted_domains().await.unwrap_or_default() {
        gate.blacklist.add(&pattern);
    }
    if no_robots {
        gate.disable_robots_and_tos();
    }

    let frontier = Arc::new(Frontier::new());
    frontier.mark_visited_batch(storage.load_visited().await.unwrap_or_default());
    info!(visited = frontier.visited_len(), "loaded visited URLs");

    let seed_urls = collect_seeds(seeds_arg, seed, &config.crawl.seed_file)?;
    if storage.pending_count().await? == 0 {
        if seed_urls.is_empty() {
            warn!("pending set is empty and no seeds were provided");
        } else {
            let seeded = storage.seed_pending(&seed_urls).await?;
            info!(seeded, total = seed_urls.len(), "seeded pending set");
        }
    }

    let fetch_config = FetchConfig {
        user_agent: config.general.user_agent.clone(),
        timeout: Duration::from_secs(config.crawl.request_timeout_seconds),
        max_body_bytes: config.general.max_body_size_mb * 1024 * 1024,
        retries: config.crawl.fetch_retries,
        backoff_base: Duration::from_secs(1),
    };
    let fetcher = Arc::new(Fetcher::new(
        fetch_config,
        Duration::from_secs(config.crawl.domain_delay_seconds),
    )?);

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(Arc::clone(&shutdown));

    let max_depth = config.general.max_depth;
    let tag_config = config.tags.clone();

    info!(threads, max_depth, "starting crawl");
    let mut batch_no = 0u64;
    while !shutdown.load(Ordering::Relaxed) {
        let batch = storage.pop_pending_batch(threads as i64).await?;
        if batch.is_empty() {
            info!("pending queue empty, crawl complete");
            break;
        }
        batch_no += 1;
        debug!(batch = batch_no, count = batch.len(), "dispatching batch");

        let mut handles = Vec::with_capacity(batch.len());
        for (url_str, depth) in batch {
            let Ok(url) = Url::parse(&url_str) else {
                warn!(url = %url_str, "unparsable pending URL dropped");
                continue;
            };
            let task = CrawlTask { url, depth };
            let gate = Arc::clone(&gate);
            let frontier = Arc::clone(&frontier);
            let fetcher = Arc::clone(&fetcher);
            let write_tx = write_tx.clone();
            let shutdown = Arc::clone(&shutdown);
            let tag_config = tag_config.clone();
            handles.push(tokio::spawn(async move {
                crawl_one(task, gate, frontier, fetcher, write_tx, shutdown, max_depth, tag_config)
                    .await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    // Dropping every sender closes the queue; the writer drains and exits.
    drop(write_tx);
    drop(gate);
    match tokio::time::timeout(WRITER_DRAIN_WINDOW, writer_handle).await {
        Ok(_) => info!("writer drained"),
        Err(_) => warn!(
            window_secs = WRITER_DRAIN_WINDOW.as_secs(),
            "writer did not drain in time, exiting anyway"
        ),
    }

    let stats = frontier.stats();
    info!(
        crawled = stats.crawled,
        failed = stats.failed,
        dropped = stats.dropped,
        "crawl finished"
    );
    Ok(())
}

/// Crawl one URL end to end: policy gate, session dedup, polite fetch,
/// extraction, and write requests for everything that must persist.
#[allow(clippy::too_many_arguments)]
async fn crawl_one(
    task: CrawlTask,
    gate: Arc<PolicyGate>,
    frontier: Arc<Frontier>,
    fetcher: Arc<Fetcher>,
    write_tx: mpsc::Sender<WriteRequest>,
    shutdown: Arc<AtomicBool>,
    max_depth: u32,
    tag_config: TagConfig,
) {
    let url = task.url;
    let depth = task.depth;

    if shutdown.load(Ordering::Relaxed) {
        // Popped but never fetched: put it back for the next run.
        let _ = write_tx
            .send(WriteRequest::EnqueuePending {
                url: url.to_string(),
                depth,
            })
            .await;
        return;
    }

    match gate.evaluate(&url, depth).await {
        Admission::Drop(reason) => {
            info!(url = %url, ?reason, "policy drop");
            frontier.note_completion(url.as_str(), CrawlOutcome::Dropped);
            return;
        }
        Admission::Admit => {}
    }

    if !frontier.note_dispatch(url.as_str()) {
        debug!(url = %url, "already visited this session");
        return;
    }

    let delay = gate.crawl_delay(&url).await;
    let resp = match fetcher.fetch(&url, delay).await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(url = %url, error = %e, "fetch failed");
            let _ = write_tx
                .send(WriteRequest::DequeuePending(url.to_string()))
                .await;
            frontier.note_completion(url.as_str(), CrawlOutcome::Failed);
            return;
        }
    };

    if resp.status != 200 {
        // Unfollowed redirects still contribute their target as a link.
        if let Some(location) = resp.location() {
            if depth < max_depth {
                if let Ok(resolved) = url.join(location) {
                    let _ = write_tx
                        .send(WriteRequest::EnqueuePending {
                            url: resolved.to_string(),
                            depth: depth + 1,
                        })
                        .await;
                }
            }
        }
        debug!(url = %url, status = resp.status, "non-200 response dequeued");
        let _ = write_tx
            .send(WriteRequest::DequeuePending(url.to_string()))
            .await;
        frontier.note_completion(url.as_str(), CrawlOutcome::Failed);
        return;
    }

    let _ = write_tx
        .send(WriteRequest::RecordVisited(url.to_string()))
        .await;
    let _ = write_tx
        .send(WriteRequest::DequeuePending(url.to_string()))
        .await;

    let body = resp.body_text().into_owned();
    let mut new_links: Vec<String> = Vec::new();

    if parser::is_xml_content(&body) {
        // Feeds and sitemaps are link sources, not pages.
        new_links = parser::extract_xml_links(&body, &url);
        info!(url = %url, links = new_links.len(), "xml content, enqueueing links only");
    } else if resp.is_html() {
        let extract = parser::parse_html(&body, &url);
        new_links = extract.links.clone();

        let host = url.host_str().unwrap_or_default().to_string();
        let title = extract.title.clone().unwrap_or_else(|| host.clone());
        let tags = parser::generate_tags(
            &extract.text,
            extract.title.as_deref(),
            Some(url.as_str()),
            tag_config.max_tags,
        );
        if tags.len() < tag_config.min_tags {
            debug!(url = %url, count = tags.len(), "sparse tag set");
        }
        let content_hash = parser::simhash(&extract.summary);
        let language =
            parser::detect_language(&extract.text).unwrap_or_else(|| "unknown".to_string());

        let record = PageRecord {
            url: url.to_string(),
            title,
            summary: extract.summary,
            content_hash,
            domain: host,
            tags,
            images: extract.images,
        };
        let _ = write_tx
            .send(WriteRequest::SavePage(Box::new(record)))
            .await;
        let _ = write_tx
            .send(WriteRequest::RecordLanguage {
                url: url.to_string(),
                language,
            })
            .await;
    } else if let Some(location) = resp.location() {
        if let Ok(resolved) = url.join(location) {
            new_links.push(resolved.to_string());
        }
    }

    if depth < max_depth {
        for link in new_links {
            let _ = write_tx
                .send(WriteRequest::EnqueuePending {
                    url: link,
                    depth: depth + 1,
                })
                .await;
        }
    }

    frontier.note_completion(url.as_str(), CrawlOutcome::Crawled);
}

fn spawn_signal_listener(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("shutdown signal received, letting in-flight work finish");
        flag.store(true, Ordering::Relaxed);
    });
}
