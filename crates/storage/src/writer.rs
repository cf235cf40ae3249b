use anyhow::Result;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use webtrawl_parser::{hamming_distance, normalize_url_path};

use webtrawl_core::{PageRecord, WriteRequest};

use crate::{insert_images, insert_tags, purge_pattern};

/// Near-duplicate threshold: pages at the same normalized path whose
/// simhashes differ by at most this many bits are the same page.
const NEAR_DUP_DISTANCE: u32 = 3;

/// The single consumer of the write-request queue. Every mutation of the
/// durable tables flows through here, one transaction per request; a failed
/// request is rolled back and logged, never retried, and never takes the
/// writer down. The writer exits when all senders are dropped and the
/// queue has drained.
pub struct DbWriter {
    pool: PgPool,
    rx: mpsc::Receiver<WriteRequest>,
}

impl DbWriter {
    pub fn spawn(pool: PgPool, rx: mpsc::Receiver<WriteRequest>) -> JoinHandle<()> {
        tokio::spawn(async move { DbWriter { pool, rx }.run().await })
    }

    async fn run(mut self) {
        let mut applied = 0u64;
        while let Some(req) = self.rx.recv().await {
            match self.apply(&req).await {
                Ok(()) => applied += 1,
                Err(e) => error!(kind = req.kind(), error = %e, "write failed, rolled back"),
            }
        }
        info!(applied, "db writer drained, exiting");
    }

    async fn apply(&self, req: &WriteRequest) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        match req {
            WriteRequest::RecordVisited(url) => {
                sqlx::query("INSERT INTO crawled_urls (url) VALUES ($1) ON CONFLICT DO NOTHING")
                    .bind(url)
                    .execute(&mut *tx)
                    .await?;
                // A URL is pending or visited, never both.
                sqlx::query("DELETE FROM pending_urls WHERE url = $1")
                    .bind(url)
                    .execute(&mut *tx)
                    .await?;
            }
            WriteRequest::EnqueuePending { url, depth } => {
                sqlx::query(
                    "INSERT INTO pending_urls (url, depth)
                     SELECT $1, $2
                     WHERE NOT EXISTS (SELECT 1 FROM crawled_urls WHERE url = $1)
                     ON CONFLICT (url) DO NOTHING",
                )
                .bind(url)
                .bind(*depth as i32)
                .execute(&mut *tx)
                .await?;
            }
            WriteRequest::DequeuePending(url) => {
                sqlx::query("DELETE FROM pending_urls WHERE url = $1")
                    .bind(url)
                    .execute(&mut *tx)
                    .await?;
            }
            WriteRequest::SavePage(page) => {
                if self.is_near_duplicate(&mut tx, page).await? {
                    info!(url = %page.url, "near-duplicate page skipped");
                    tx.commit().await?;
                    return Ok(());
                }
                save_page(&mut tx, page).await?;
            }
            WriteRequest::RecordLanguage { url, language } => {
                sqlx::query(
                    "INSERT INTO language (url, language) VALUES ($1, $2)
                     ON CONFLICT (url) DO UPDATE SET language = EXCLUDED.language",
                )
                .bind(url)
                .bind(language)
                .execute(&mut *tx)
                .await?;
            }
            WriteRequest::RecordBlockedDomain(domain) => {
                sqlx::query(
                    "INSERT INTO blocked_domains (domain) VALUES ($1) ON CONFLICT DO NOTHING",
                )
                .bind(domain)
                .execute(&mut *tx)
                .await?;
            }
            WriteRequest::Blacklist(pattern) => {
                sqlx::query(
                    "INSERT INTO blacklisted_domains (domain) VALUES ($1) ON CONFLICT DO NOTHING",
                )
                .bind(pattern)
                .execute(&mut *tx)
                .await?;
                let stats = purge_pattern(&mut tx, pattern).await?;
                info!(
                    pattern = %pattern,
                    queue_rows = stats.queue_rows,
                    pending_rows = stats.pending_rows,
                    pages = stats.pages,
                    "domain blacklisted and purged"
                );
            }
            WriteRequest::Unblacklist(pattern) => {
                sqlx::query("DELETE FROM blacklisted_domains WHERE domain = $1")
                    .bind(pattern)
                    .execute(&mut *tx)
                    .await?;
            }
            WriteRequest::ClearUrlsForDomain(pattern) => {
                let stats = purge_pattern(&mut tx, pattern).await?;
                debug!(pattern = %pattern, queue_rows = stats.queue_rows, pending_rows = stats.pending_rows, "queue cleared for domain");
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Scan stored pages on the same domain for one at the same normalized
    /// path within the Hamming threshold.
    async fn is_near_duplicate(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        page: &PageRecord,
    ) -> Result<bool> {
        let path = normalize_url_path(&page.url);
        let candidates: Vec<(String, String)> = sqlx::query_as(
            "SELECT url, content_hash FROM webpages
             WHERE domain = $1 AND content_hash IS NOT NULL AND content_hash <> ''",
        )
        .bind(&page.domain)
        .fetch_all(&mut **tx)
        .await?;

        for (existing_url, existing_hash) in candidates {
            if existing_url == page.url {
                // Re-crawl of the same URL is an upsert, not a duplicate.
                continue;
            }
            if normalize_url_path(&existing_url) != path {
                continue;
            }
            let Ok(existing) = existing_hash.parse::<u64>() else {
                continue;
            };
            let distance = hamming_distance(existing, page.content_hash);
            if distance <= NEAR_DUP_DISTANCE {
                debug!(
                    url = %page.url,
                    existing = %existing_url,
                    distance,
                    "content fingerprint within duplicate threshold"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}

async fn save_page(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    page: &PageRecord,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO webpages (url, title, summary, content_hash, domain, timestamp)
         VALUES ($1, NULLIF($2, ''), NULLIF($3, ''), $4, $5, NOW())
         ON CONFLICT (url) DO UPDATE SET
             title = COALESCE(NULLIF(EXCLUDED.title, ''), webpages.title),
             summary = COALESCE(NULLIF(EXCLUDED.summary, ''), webpages.summary),
             content_hash = COALESCE(NULLIF(EXCLUDED.content_hash, ''), webpages.content_hash),
             domain = EXCLUDED.domain,
             timestamp = NOW()",
    )
    .bind(&page.url)
    .bind(&page.title)
    .bind(&page.summary)
    .bind(page.content_hash.to_string())
    .bind(&page.domain)
    .execute(&mut **tx)
    .await?;

    insert_tags(tx, &page.url, &page.tags).await?;
    insert_images(tx, &page.url, &page.images).await?;
    Ok(())
}
