use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use url::Url;

use webtrawl_core::blacklist_pattern_matches;

mod writer;

pub use writer::DbWriter;

/// Upper bound on one domain-coherent claim from the crawl queue.
pub const CLAIM_BATCH_LIMIT: i64 = 200;

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PurgeStats {
    pub queue_rows: u64,
    pub pending_rows: u64,
    pub pages: u64,
}

#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_pool_size(database_url, 10).await
    }

    pub async fn with_pool_size(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await?;
        info!("migrations complete");
        Ok(())
    }

    pub async fn check_connectivity(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // --- Startup preloads ---

    pub async fn load_visited(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM crawled_urls")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    pub async fn load_blocked_domains(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT domain FROM blocked_domains")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }

    pub async fn load_blacklisted_domains(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT domain FROM blacklisted_domains")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }

    // --- Embedded frontier: durable pending set ---

    pub async fn pending_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_urls")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Insert seeds at depth 0, skipping anything already pending or visited.
    pub async fn seed_pending(&self, seeds: &[String]) -> Result<u64> {
        let mut inserted = 0u64;
        let mut tx = self.pool.begin().await?;
        for url in seeds {
            let result = sqlx::query(
                "INSERT INTO pending_urls (url, depth)
                 SELECT $1, 0
                 WHERE NOT EXISTS (SELECT 1 FROM crawled_urls WHERE url = $1)
                 ON CONFLICT (url) DO NOTHING",
            )
            .bind(url)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Pop up to `limit` pending URLs, shallowest depth first so the crawl
    /// stays breadth-ordered. Selection and deletion happen in one
    /// transaction so a popped URL is in flight, not pending, the moment
    /// this returns.
    pub async fn pop_pending_batch(&self, limit: i64) -> Result<Vec<(String, u32)>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<(String, i32)> = sqlx::query_as(
            "SELECT url, depth FROM pending_urls ORDER BY depth, url LIMIT $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if !rows.is_empty() {
            let urls: Vec<String> = rows.iter().map(|(u, _)| u.clone()).collect();
            sqlx::query("DELETE FROM pending_urls WHERE url = ANY($1)")
                .bind(&urls)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(|(url, depth)| (url, depth.max(0) as u32))
            .collect())
    }

    // --- Status counters ---

    pub async fn visited_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM crawled_urls")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn page_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webpages")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn tag_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tags")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn blocked_domain_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blocked_domains")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    // --- Coordinator crawl queue ---

    pub async fn queue_counts(&self) -> Result<QueueCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM crawl_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut counts = QueueCounts::default();
        for (status, n) in rows {
            match status.as_str() {
                "pending" => counts.pending = n,
                "processing" => counts.processing = n,
                "completed" => counts.completed = n,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// Claim a domain-coherent batch: lock pending rows with skip-locked
    /// semantics, pick the host of the oldest claimable row, and flip that
    /// host's rows to `processing`. Blacklisted hosts are never handed out.
    pub async fn claim_host_batch(&self, blacklist: &[String]) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT url FROM crawl_queue WHERE status = 'pending'
             ORDER BY id LIMIT $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(CLAIM_BATCH_LIMIT)
        .fetch_all(&mut *tx)
        .await?;

        let admissible: Vec<(String, String)> = rows
            .into_iter()
            .filter_map(|(url,)| {
                let host = host_of(&url)?;
                if matches_any(blacklist, &host) {
                    None
                } else {
                    Some((url, host))
                }
            })
            .collect();

        let Some((_, batch_host)) = admissible.first().cloned() else {
            tx.commit().await?;
            return Ok(Vec::new());
        };

        let urls: Vec<String> = admissible
            .into_iter()
            .filter(|(_, host)| *host == batch_host)
            .map(|(url, _)| url)
            .collect();

        sqlx::query("UPDATE crawl_queue SET status = 'processing' WHERE url = ANY($1)")
            .bind(&urls)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(host = %batch_host, count = urls.len(), "claimed crawl batch");
        Ok(urls)
    }

    /// Revert `processing` rows to `pending` and purge `completed` ones.
    pub async fn reset_queue(&self) -> Result<(u64, u64)> {
        let mut tx = self.pool.begin().await?;
        let reverted =
            sqlx::query("UPDATE crawl_queue SET status = 'pending' WHERE status = 'processing'")
                .execute(&mut *tx)
                .await?
                .rows_affected();
        let purged = sqlx::query("DELETE FROM crawl_queue WHERE status = 'completed'")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok((reverted, purged))
    }

    pub async fn complete_url(&self, url: &str) -> Result<()> {
        sqlx::query(
            "UPDATE crawl_queue SET status = 'completed', last_crawled = NOW() WHERE url = $1",
        )
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark all `processing` rows of a host as completed.
    pub async fn skip_host(&self, host: &str) -> Result<u64> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, url FROM crawl_queue WHERE status = 'processing'")
                .fetch_all(&self.pool)
                .await?;
        let ids: Vec<i64> = rows
            .into_iter()
            .filter(|(_, url)| host_of(url).as_deref() == Some(host))
            .map(|(id, _)| id)
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let updated = sqlx::query(
            "UPDATE crawl_queue SET status = 'completed', last_crawled = NOW() WHERE id = ANY($1)",
        )
        .bind(&ids)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated)
    }

    /// Enqueue submitted outbound URLs; duplicates are ignored.
    pub async fn enqueue_crawl_urls(&self, urls: &[String]) -> Result<u64> {
        if urls.is_empty() {
            return Ok(0);
        }
        let inserted = sqlx::query(
            "INSERT INTO crawl_queue (url)
             SELECT * FROM UNNEST($1::text[])
             ON CONFLICT (url) DO NOTHING",
        )
        .bind(urls)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted)
    }

    /// Upsert a worker submission. Empty fields never clobber stored data.
    pub async fn save_submission(
        &self,
        url: &str,
        title: &str,
        summary: &str,
        content_hash: &str,
        domain: &str,
        tags: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO webpages (url, title, summary, content_hash, domain, timestamp)
             VALUES ($1, NULLIF($2, ''), NULLIF($3, ''), NULLIF($4, ''), $5, NOW())
             ON CONFLICT (url) DO UPDATE SET
                 title = COALESCE(NULLIF(EXCLUDED.title, ''), webpages.title),
                 summary = COALESCE(NULLIF(EXCLUDED.summary, ''), webpages.summary),
                 content_hash = COALESCE(NULLIF(EXCLUDED.content_hash, ''), webpages.content_hash),
                 domain = EXCLUDED.domain,
                 timestamp = NOW()",
        )
        .bind(url)
        .bind(title)
        .bind(summary)
        .bind(content_hash)
        .bind(domain)
        .execute(&mut *tx)
        .await?;

        insert_tags(&mut tx, url, tags).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete older duplicate pending rows, keeping the lowest id per URL.
    pub async fn sweep_duplicate_pending(&self) -> Result<u64> {
        let deleted = sqlx::query(
            "WITH duplicates AS (
                 SELECT id, ROW_NUMBER() OVER (PARTITION BY url ORDER BY id) AS rn
                 FROM crawl_queue
                 WHERE status = 'pending'
             )
             DELETE FROM crawl_queue
             WHERE id IN (SELECT id FROM duplicates WHERE rn > 1)",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(deleted)
    }

    // --- Blacklist persistence ---

    pub async fn add_blacklist_pattern(&self, pattern: &str) -> Result<()> {
        sqlx::query("INSERT INTO blacklisted_domains (domain) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(pattern)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_blacklist_pattern(&self, pattern: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM blacklisted_domains WHERE domain = $1")
            .bind(pattern)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Remove every trace of a blacklisted pattern: queue rows, pending
    /// rows, and indexed pages (tags and images first, FK order).
    pub async fn purge_blacklisted(&self, pattern: &str) -> Result<PurgeStats> {
        let mut tx = self.pool.begin().await?;
        let stats = purge_pattern(&mut tx, pattern).await?;
        tx.commit().await?;
        Ok(stats)
    }

    /// Queue-only purge for an already-blacklisted domain.
    pub async fn clear_queue_urls_for_pattern(&self, pattern: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let deleted = delete_queue_rows_matching(&mut tx, pattern, false).await?;
        let pending = delete_pending_rows_matching(&mut tx, pattern).await?;
        tx.commit().await?;
        Ok(deleted + pending)
    }
}

pub(crate) async fn insert_tags(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    url: &str,
    tags: &[String],
) -> Result<()> {
    if tags.is_empty() {
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO tags (url, tag)
         SELECT $1, * FROM UNNEST($2::text[])
         ON CONFLICT DO NOTHING",
    )
    .bind(url)
    .bind(tags)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) async fn insert_images(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    url: &str,
    images: &[String],
) -> Result<()> {
    if images.is_empty() {
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO images (url, image_url)
         SELECT $1, * FROM UNNEST($2::text[])
         ON CONFLICT DO NOTHING",
    )
    .bind(url)
    .bind(images)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Purge everything matching a blacklist pattern inside an open transaction;
/// shared between the writer path and the coordinator path.
pub(crate) async fn purge_pattern(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    pattern: &str,
) -> Result<PurgeStats> {
    let queue_rows = delete_queue_rows_matching(tx, pattern, true).await?;
    let pending_rows = delete_pending_rows_matching(tx, pattern).await?;

    let domains: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT domain FROM webpages WHERE domain IS NOT NULL AND domain <> ''",
    )
    .fetch_all(&mut **tx)
    .await?;
    let matching: Vec<String> = domains
        .into_iter()
        .map(|(d,)| d)
        .filter(|d| blacklist_pattern_matches(pattern, d))
        .collect();

    let mut pages = 0u64;
    if !matching.is_empty() {
        sqlx::query(
            "DELETE FROM tags WHERE url IN (SELECT url FROM webpages WHERE domain = ANY($1))",
        )
        .bind(&matching)
        .execute(&mut **tx)
        .await?;
        sqlx::query(
            "DELETE FROM images WHERE url IN (SELECT url FROM webpages WHERE domain = ANY($1))",
        )
        .bind(&matching)
        .execute(&mut **tx)
        .await?;
        pages = sqlx::query("DELETE FROM webpages WHERE domain = ANY($1)")
            .bind(&matching)
            .execute(&mut **tx)
            .await?
            .rows_affected();
    }

    Ok(PurgeStats {
        queue_rows,
        pending_rows,
        pages,
    })
}

/// Delete crawl_queue rows whose host matches the pattern. When
/// `mark_first` is set, rows pass through a `blacklisted` status before
/// deletion so the transition is visible to anything tailing the table.
async fn delete_queue_rows_matching(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    pattern: &str,
    mark_first: bool,
) -> Result<u64> {
    let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, url FROM crawl_queue")
        .fetch_all(&mut **tx)
        .await?;
    let ids: Vec<i64> = rows
        .into_iter()
        .filter(|(_, url)| {
            host_of(url).is_some_and(|h| blacklist_pattern_matches(pattern, &h))
        })
        .map(|(id, _)| id)
        .collect();
    if ids.is_empty() {
        return Ok(0);
    }
    if mark_first {
        sqlx::query("UPDATE crawl_queue SET status = 'blacklisted' WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut **tx)
            .await?;
    }
    let deleted = sqlx::query("DELETE FROM crawl_queue WHERE id = ANY($1)")
        .bind(&ids)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    Ok(deleted)
}

async fn delete_pending_rows_matching(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    pattern: &str,
) -> Result<u64> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT url FROM pending_urls")
        .fetch_all(&mut **tx)
        .await?;
    let urls: Vec<String> = rows
        .into_iter()
        .map(|(u,)| u)
        .filter(|url| host_of(url).is_some_and(|h| blacklist_pattern_matches(pattern, &h)))
        .collect();
    if urls.is_empty() {
        return Ok(0);
    }
    let deleted = sqlx::query("DELETE FROM pending_urls WHERE url = ANY($1)")
        .bind(&urls)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    Ok(deleted)
}

pub(crate) fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

fn matches_any(patterns: &[String], host: &str) -> bool {
    patterns.iter().any(|p| blacklist_pattern_matches(p, host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_parses_http_urls() {
        assert_eq!(host_of("http://a.test/x").as_deref(), Some("a.test"));
        assert_eq!(host_of("https://sub.b.test").as_deref(), Some("sub.b.test"));
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn matches_any_uses_glob_semantics() {
        let patterns = vec!["bad.test".to_string(), "*.worse.test".to_string()];
        assert!(matches_any(&patterns, "bad.test"));
        assert!(matches_any(&patterns, "x.worse.test"));
        assert!(!matches_any(&patterns, "fine.test"));
    }
}
