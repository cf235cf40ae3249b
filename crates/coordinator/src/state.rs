use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::RwLock;

use webtrawl_core::config::{DedupeConfig, TagConfig};
use webtrawl_policy::Blacklist;
use webtrawl_storage::Storage;

/// Shared state behind every coordinator route.
pub struct AppState {
    pub storage: Storage,
    /// In-memory mirror of `blacklisted_domains`; loaded at startup and
    /// kept in step by the blacklist routes.
    pub blacklist: Blacklist,
    /// Host the queue is currently handing out, for /status and /skip_domain.
    pub current_domain: RwLock<Option<String>>,
    dedupe_enabled: AtomicBool,
    dedupe_interval_secs: AtomicU64,
    pub jwt_secret: String,
    pub worker_min_tags: usize,
}

impl AppState {
    pub fn new(
        storage: Storage,
        blacklist: Blacklist,
        dedupe: &DedupeConfig,
        tags: &TagConfig,
        jwt_secret: String,
    ) -> Self {
        Self {
            storage,
            blacklist,
            current_domain: RwLock::new(None),
            dedupe_enabled: AtomicBool::new(dedupe.enabled),
            dedupe_interval_secs: AtomicU64::new(dedupe.interval_seconds),
            jwt_secret,
            worker_min_tags: tags.worker_min_tags,
        }
    }

    pub fn dedupe_enabled(&self) -> bool {
        self.dedupe_enabled.load(Ordering::Relaxed)
    }

    pub fn set_dedupe_enabled(&self, enabled: bool) {
        self.dedupe_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn dedupe_interval_secs(&self) -> u64 {
        self.dedupe_interval_secs.load(Ordering::Relaxed)
    }

    pub fn set_dedupe_interval_secs(&self, secs: u64) {
        self.dedupe_interval_secs.store(secs, Ordering::Relaxed);
    }
}
