use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::state::AppState;

/// How often the sweep task wakes up to check whether it is due.
const TICK: Duration = Duration::from_secs(60);

/// Background deduplication sweep over the crawl queue. Wakes every minute;
/// when enabled and the configured interval has elapsed, removes older
/// duplicate pending rows (lowest id wins).
pub fn spawn_dedupe_sweep(
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_sweep = Instant::now();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("dedupe sweep shutting down");
                    break;
                }
                _ = tokio::time::sleep(TICK) => {
                    if !state.dedupe_enabled() {
                        continue;
                    }
                    let interval = Duration::from_secs(state.dedupe_interval_secs());
                    if last_sweep.elapsed() < interval {
                        continue;
                    }
                    match state.storage.sweep_duplicate_pending().await {
                        Ok(0) => {}
                        Ok(deleted) => info!(deleted, "dedupe sweep removed duplicate pending rows"),
                        Err(e) => error!(error = %e, "dedupe sweep failed"),
                    }
                    last_sweep = Instant::now();
                }
            }
        }
    })
}
