use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::info;

use webtrawl_coordinator::sweep::spawn_dedupe_sweep;
use webtrawl_coordinator::AppState;
use webtrawl_core::config::AppConfig;
use webtrawl_policy::Blacklist;
use webtrawl_storage::Storage;

pub async fn run(config: AppConfig, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.coordinator.bind.clone());

    let storage = Storage::new(&config.database.postgres_url)
        .await
        .context("fatal: cannot connect to database")?;
    storage
        .run_migrations()
        .await
        .context("fatal: schema migration failed")?;

    let blacklist = Blacklist::load(storage.load_blacklisted_domains().await?);
    info!(patterns = blacklist.len(), "blacklist loaded");

    let state = Arc::new(AppState::new(
        storage,
        blacklist,
        &config.dedupe,
        &config.tags,
        config.coordinator.jwt_secret.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let sweep_handle = spawn_dedupe_sweep(Arc::clone(&state), shutdown_tx.subscribe());

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        let _ = signal_tx.send(());
    });

    webtrawl_coordinator::serve(state, &bind, shutdown_tx.subscribe()).await?;
    let _ = sweep_handle.await;
    info!("coordinator stopped");
    Ok(())
}
