pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod sweep;
pub mod worker;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::info;

pub use state::AppState;

/// Serve the coordinator API until the shutdown channel fires.
pub async fn serve(
    state: Arc<AppState>,
    bind: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "coordinator listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
