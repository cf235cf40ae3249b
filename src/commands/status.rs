use anyhow::Result;

use webtrawl_core::config::AppConfig;
use webtrawl_storage::Storage;

pub async fn run(config: AppConfig) -> Result<()> {
    let storage = Storage::new(&config.database.postgres_url).await?;

    match storage.check_connectivity().await {
        Ok(()) => println!("Database: connected"),
        Err(e) => {
            println!("Database: ERROR - {}", e);
            return Ok(());
        }
    }

    storage.run_migrations().await?;

    let pending = storage.pending_count().await?;
    let visited = storage.visited_count().await?;
    let pages = storage.page_count().await?;
    let tags = storage.tag_count().await?;
    let blocked = storage.blocked_domain_count().await?;
    let queue = storage.queue_counts().await?;

    println!("\n╔══════════════════════════════════════════════╗");
    println!("║              webtrawl status                 ║");
    println!("╠══════════════════════════════════════════════╣");
    println!("║ Pending URLs:       {:>20}     ║", pending);
    println!("║ Visited URLs:       {:>20}     ║", visited);
    println!("║ Pages indexed:      {:>20}     ║", pages);
    println!("║ Tags stored:        {:>20}     ║", tags);
    println!("║ Blocked (ToS):      {:>20}     ║", blocked);
    println!("║ Queue pending:      {:>20}     ║", queue.pending);
    println!("║ Queue processing:   {:>20}     ║", queue.processing);
    println!("║ Queue completed:    {:>20}     ║", queue.completed);
    println!("╚══════════════════════════════════════════════╝\n");

    Ok(())
}
