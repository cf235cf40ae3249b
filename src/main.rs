mod cli;
mod commands;
mod crawl;
mod seeds;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

// mimalloc keeps memory flat under high fetch concurrency where glibc
// malloc holds on to freed pages.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use webtrawl_core::config::AppConfig;
use webtrawl_coordinator::worker::{run_worker, WorkerOptions};

use crate::cli::{Cli, Commands};
use crate::crawl::run_crawl;

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;

    // Environment overrides for deployment tuning.
    if let Ok(v) = std::env::var("THREADS") {
        if let Ok(n) = v.parse::<usize>() {
            if n > 0 && n <= 128 {
                config.crawl.threads = n;
            }
        }
    }
    if let Ok(v) = std::env::var("MAX_DEPTH") {
        if let Ok(n) = v.parse::<u32>() {
            config.general.max_depth = n;
        }
    }
    if let Ok(v) = std::env::var("DATABASE_URL") {
        config.database.postgres_url = v;
    }
    if let Ok(v) = std::env::var("JWT_SECRET") {
        config.coordinator.jwt_secret = v;
    }
    if let Ok(v) = std::env::var("USER_AGENT") {
        config.general.user_agent = v;
    }

    match cli.command {
        Commands::Crawl {
            seeds,
            seed,
            depth,
            threads,
            no_robots,
        } => {
            run_crawl(config, seeds, seed, depth, threads, no_robots).await?;
        }
        Commands::Serve { bind } => {
            commands::serve::run(config, bind).await?;
        }
        Commands::Worker {
            api,
            token,
            threads,
            no_robots,
        } => {
            let opts = WorkerOptions {
                api_base: api,
                token,
                threads,
                enforce_robots: !no_robots,
            };
            run_worker(&config, opts).await?;
        }
        Commands::Status => {
            commands::status::run(config).await?;
        }
        Commands::Token { ttl } => {
            let token =
                webtrawl_coordinator::auth::issue_token(&config.coordinator.jwt_secret, ttl)?;
            println!("{}", token);
        }
    }

    Ok(())
}
