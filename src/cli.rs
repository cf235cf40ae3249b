use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "webtrawl", about = "Breadth-first web crawler & page indexer")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl from seed URLs with the embedded driver
    Crawl {
        /// Seed URLs (comma-separated or a file path)
        #[arg(short, long)]
        seeds: Option<String>,

        /// Single seed URL
        #[arg(long)]
        seed: Option<String>,

        /// Maximum crawl depth
        #[arg(short, long)]
        depth: Option<u32>,

        /// Fetch worker pool size
        #[arg(short, long)]
        threads: Option<usize>,

        /// Ignore robots.txt and the terms-of-service heuristic
        #[arg(long)]
        no_robots: bool,
    },
    /// Run the coordinator API for distributed workers
    Serve {
        /// Bind address, e.g. 0.0.0.0:5001
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Run a remote crawl worker against a coordinator
    Worker {
        /// Coordinator API base, e.g. http://coordinator:5001/api/crawler
        #[arg(long)]
        api: String,

        /// Privileged bearer token (from `webtrawl token`)
        #[arg(long)]
        token: Option<String>,

        /// Worker threads (capped at logical CPU count)
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Skip robots.txt checks
        #[arg(long)]
        no_robots: bool,
    },
    /// Show queue and index statistics
    Status,
    /// Issue a privileged API token
    Token {
        /// Token lifetime in seconds
        #[arg(long, default_value = "86400")]
        ttl: u64,
    },
}
