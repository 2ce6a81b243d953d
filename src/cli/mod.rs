pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration profile to load
    #[arg(long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a URL to the crawl queue
    Enqueue {
        /// URL to queue for crawling
        #[arg(required = true)]
        url: String,

        /// Queue priority (lower number = more urgent)
        #[arg(short = 'r', long, default_value_t = 3)]
        priority: i32,

        /// Crawl depth to record for the URL
        #[arg(short, long, default_value_t = 0)]
        depth: i32,
    },

    /// Crawl a single URL immediately
    Crawl {
        /// Target URL to crawl
        #[arg(required = true)]
        url: String,

        /// Depth at which the URL is crawled
        #[arg(short, long, default_value_t = 0)]
        depth: i32,
    },

    /// Process a batch of pending queue entries
    Process {
        /// Number of entries to claim and crawl concurrently
        #[arg(short, long)]
        batch_size: Option<usize>,
    },

    /// Run the link-authority computation over all indexed pages
    Pagerank {
        /// Number of iterations to run
        #[arg(short, long)]
        iterations: Option<u32>,
    },

    /// Search the index
    Search {
        /// Query text
        #[arg(required = true)]
        query: String,

        /// Result page (1-based)
        #[arg(short, long, default_value_t = 1)]
        page: u32,

        /// Results per page
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },

    /// Autocomplete suggestions for a prefix
    Suggest {
        /// Query prefix
        #[arg(required = true)]
        prefix: String,

        /// Maximum suggestions to return
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },

    /// Drop a page's index rows so the next crawl rebuilds them
    Reindex {
        /// Page id to clear
        #[arg(required = true)]
        page_id: i64,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        name: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    let profile = cli.profile;

    match cli.command {
        Commands::Enqueue { url, priority, depth } => {
            commands::enqueue(profile, url, priority, depth).await
        }
        Commands::Crawl { url, depth } => {
            info!("Crawling {}", url);
            commands::crawl(profile, url, depth).await
        }
        Commands::Process { batch_size } => commands::process(profile, batch_size).await,
        Commands::Pagerank { iterations } => commands::pagerank(profile, iterations).await,
        Commands::Search { query, page, limit } => {
            commands::search(profile, query, page, limit).await
        }
        Commands::Suggest { prefix, limit } => commands::suggest(profile, prefix, limit).await,
        Commands::Reindex { page_id } => commands::reindex(profile, page_id).await,
        Commands::Config { name, list } => {
            if list {
                commands::list_profiles().await
            } else if let Some(name) = name {
                commands::manage_profile(name).await
            } else {
                commands::show_config().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }
}
