use anyhow::Result;
use tracing::{error, info};

mod cli;
mod crawler;
mod error;
mod extract;
mod index;
mod query;
mod rank;
mod storage;
mod utils;

#[tokio::main]
async fn main() -> Result<()> {
    utils::init_logging(std::env::var("BUSCADOR_VERBOSE").is_ok(), None)?;

    info!("Starting buscador v{}", env!("CARGO_PKG_VERSION"));

    let args = cli::parse_args();

    match cli::process_command(args).await {
        Ok(_) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {}", e);
            Err(e)
        }
    }
}
