use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::config::EngineConfig;
use crate::crawler::{CrawlOutcome, Crawler, PolitenessGate};
use crate::index::Indexer;
use crate::query::service::spawn_analytics_writer;
use crate::query::{QueryService, SearchOptions};
use crate::rank::{AuthorityEngine, Ranker};
use crate::storage::{Store, TtlCache};

/// The fully wired pipeline.
///
/// All services are resolved once at startup and share the store and
/// cache handles; there is no lazy wiring and no module-level state.
pub struct Engine {
    pub config: EngineConfig,
    pub crawler: Crawler,
    pub indexer: Arc<Indexer>,
    pub authority: AuthorityEngine,
    pub query: QueryService,
}

impl Engine {
    pub async fn build(config: EngineConfig) -> Result<Self> {
        let store = Arc::new(Store::connect(&config.storage).await?);
        let cache = Arc::new(TtlCache::connect(&config.cache).await?);

        let gate = Arc::new(PolitenessGate::new(config.robots.clone(), cache.clone())?);
        let indexer = Arc::new(Indexer::new(store.clone(), config.indexing.clone()));

        let crawler = Crawler::new(
            config.crawler.clone(),
            store.clone(),
            gate,
            indexer.clone(),
        )?;

        let authority = AuthorityEngine::new(store.clone(), config.ranking.damping);

        let analytics = spawn_analytics_writer(store.clone());
        let query = QueryService::new(
            store,
            cache,
            Ranker::new(config.ranking.clone()),
            config.query.clone(),
            analytics,
        );

        Ok(Self {
            config,
            crawler,
            indexer,
            authority,
            query,
        })
    }
}

fn load_config(profile: Option<String>) -> Result<EngineConfig> {
    match profile {
        Some(profile) => EngineConfig::load_profile(&profile)
            .context(format!("Failed to load profile: {}", profile)),
        None => EngineConfig::load_default(),
    }
}

/// Add a URL to the crawl queue
pub async fn enqueue(
    profile: Option<String>,
    url: String,
    priority: i32,
    depth: i32,
) -> Result<()> {
    let engine = Engine::build(load_config(profile)?).await?;

    let queue_id = engine.crawler.add_to_queue(&url, priority, depth, None).await?;
    info!("Queued {} as entry {}", url, queue_id);

    Ok(())
}

/// Crawl a single URL immediately
pub async fn crawl(profile: Option<String>, url: String, depth: i32) -> Result<()> {
    let engine = Engine::build(load_config(profile)?).await?;

    match engine.crawler.crawl(&url, depth).await? {
        CrawlOutcome::Completed { page_id, links_found } => {
            println!("Crawled and indexed page {} ({} links found)", page_id, links_found);
        }
        CrawlOutcome::Skipped { reason } => {
            println!("Skipped: {}", reason.message());
        }
        CrawlOutcome::Failed { error } => {
            warn!("Crawl failed: {}", error);
            println!("Failed: {}", error);
        }
    }

    Ok(())
}

/// Process a batch of pending queue entries
pub async fn process(profile: Option<String>, batch_size: Option<usize>) -> Result<()> {
    let engine = Engine::build(load_config(profile)?).await?;

    let batch_size = batch_size.unwrap_or(engine.config.crawler.batch_size);
    let stats = engine.crawler.process_queue(batch_size).await?;

    println!(
        "Processed: {}  Successful: {}  Failed: {}",
        stats.processed, stats.successful, stats.failed
    );

    Ok(())
}

/// Run the authority computation over all indexed pages
pub async fn pagerank(profile: Option<String>, iterations: Option<u32>) -> Result<()> {
    let engine = Engine::build(load_config(profile)?).await?;

    let iterations = iterations.unwrap_or(engine.config.ranking.iterations);
    engine.authority.calculate(iterations).await?;

    Ok(())
}

/// Search the index and print the formatted hits
pub async fn search(profile: Option<String>, query: String, page: u32, limit: u32) -> Result<()> {
    let engine = Engine::build(load_config(profile)?).await?;

    let response = engine
        .query
        .search(&query, SearchOptions { page, limit })
        .await?;

    if !response.success {
        println!("{}", response.error.as_deref().unwrap_or("Search failed"));
        return Ok(());
    }

    println!(
        "{} candidates for '{}' (page {}, cached: {})",
        response.total_candidates, response.query, response.page, response.cached
    );
    for result in &response.results {
        println!(
            "{:>3}. [{:.4}] {} - {} (crawled {})",
            result.position,
            result.score,
            result.title,
            result.url,
            result.last_crawled.format("%Y-%m-%d")
        );
        if !result.snippet.is_empty() {
            println!("     {}", result.snippet);
        }
    }

    Ok(())
}

/// Print autocomplete suggestions for a prefix
pub async fn suggest(profile: Option<String>, prefix: String, limit: u32) -> Result<()> {
    let engine = Engine::build(load_config(profile)?).await?;

    let suggestions = engine.query.autocomplete(&prefix, limit).await?;
    for suggestion in suggestions {
        println!("{} ({})", suggestion.term, suggestion.frequency);
    }

    Ok(())
}

/// Clear a page's index rows; the next crawl of its URL rebuilds them
pub async fn reindex(profile: Option<String>, page_id: i64) -> Result<()> {
    let engine = Engine::build(load_config(profile)?).await?;

    engine.indexer.reindex_page(page_id).await?;
    println!("Cleared index for page {}", page_id);

    Ok(())
}

/// List all available configuration profiles
pub async fn list_profiles() -> Result<()> {
    let profiles = EngineConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Manage a specific configuration profile
pub async fn manage_profile(name: String) -> Result<()> {
    match EngineConfig::load_profile(&name) {
        Ok(config) => {
            println!("Profile: {}", name);
            println!("{:#?}", config);
        }
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", name);
            let config = EngineConfig::default();
            config.save_as_profile(&name)?;
            println!("Created default profile: {}", name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub async fn show_config() -> Result<()> {
    let config = EngineConfig::load_default()?;
    println!("Current configuration:");
    println!("{:#?}", config);

    Ok(())
}
