pub mod controller;
pub mod fetcher;
pub mod robots;

// Re-export common types
pub use controller::{BatchStats, CrawlOutcome, Crawler, SkipReason};
pub use robots::PolitenessGate;
