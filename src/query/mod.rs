pub mod service;
pub mod snippet;

// Re-export common types
pub use service::{QueryService, SearchOptions, SearchResponse, SearchResult};
