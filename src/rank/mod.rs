pub mod pagerank;
pub mod scorer;

// Re-export common types
pub use pagerank::AuthorityEngine;
pub use scorer::Ranker;
