pub mod cache;
pub mod store;

// Re-export common types
pub use cache::TtlCache;
pub use store::Store;
