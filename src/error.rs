use thiserror::Error;

/// Errors raised at the crawl and query seams.
///
/// Robots refusals and unchanged content are deliberately *not* errors;
/// they are modelled as skip outcomes on [`crate::crawler::CrawlOutcome`].
/// Database and cache failures travel as `anyhow` errors with context
/// attached at the call site.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Network failure, timeout or HTTP status >= 400 while fetching a page
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Malformed URL or unparseable document
    #[error("parse failed: {0}")]
    Parse(String),

    /// Query normalized to zero tokens; user-facing, not a fault
    #[error("Invalid query")]
    InvalidQuery,
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Fetch(format!("timeout: {}", err))
        } else {
            EngineError::Fetch(err.to_string())
        }
    }
}
