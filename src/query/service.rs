use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::config::QuerySettings;
use crate::error::EngineError;
use crate::index::tokenizer::{normalize_query, tokenize};
use crate::index::FieldType;
use crate::query::snippet::generate_snippet;
use crate::rank::scorer::{CandidateDoc, Ranker};
use crate::storage::cache::TtlCache;
use crate::storage::store::{Store, Suggestion};

/// One formatted search hit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub domain: String,
    /// 1-based rank position across the whole result set
    pub position: usize,
    pub score: f64,
    pub snippet: String,
    pub last_crawled: chrono::DateTime<chrono::Utc>,
}

/// Response payload for a search call; this exact struct is what gets
/// cached, so repeated calls within the TTL return identical payloads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub success: bool,
    pub query: String,
    pub page: u32,
    pub limit: u32,
    pub total_candidates: usize,
    pub results: Vec<SearchResult>,
    pub cached: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub page: u32,
    pub limit: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { page: 1, limit: 10 }
    }
}

/// Best-effort analytics job drained by the background writer
#[derive(Debug, Clone)]
pub struct AnalyticsJob {
    pub query: String,
    pub result_count: i64,
}

/// Read-side service: tokenizes queries, retrieves and ranks candidates,
/// paginates, caches and builds highlighted snippets.
pub struct QueryService {
    store: Arc<Store>,
    cache: Arc<TtlCache>,
    ranker: Ranker,
    settings: QuerySettings,
    analytics: mpsc::Sender<AnalyticsJob>,
}

impl QueryService {
    pub fn new(
        store: Arc<Store>,
        cache: Arc<TtlCache>,
        ranker: Ranker,
        settings: QuerySettings,
        analytics: mpsc::Sender<AnalyticsJob>,
    ) -> Self {
        Self {
            store,
            cache,
            ranker,
            settings,
            analytics,
        }
    }

    pub async fn search(&self, raw_query: &str, options: SearchOptions) -> Result<SearchResponse> {
        let query = normalize_query(raw_query);
        let page = options.page.max(1);
        let limit = options.limit.clamp(1, self.settings.max_limit);

        let cache_key = search_cache_key(&query, page, limit);

        match self.cache.get_json::<SearchResponse>(&cache_key).await {
            Ok(Some(mut cached)) => {
                debug!("Cache hit for '{}' page {}", query, page);
                cached.cached = true;
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => debug!("Search cache read failed: {}", e),
        }

        let tokens = tokenize(&query);
        if tokens.is_empty() {
            // User error, not a fault; not worth caching either
            return Ok(SearchResponse {
                success: false,
                query,
                page,
                limit,
                total_candidates: 0,
                results: Vec::new(),
                cached: false,
                error: Some(EngineError::InvalidQuery.to_string()),
            });
        }

        let min_match = min_should_match(tokens.len());
        let candidates = self
            .store
            .candidate_pages(&tokens, min_match, (2 * limit) as i64)
            .await?;

        let candidate_ids: Vec<i64> = candidates.iter().map(|c| c.page_id).collect();
        let pages = self.store.pages_by_ids(&candidate_ids).await?;
        let postings = self.store.postings_for(&candidate_ids, &tokens).await?;
        let doc_freqs = self.store.doc_frequencies(&tokens).await?;
        let total_docs = self.store.count_indexed_pages().await? as u64;

        let pages_by_id: HashMap<i64, _> = pages.into_iter().map(|p| (p.id, p)).collect();

        let mut term_fields: HashMap<i64, HashMap<String, HashMap<FieldType, u32>>> =
            HashMap::new();
        for posting in postings {
            let field = match FieldType::parse(&posting.field) {
                Some(field) => field,
                None => continue,
            };
            term_fields
                .entry(posting.page_id)
                .or_default()
                .entry(posting.word)
                .or_default()
                .insert(field, posting.term_frequency.max(0) as u32);
        }

        // Candidate retrieval order is the tiebreak for the stable sort
        let docs: Vec<CandidateDoc> = candidates
            .iter()
            .map(|candidate| CandidateDoc {
                page_id: candidate.page_id,
                authority: pages_by_id
                    .get(&candidate.page_id)
                    .map(|p| p.authority_score)
                    .unwrap_or(0.0),
                term_fields: term_fields.remove(&candidate.page_id).unwrap_or_default(),
            })
            .collect();

        let ranked = self.ranker.rank(docs, &tokens, total_docs, &doc_freqs);
        let total_candidates = ranked.len();

        let offset = page_offset(page, limit);
        let results: Vec<SearchResult> = paginate(&ranked, offset, limit as usize)
            .iter()
            .enumerate()
            .filter_map(|(i, doc)| {
                let record = pages_by_id.get(&doc.page_id)?;
                let title = if record.title.is_empty() {
                    record.url.clone()
                } else {
                    record.title.clone()
                };
                let snippet_source = if record.meta_description.is_empty() {
                    &record.title
                } else {
                    &record.meta_description
                };

                Some(SearchResult {
                    title,
                    url: record.url.clone(),
                    domain: record.domain.clone(),
                    position: offset + i + 1,
                    score: doc.score,
                    last_crawled: record.updated_at,
                    snippet: generate_snippet(
                        snippet_source,
                        &tokens,
                        self.settings.snippet_max_length,
                    ),
                })
            })
            .collect();

        info!(
            "Query '{}' matched {} candidates, returning {}",
            query,
            total_candidates,
            results.len()
        );

        // Best effort: a full channel or stopped writer just drops the job
        let job = AnalyticsJob {
            query: query.clone(),
            result_count: total_candidates as i64,
        };
        if let Err(e) = self.analytics.try_send(job) {
            debug!("Analytics job dropped: {}", e);
        }

        let response = SearchResponse {
            success: true,
            query,
            page,
            limit,
            total_candidates,
            results,
            cached: false,
            error: None,
        };

        if let Err(e) = self
            .cache
            .set_json(&cache_key, &response, self.settings.cache_ttl_secs)
            .await
        {
            debug!("Search cache write failed: {}", e);
        }

        Ok(response)
    }

    /// Prefix suggestions; prefixes shorter than 2 characters yield nothing
    pub async fn autocomplete(&self, prefix: &str, limit: u32) -> Result<Vec<Suggestion>> {
        let normalized = normalize_query(prefix);
        if normalized.chars().count() < 2 {
            return Ok(Vec::new());
        }

        self.store
            .suggestions_for(&normalized, limit.min(self.settings.max_limit) as i64)
            .await
    }
}

/// Spawn the background analytics writer and hand back its job channel.
///
/// Delivery is best-effort: write failures are logged and swallowed, and
/// pending jobs are lost on shutdown.
pub fn spawn_analytics_writer(store: Arc<Store>) -> mpsc::Sender<AnalyticsJob> {
    let (tx, mut rx) = mpsc::channel::<AnalyticsJob>(256);

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            if let Err(e) = store.log_search(&job.query, job.result_count).await {
                warn!("Failed to log search '{}': {}", job.query, e);
            }

            for prefix in suggestion_prefixes(&job.query) {
                if let Err(e) = store.upsert_suggestion(&prefix, &job.query).await {
                    warn!("Failed to record suggestion '{}': {}", prefix, e);
                }
            }
        }
    });

    tx
}

/// Cache key: hash of the normalized query with its page window
pub fn search_cache_key(query: &str, page: u32, limit: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}", query, page, limit));
    format!("search:{:x}", hasher.finalize())
}

/// Zero-based offset of a 1-based page; widened so extreme page numbers
/// cannot overflow 32-bit arithmetic
fn page_offset(page: u32, limit: u32) -> usize {
    ((page.max(1) as u64 - 1) * limit as u64) as usize
}

/// Candidates must match at least 70% of the query tokens, rounded up
pub fn min_should_match(token_count: usize) -> i64 {
    (token_count as f64 * 0.7).ceil() as i64
}

/// The page window `[offset, offset + limit)` of a ranked slice
pub fn paginate<T>(items: &[T], offset: usize, limit: usize) -> &[T] {
    if offset >= items.len() {
        return &[];
    }
    &items[offset..(offset + limit).min(items.len())]
}

/// Prefixes of 2 to 10 characters used to key the suggestion table
fn suggestion_prefixes(query: &str) -> Vec<String> {
    let chars: Vec<char> = query.chars().collect();
    let max_len = chars.len().min(10);

    (2..=max_len).map(|n| chars[..n].iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_should_match() {
        assert_eq!(min_should_match(1), 1);
        assert_eq!(min_should_match(2), 2);
        assert_eq!(min_should_match(3), 3);
        assert_eq!(min_should_match(4), 3);
        assert_eq!(min_should_match(10), 7);
    }

    #[test]
    fn test_paginate_second_page() {
        let items: Vec<u32> = (1..=25).collect();

        // Page 2 with limit 10 covers rank positions 11..=20
        let window = paginate(&items, 10, 10);
        assert_eq!(window, (11..=20).collect::<Vec<u32>>().as_slice());

        let tail = paginate(&items, 20, 10);
        assert_eq!(tail, (21..=25).collect::<Vec<u32>>().as_slice());

        assert!(paginate(&items, 30, 10).is_empty());
    }

    #[test]
    fn test_page_offset_handles_extreme_pages() {
        assert_eq!(page_offset(1, 10), 0);
        assert_eq!(page_offset(3, 10), 20);

        // Far beyond any real result set; must not overflow, and the
        // resulting window is simply empty
        let offset = page_offset(u32::MAX, 50);
        assert!(paginate(&[1, 2, 3], offset, 50).is_empty());
    }

    #[test]
    fn test_cache_key_depends_on_window() {
        let a = search_cache_key("rust web", 1, 10);
        let b = search_cache_key("rust web", 1, 10);
        let c = search_cache_key("rust web", 2, 10);
        let d = search_cache_key("rust web", 1, 20);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_response_round_trips_through_cache_encoding() {
        let response = SearchResponse {
            success: true,
            query: "rust web".to_string(),
            page: 2,
            limit: 10,
            total_candidates: 13,
            results: vec![SearchResult {
                title: "Rust".to_string(),
                url: "https://example.com/rust".to_string(),
                domain: "example.com".to_string(),
                position: 11,
                score: 1.25,
                snippet: "**Rust** is fast".to_string(),
                last_crawled: chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            }],
            cached: false,
            error: None,
        };

        // The cache stores this exact serialization; a hit must yield an
        // identical payload
        let raw = serde_json::to_string(&response).unwrap();
        let parsed: SearchResponse = serde_json::from_str(&raw).unwrap();

        assert_eq!(parsed, response);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), raw);
    }

    #[test]
    fn test_suggestion_prefixes() {
        assert_eq!(suggestion_prefixes("a"), Vec::<String>::new());
        assert_eq!(suggestion_prefixes("rust"), vec!["ru", "rus", "rust"]);
        assert_eq!(suggestion_prefixes("rust web engine").len(), 9);
    }
}
