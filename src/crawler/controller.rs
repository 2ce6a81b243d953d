use std::sync::Arc;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cli::config::CrawlerSettings;
use crate::crawler::fetcher::Fetcher;
use crate::crawler::robots::{is_allowed, request_target, PolitenessGate};
use crate::error::EngineError;
use crate::extract;
use crate::index::Indexer;
use crate::storage::store::{NewLink, NewPage, QueueEntry, Store};

/// Why a crawl was skipped; skips are successful outcomes, not errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    RobotsDisallowed,
    ContentUnchanged { page_id: i64 },
}

impl SkipReason {
    pub fn message(&self) -> &'static str {
        match self {
            SkipReason::RobotsDisallowed => "robots.txt disallowed",
            SkipReason::ContentUnchanged { .. } => "content unchanged",
        }
    }
}

/// Outcome of crawling a single URL
#[derive(Debug, Clone)]
pub enum CrawlOutcome {
    Completed { page_id: i64, links_found: usize },
    Skipped { reason: SkipReason },
    Failed { error: String },
}

/// Aggregate counts for one queue batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Drains the crawl queue: fetches pages through the politeness gate,
/// deduplicates by content hash, persists pages and links, feeds the
/// indexer and enqueues newly discovered URLs.
pub struct Crawler {
    config: CrawlerSettings,
    store: Arc<Store>,
    gate: Arc<PolitenessGate>,
    fetcher: Fetcher,
    indexer: Arc<Indexer>,
}

impl Crawler {
    pub fn new(
        config: CrawlerSettings,
        store: Arc<Store>,
        gate: Arc<PolitenessGate>,
        indexer: Arc<Indexer>,
    ) -> Result<Self> {
        let fetcher = Fetcher::new(&config)?;

        Ok(Self {
            config,
            store,
            gate,
            fetcher,
            indexer,
        })
    }

    pub async fn add_to_queue(
        &self,
        url: &str,
        priority: i32,
        depth: i32,
        parent_url: Option<&str>,
    ) -> Result<i64> {
        self.store.enqueue(url, priority, depth, parent_url).await
    }

    /// Crawl one URL.
    ///
    /// Fetch and parse failures are caught and returned as
    /// [`CrawlOutcome::Failed`]; only persistence errors propagate as `Err`.
    pub async fn crawl(&self, url: &str, depth: i32) -> Result<CrawlOutcome> {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Ok(CrawlOutcome::Failed {
                    error: EngineError::Parse(format!("invalid url: {}", e)).to_string(),
                })
            }
        };
        let domain = match parsed.host_str() {
            Some(host) => host.to_lowercase(),
            None => {
                return Ok(CrawlOutcome::Failed {
                    error: EngineError::Parse("url has no host".to_string()).to_string(),
                })
            }
        };

        let rules = self.gate.rules_for(&domain).await;
        if !is_allowed(&request_target(&parsed), &rules) {
            debug!("Robots disallow {}", url);
            return Ok(CrawlOutcome::Skipped {
                reason: SkipReason::RobotsDisallowed,
            });
        }

        self.gate.enforce_delay(&domain, rules.crawl_delay_secs).await;

        let page = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(e @ EngineError::Fetch(_)) => {
                return Ok(CrawlOutcome::Failed {
                    error: e.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(existing) = self.store.page_by_url(url).await? {
            if existing.content_hash == page.content_hash {
                debug!("Content unchanged for {}", url);
                return Ok(CrawlOutcome::Skipped {
                    reason: SkipReason::ContentUnchanged {
                        page_id: existing.id,
                    },
                });
            }
        }

        let content = extract::extract(&page.body, &parsed);
        debug!(
            "Extracted {} links, {} headings from {}",
            content.links.len(),
            content.headings.len(),
            url
        );

        let page_id = self
            .store
            .upsert_page(&NewPage {
                url: url.to_string(),
                domain: domain.clone(),
                content_hash: page.content_hash,
                title: content.title.clone(),
                meta_description: content.meta_description.clone(),
                status_code: page.status_code as i32,
                content_length: page.content_length as i32,
            })
            .await?;

        let link_rows: Vec<NewLink> = content
            .links
            .iter()
            .map(|link| NewLink {
                to_url: link.url.clone(),
                anchor_text: link.anchor_text.clone(),
                internal: link.internal,
            })
            .collect();
        self.store.replace_links(page_id, &link_rows).await?;

        if depth < self.config.max_depth {
            for link in &content.links {
                let priority = if link.internal {
                    self.config.internal_link_priority
                } else {
                    self.config.external_link_priority
                };
                self.store
                    .enqueue(&link.url, priority, depth + 1, Some(url))
                    .await?;
            }
        }

        self.indexer.index_page(page_id, &content).await?;

        info!("Crawled {} ({} links)", url, content.links.len());

        Ok(CrawlOutcome::Completed {
            page_id,
            links_found: content.links.len(),
        })
    }

    /// Claim up to `batch_size` pending entries and crawl them with
    /// bounded concurrency equal to the batch size.
    ///
    /// One URL's failure never aborts the batch. Failures below the retry
    /// cap are re-queued with exponential backoff; at the cap the entry
    /// goes FAILED, which is terminal.
    pub async fn process_queue(&self, batch_size: usize) -> Result<BatchStats> {
        let entries = self.store.claim_pending(batch_size as i64).await?;
        if entries.is_empty() {
            debug!("Queue empty, nothing to process");
            return Ok(BatchStats::default());
        }

        info!("Processing batch of {} queue entries", entries.len());

        let outcomes: Vec<(QueueEntry, Result<CrawlOutcome>)> = stream::iter(entries)
            .map(|entry| async move {
                let outcome = self.crawl(&entry.url, entry.depth).await;
                (entry, outcome)
            })
            .buffer_unordered(batch_size.max(1))
            .collect()
            .await;

        let mut stats = BatchStats::default();

        for (entry, outcome) in outcomes {
            stats.processed += 1;
            match outcome {
                Ok(CrawlOutcome::Completed { .. }) => {
                    stats.successful += 1;
                    self.store.complete_entry(entry.id).await?;
                }
                Ok(CrawlOutcome::Skipped { reason }) => {
                    stats.successful += 1;
                    debug!("Skipped {}: {}", entry.url, reason.message());
                    self.store.complete_entry(entry.id).await?;
                }
                Ok(CrawlOutcome::Failed { error }) => {
                    stats.failed += 1;
                    warn!("Crawl failed for {}: {}", entry.url, error);
                    self.settle_failure(&entry, &error).await?;
                }
                Err(e) => {
                    stats.failed += 1;
                    error!("Crawl error for {}: {}", entry.url, e);
                    self.settle_failure(&entry, &e.to_string()).await?;
                }
            }
        }

        info!(
            "Batch done: {} processed, {} successful, {} failed",
            stats.processed, stats.successful, stats.failed
        );

        Ok(stats)
    }

    async fn settle_failure(&self, entry: &QueueEntry, error: &str) -> Result<()> {
        if entry.retry_count < self.config.max_retries {
            let delay = backoff_delay_secs(self.config.retry_backoff_secs, entry.retry_count);
            debug!(
                "Re-queueing {} (attempt {}) with {}s backoff",
                entry.url,
                entry.retry_count + 1,
                delay
            );
            self.store.requeue_entry(entry.id, error, delay).await
        } else {
            self.store.fail_entry(entry.id, error).await
        }
    }
}

/// Exponential backoff: `base * 2^retries`, shift capped against overflow
fn backoff_delay_secs(base_secs: u64, retries: i32) -> u64 {
    base_secs.saturating_mul(1u64 << retries.clamp(0, 16) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_retry() {
        assert_eq!(backoff_delay_secs(30, 0), 30);
        assert_eq!(backoff_delay_secs(30, 1), 60);
        assert_eq!(backoff_delay_secs(30, 3), 240);
    }

    #[test]
    fn test_backoff_shift_is_capped() {
        assert_eq!(backoff_delay_secs(30, 40), 30 * (1 << 16));
    }

    #[test]
    fn test_skip_reason_messages() {
        assert_eq!(SkipReason::RobotsDisallowed.message(), "robots.txt disallowed");
        assert_eq!(
            SkipReason::ContentUnchanged { page_id: 1 }.message(),
            "content unchanged"
        );
    }
}
