use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use crate::cli::config::StorageSettings;
use crate::index::indexer::{BigramRow, IndexRow};

/// Crawl queue entry lifecycle: PENDING -> CRAWLING -> {COMPLETED, FAILED}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Crawling,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Crawling => "CRAWLING",
            QueueStatus::Completed => "COMPLETED",
            QueueStatus::Failed => "FAILED",
        }
    }
}

/// A persisted page row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PageRecord {
    pub id: i64,
    pub url: String,
    pub domain: String,
    pub content_hash: String,
    pub title: String,
    pub meta_description: String,
    pub status_code: i32,
    pub is_indexed: bool,
    pub authority_score: f64,
    pub content_length: i32,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Fields written on a page upsert after a successful fetch
#[derive(Debug, Clone)]
pub struct NewPage {
    pub url: String,
    pub domain: String,
    pub content_hash: String,
    pub title: String,
    pub meta_description: String,
    pub status_code: i32,
    pub content_length: i32,
}

/// A claimed crawl queue entry
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueEntry {
    pub id: i64,
    pub url: String,
    pub priority: i32,
    pub depth: i32,
    pub parent_url: Option<String>,
    pub retry_count: i32,
}

/// An outbound link to persist for a crawled page
#[derive(Debug, Clone)]
pub struct NewLink {
    pub to_url: String,
    pub anchor_text: String,
    pub internal: bool,
}

/// A candidate page matched against the query tokens
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CandidateRow {
    pub page_id: i64,
    pub matched_terms: i64,
    pub weighted_tf: f64,
}

/// One inverted-index posting loaded for ranking
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostingRow {
    pub page_id: i64,
    pub word: String,
    pub field: String,
    pub term_frequency: i32,
}

/// An autocomplete suggestion
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Suggestion {
    pub term: String,
    pub frequency: i64,
}

/// Rows per chunked index insert; 5 binds per row keeps each statement
/// far below the Postgres bind-parameter ceiling
const INDEX_INSERT_CHUNK: usize = 500;

/// PostgreSQL store for pages, links, the crawl queue, the inverted index
/// and the query-side tables.
pub struct Store {
    pool: Pool<Postgres>,
}

impl Store {
    pub async fn connect(settings: &StorageSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.database_url)
            .await
            .context(format!(
                "Failed to connect to PostgreSQL: {}",
                settings.database_url
            ))?;

        let store = Self { pool };
        store.ensure_schema().await?;

        debug!("Connected to PostgreSQL store");

        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS pages (
                id BIGSERIAL PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                domain TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                meta_description TEXT NOT NULL DEFAULT '',
                status_code INT NOT NULL DEFAULT 0,
                is_indexed BOOLEAN NOT NULL DEFAULT FALSE,
                authority_score DOUBLE PRECISION NOT NULL DEFAULT 0,
                content_length INT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE TABLE IF NOT EXISTS crawl_queue (
                id BIGSERIAL PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                priority INT NOT NULL,
                depth INT NOT NULL DEFAULT 0,
                parent_url TEXT,
                status TEXT NOT NULL DEFAULT 'PENDING',
                retry_count INT NOT NULL DEFAULT 0,
                scheduled_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                error TEXT
            )",
            "CREATE INDEX IF NOT EXISTS crawl_queue_claim_idx
                ON crawl_queue (status, priority, scheduled_at)",
            "CREATE TABLE IF NOT EXISTS links (
                from_page BIGINT NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
                to_url TEXT NOT NULL,
                anchor_text TEXT NOT NULL DEFAULT '',
                link_type TEXT NOT NULL,
                UNIQUE (from_page, to_url)
            )",
            "CREATE INDEX IF NOT EXISTS links_to_url_idx ON links (to_url)",
            "CREATE TABLE IF NOT EXISTS inverted_index (
                word TEXT NOT NULL,
                page_id BIGINT NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
                field TEXT NOT NULL,
                term_frequency INT NOT NULL,
                positions INTEGER[] NOT NULL,
                UNIQUE (word, page_id, field)
            )",
            "CREATE INDEX IF NOT EXISTS inverted_index_word_idx ON inverted_index (word)",
            "CREATE TABLE IF NOT EXISTS bigrams (
                word1 TEXT NOT NULL,
                word2 TEXT NOT NULL,
                page_id BIGINT NOT NULL REFERENCES pages(id) ON DELETE CASCADE,
                frequency INT NOT NULL,
                positions INTEGER[] NOT NULL,
                UNIQUE (word1, word2, page_id)
            )",
            "CREATE TABLE IF NOT EXISTS document_frequency (
                word TEXT PRIMARY KEY,
                doc_count BIGINT NOT NULL DEFAULT 0
            )",
            "CREATE TABLE IF NOT EXISTS suggestions (
                prefix TEXT NOT NULL,
                term TEXT NOT NULL,
                frequency BIGINT NOT NULL DEFAULT 1,
                last_seen TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (prefix, term)
            )",
            "CREATE TABLE IF NOT EXISTS search_log (
                id BIGSERIAL PRIMARY KEY,
                query TEXT NOT NULL,
                result_count INT NOT NULL,
                searched_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to bootstrap schema")?;
        }

        debug!("Ensured schema exists");

        Ok(())
    }

    // ---- crawl queue ----

    /// Insert a URL into the crawl queue.
    ///
    /// Re-inserting an existing URL only ever lowers its priority (lower
    /// number wins) and resets its schedule; it never raises priority.
    pub async fn enqueue(
        &self,
        url: &str,
        priority: i32,
        depth: i32,
        parent_url: Option<&str>,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO crawl_queue (url, priority, depth, parent_url, status, scheduled_at)
             VALUES ($1, $2, $3, $4, 'PENDING', NOW())
             ON CONFLICT (url) DO UPDATE
             SET priority = LEAST(crawl_queue.priority, EXCLUDED.priority),
                 scheduled_at = NOW()
             RETURNING id",
        )
        .bind(url)
        .bind(priority)
        .bind(depth)
        .bind(parent_url)
        .fetch_one(&self.pool)
        .await
        .context("Failed to enqueue URL")?;

        debug!("Enqueued {} with priority {}", url, priority);

        Ok(id)
    }

    /// Atomically claim up to `batch_size` pending entries and mark them
    /// CRAWLING. `FOR UPDATE SKIP LOCKED` guarantees two concurrent
    /// callers never claim the same row.
    pub async fn claim_pending(&self, batch_size: i64) -> Result<Vec<QueueEntry>> {
        let entries = sqlx::query_as::<_, QueueEntry>(
            "UPDATE crawl_queue SET status = $2
             WHERE id IN (
                 SELECT id FROM crawl_queue
                 WHERE status = $3 AND scheduled_at <= NOW()
                 ORDER BY priority ASC, scheduled_at ASC
                 LIMIT $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, url, priority, depth, parent_url, retry_count",
        )
        .bind(batch_size)
        .bind(QueueStatus::Crawling.as_str())
        .bind(QueueStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await
        .context("Failed to claim pending queue entries")?;

        Ok(entries)
    }

    pub async fn complete_entry(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE crawl_queue SET status = $2, error = NULL WHERE id = $1")
            .bind(id)
            .bind(QueueStatus::Completed.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to complete queue entry")?;

        Ok(())
    }

    /// Re-queue a failed entry with an incremented retry counter and a
    /// backoff delay before it becomes claimable again
    pub async fn requeue_entry(&self, id: i64, error: &str, delay_secs: u64) -> Result<()> {
        sqlx::query(
            "UPDATE crawl_queue
             SET status = $4,
                 retry_count = retry_count + 1,
                 error = $2,
                 scheduled_at = NOW() + make_interval(secs => $3)
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(delay_secs as f64)
        .bind(QueueStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to requeue entry")?;

        Ok(())
    }

    /// Mark an entry FAILED; FAILED is terminal, there is no automatic
    /// retry transition out of it
    pub async fn fail_entry(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE crawl_queue
             SET status = $3, retry_count = retry_count + 1, error = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(QueueStatus::Failed.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to mark queue entry failed")?;

        Ok(())
    }

    // ---- pages and links ----

    pub async fn upsert_page(&self, page: &NewPage) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO pages
                 (url, domain, content_hash, title, meta_description, status_code, content_length)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (url) DO UPDATE
             SET domain = EXCLUDED.domain,
                 content_hash = EXCLUDED.content_hash,
                 title = EXCLUDED.title,
                 meta_description = EXCLUDED.meta_description,
                 status_code = EXCLUDED.status_code,
                 content_length = EXCLUDED.content_length,
                 updated_at = NOW()
             RETURNING id",
        )
        .bind(&page.url)
        .bind(&page.domain)
        .bind(&page.content_hash)
        .bind(&page.title)
        .bind(&page.meta_description)
        .bind(page.status_code)
        .bind(page.content_length)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert page")?;

        Ok(id)
    }

    pub async fn page_by_url(&self, url: &str) -> Result<Option<PageRecord>> {
        let page = sqlx::query_as::<_, PageRecord>(
            "SELECT id, url, domain, content_hash, title, meta_description,
                    status_code, is_indexed, authority_score, content_length, updated_at
             FROM pages WHERE url = $1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up page by URL")?;

        Ok(page)
    }

    pub async fn pages_by_ids(&self, ids: &[i64]) -> Result<Vec<PageRecord>> {
        let pages = sqlx::query_as::<_, PageRecord>(
            "SELECT id, url, domain, content_hash, title, meta_description,
                    status_code, is_indexed, authority_score, content_length, updated_at
             FROM pages WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load pages by id")?;

        Ok(pages)
    }

    pub async fn set_indexed(&self, page_id: i64, indexed: bool) -> Result<()> {
        sqlx::query("UPDATE pages SET is_indexed = $2, updated_at = NOW() WHERE id = $1")
            .bind(page_id)
            .bind(indexed)
            .execute(&self.pool)
            .await
            .context("Failed to update is_indexed flag")?;

        Ok(())
    }

    /// Replace the outbound link set of a page.
    ///
    /// Edges are keyed by target URL rather than target page id, so the
    /// link graph stays complete for targets that have not been crawled
    /// yet; the authority engine resolves targets at computation time.
    pub async fn replace_links(&self, from_page: i64, links: &[NewLink]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin link txn")?;

        sqlx::query("DELETE FROM links WHERE from_page = $1")
            .bind(from_page)
            .execute(&mut *tx)
            .await
            .context("Failed to clear existing links")?;

        for chunk in links.chunks(INDEX_INSERT_CHUNK) {
            let mut builder = sqlx::QueryBuilder::<Postgres>::new(
                "INSERT INTO links (from_page, to_url, anchor_text, link_type) ",
            );
            builder.push_values(chunk, |mut row, link| {
                row.push_bind(from_page)
                    .push_bind(&link.to_url)
                    .push_bind(&link.anchor_text)
                    .push_bind(if link.internal { "internal" } else { "external" });
            });
            builder.push(" ON CONFLICT (from_page, to_url) DO NOTHING");

            builder
                .build()
                .execute(&mut *tx)
                .await
                .context("Failed to insert links")?;
        }

        tx.commit().await.context("Failed to commit link txn")?;

        debug!("Persisted {} links for page {}", links.len(), from_page);

        Ok(())
    }

    // ---- inverted index ----

    /// Upsert index rows for a page in fixed-size chunks; a conflict
    /// overwrites frequency and positions rather than adding to them
    pub async fn insert_index_rows(&self, page_id: i64, rows: &[IndexRow]) -> Result<()> {
        for chunk in rows.chunks(INDEX_INSERT_CHUNK) {
            let mut builder = sqlx::QueryBuilder::<Postgres>::new(
                "INSERT INTO inverted_index (word, page_id, field, term_frequency, positions) ",
            );
            builder.push_values(chunk, |mut row, entry| {
                row.push_bind(&entry.word)
                    .push_bind(page_id)
                    .push_bind(entry.field.as_str())
                    .push_bind(entry.term_frequency as i32)
                    .push_bind(&entry.positions);
            });
            builder.push(
                " ON CONFLICT (word, page_id, field) DO UPDATE
                  SET term_frequency = EXCLUDED.term_frequency,
                      positions = EXCLUDED.positions",
            );

            builder
                .build()
                .execute(&self.pool)
                .await
                .context("Failed to insert index rows")?;
        }

        Ok(())
    }

    pub async fn insert_bigram_rows(&self, page_id: i64, rows: &[BigramRow]) -> Result<()> {
        for chunk in rows.chunks(INDEX_INSERT_CHUNK) {
            let mut builder = sqlx::QueryBuilder::<Postgres>::new(
                "INSERT INTO bigrams (word1, word2, page_id, frequency, positions) ",
            );
            builder.push_values(chunk, |mut row, entry| {
                row.push_bind(&entry.word1)
                    .push_bind(&entry.word2)
                    .push_bind(page_id)
                    .push_bind(entry.frequency as i32)
                    .push_bind(&entry.positions);
            });
            builder.push(
                " ON CONFLICT (word1, word2, page_id) DO UPDATE
                  SET frequency = EXCLUDED.frequency,
                      positions = EXCLUDED.positions",
            );

            builder
                .build()
                .execute(&self.pool)
                .await
                .context("Failed to insert bigram rows")?;
        }

        Ok(())
    }

    /// Delete all index and bigram rows for a page, adjusting document
    /// frequencies for the words that disappear
    pub async fn delete_page_index(&self, page_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin index txn")?;

        sqlx::query(
            "UPDATE document_frequency df
             SET doc_count = GREATEST(df.doc_count - 1, 0)
             FROM (SELECT DISTINCT word FROM inverted_index WHERE page_id = $1) w
             WHERE df.word = w.word",
        )
        .bind(page_id)
        .execute(&mut *tx)
        .await
        .context("Failed to decrement document frequencies")?;

        sqlx::query("DELETE FROM inverted_index WHERE page_id = $1")
            .bind(page_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete index rows")?;

        sqlx::query("DELETE FROM bigrams WHERE page_id = $1")
            .bind(page_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete bigram rows")?;

        tx.commit().await.context("Failed to commit index txn")?;

        Ok(())
    }

    pub async fn increment_doc_frequencies(&self, words: &[String]) -> Result<()> {
        if words.is_empty() {
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO document_frequency (word, doc_count)
             SELECT unnest($1::text[]), 1
             ON CONFLICT (word) DO UPDATE
             SET doc_count = document_frequency.doc_count + 1",
        )
        .bind(words)
        .execute(&self.pool)
        .await
        .context("Failed to increment document frequencies")?;

        Ok(())
    }

    pub async fn doc_frequencies(&self, words: &[String]) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT word, doc_count FROM document_frequency WHERE word = ANY($1)",
        )
        .bind(words)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load document frequencies")?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("word"), row.get::<i64, _>("doc_count")))
            .collect())
    }

    pub async fn count_indexed_pages(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages WHERE is_indexed")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count indexed pages")?;

        Ok(count)
    }

    // ---- query side ----

    /// Pages matching at least `min_match` distinct query tokens, ordered
    /// by (matched terms desc, field-weighted term frequency desc)
    pub async fn candidate_pages(
        &self,
        tokens: &[String],
        min_match: i64,
        limit: i64,
    ) -> Result<Vec<CandidateRow>> {
        let candidates = sqlx::query_as::<_, CandidateRow>(
            "SELECT i.page_id,
                    COUNT(DISTINCT i.word) AS matched_terms,
                    SUM(i.term_frequency
                        * CASE i.field
                              WHEN 'title' THEN 3.0
                              WHEN 'meta' THEN 2.0
                              WHEN 'keywords' THEN 1.5
                              ELSE 1.0
                          END)::double precision AS weighted_tf
             FROM inverted_index i
             JOIN pages p ON p.id = i.page_id AND p.is_indexed
             WHERE i.word = ANY($1)
             GROUP BY i.page_id
             HAVING COUNT(DISTINCT i.word) >= $2
             ORDER BY matched_terms DESC, weighted_tf DESC
             LIMIT $3",
        )
        .bind(tokens)
        .bind(min_match)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to retrieve candidate pages")?;

        Ok(candidates)
    }

    pub async fn postings_for(
        &self,
        page_ids: &[i64],
        tokens: &[String],
    ) -> Result<Vec<PostingRow>> {
        let postings = sqlx::query_as::<_, PostingRow>(
            "SELECT page_id, word, field, term_frequency
             FROM inverted_index
             WHERE page_id = ANY($1) AND word = ANY($2)",
        )
        .bind(page_ids)
        .bind(tokens)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load postings")?;

        Ok(postings)
    }

    // ---- authority ----

    pub async fn indexed_page_ids(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM pages WHERE is_indexed")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load indexed page ids")?;

        Ok(ids)
    }

    /// Link edges with both endpoints resolvable to indexed pages,
    /// resolving targets by URL
    pub async fn indexed_link_edges(&self) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query(
            "SELECT l.from_page, p.id AS to_page
             FROM links l
             JOIN pages p ON p.url = l.to_url
             WHERE p.is_indexed",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load link edges")?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<i64, _>("from_page"), row.get::<i64, _>("to_page")))
            .collect())
    }

    /// Persist the whole authority vector in one statement so a failure
    /// never leaves a partially updated score set behind
    pub async fn persist_authority_scores(&self, scores: &[(i64, f64)]) -> Result<()> {
        let ids: Vec<i64> = scores.iter().map(|(id, _)| *id).collect();
        let values: Vec<f64> = scores.iter().map(|(_, score)| *score).collect();

        sqlx::query(
            "UPDATE pages
             SET authority_score = v.score, updated_at = NOW()
             FROM (SELECT unnest($1::bigint[]) AS id,
                          unnest($2::double precision[]) AS score) v
             WHERE pages.id = v.id",
        )
        .bind(&ids)
        .bind(&values)
        .execute(&self.pool)
        .await
        .context("Failed to persist authority scores")?;

        Ok(())
    }

    // ---- analytics and suggestions ----

    pub async fn log_search(&self, query: &str, result_count: i64) -> Result<()> {
        sqlx::query("INSERT INTO search_log (query, result_count) VALUES ($1, $2)")
            .bind(query)
            .bind(result_count as i32)
            .execute(&self.pool)
            .await
            .context("Failed to log search")?;

        Ok(())
    }

    pub async fn upsert_suggestion(&self, prefix: &str, term: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO suggestions (prefix, term, frequency, last_seen)
             VALUES ($1, $2, 1, NOW())
             ON CONFLICT (prefix, term) DO UPDATE
             SET frequency = suggestions.frequency + 1, last_seen = NOW()",
        )
        .bind(prefix)
        .bind(term)
        .execute(&self.pool)
        .await
        .context("Failed to upsert suggestion")?;

        Ok(())
    }

    pub async fn suggestions_for(&self, prefix: &str, limit: i64) -> Result<Vec<Suggestion>> {
        let suggestions = sqlx::query_as::<_, Suggestion>(
            "SELECT term, frequency FROM suggestions
             WHERE prefix = $1
             ORDER BY frequency DESC, last_seen DESC
             LIMIT $2",
        )
        .bind(prefix)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load suggestions")?;

        Ok(suggestions)
    }
}
