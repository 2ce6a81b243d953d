use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::cli::config::IndexingSettings;
use crate::extract::ExtractedContent;
use crate::index::tokenizer::{bigrams, term_frequencies, tokenize};
use crate::index::FieldType;
use crate::storage::store::Store;

/// One inverted-index row for a (word, field) pair of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub word: String,
    pub field: FieldType,
    pub term_frequency: u32,
    pub positions: Vec<i32>,
}

/// One consecutive-token pair row for a page body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigramRow {
    pub word1: String,
    pub word2: String,
    pub frequency: u32,
    pub positions: Vec<i32>,
}

/// Tokenize one field and turn its term frequencies into index rows
pub fn field_rows(field: FieldType, text: &str) -> Vec<IndexRow> {
    let tokens = tokenize(text);
    term_frequencies(&tokens)
        .into_iter()
        .map(|(word, stats)| IndexRow {
            word,
            field,
            term_frequency: stats.count,
            positions: stats.positions,
        })
        .collect()
}

/// Distinct, sorted words across the field rows that were actually
/// written; document-frequency counts must only cover these, or a failed
/// field insert would inflate df forever (delete only decrements from
/// rows present in the index).
fn df_words(written_rows: &[Vec<IndexRow>]) -> Vec<String> {
    let mut words: Vec<String> = written_rows
        .iter()
        .flatten()
        .map(|row| row.word.clone())
        .collect();
    words.sort_unstable();
    words.dedup();
    words
}

/// Aggregate consecutive body-token pairs into bigram rows
pub fn bigram_rows(body_tokens: &[String]) -> Vec<BigramRow> {
    bigrams(body_tokens)
        .into_iter()
        .map(|((word1, word2), stats)| BigramRow {
            word1,
            word2,
            frequency: stats.count,
            positions: stats.positions,
        })
        .collect()
}

/// Turns extracted content into inverted-index rows and writes them.
pub struct Indexer {
    store: Arc<Store>,
    settings: IndexingSettings,
}

impl Indexer {
    pub fn new(store: Arc<Store>, settings: IndexingSettings) -> Self {
        Self { store, settings }
    }

    /// Index every field of a page, then flip its `is_indexed` flag.
    ///
    /// Existing rows for the page are deleted first so re-indexing after a
    /// content change never leaves stale entries behind. A failure on one
    /// field or on the bigram rows is logged and skipped; skipped fields
    /// contribute nothing to the document-frequency counts, and the flag
    /// is only set once all fields have been processed.
    pub async fn index_page(&self, page_id: i64, content: &ExtractedContent) -> Result<()> {
        self.store.delete_page_index(page_id).await?;

        // Image alt text is indexed with the body; headings already appear
        // in the extracted body text
        let body_source = if content.image_alts.is_empty() {
            content.body_text.clone()
        } else {
            format!("{} {}", content.body_text, content.image_alts.join(" "))
        };

        let fields = [
            (FieldType::Title, content.title.as_str()),
            (FieldType::Body, body_source.as_str()),
            (FieldType::Meta, content.meta_description.as_str()),
            (FieldType::Keywords, content.meta_keywords.as_str()),
        ];

        let mut written_rows: Vec<Vec<IndexRow>> = Vec::new();

        for (field, text) in fields {
            let rows = field_rows(field, text);
            if rows.is_empty() {
                continue;
            }

            match self.store.insert_index_rows(page_id, &rows).await {
                Ok(()) => written_rows.push(rows),
                Err(e) => warn!(
                    "Failed to index field {} of page {}: {}",
                    field.as_str(),
                    page_id,
                    e
                ),
            }
        }

        if self.settings.enable_bigrams {
            let rows = bigram_rows(&tokenize(&body_source));
            if !rows.is_empty() {
                if let Err(e) = self.store.insert_bigram_rows(page_id, &rows).await {
                    warn!("Failed to index bigrams of page {}: {}", page_id, e);
                }
            }
        }

        let indexed_words = df_words(&written_rows);
        self.store.increment_doc_frequencies(&indexed_words).await?;

        self.store.set_indexed(page_id, true).await?;
        debug!("Indexed page {} ({} distinct words)", page_id, indexed_words.len());

        Ok(())
    }

    /// Drop all index and bigram rows for a page and clear its flag.
    ///
    /// Raw body text is not persisted, so actual re-extraction is driven by
    /// a subsequent crawl of the page's URL.
    pub async fn reindex_page(&self, page_id: i64) -> Result<()> {
        self.store.delete_page_index(page_id).await?;
        self.store.set_indexed(page_id, false).await?;
        debug!("Cleared index for page {}, awaiting re-crawl", page_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_count_equals_term_frequency() {
        let rows = field_rows(
            FieldType::Body,
            "search engines crawl pages, engines index pages",
        );

        assert!(!rows.is_empty());
        for row in &rows {
            assert_eq!(row.positions.len(), row.term_frequency as usize);
        }

        let engines = rows.iter().find(|r| r.word == "engines").unwrap();
        assert_eq!(engines.term_frequency, 2);
        assert_eq!(engines.positions, vec![1, 4]);
    }

    #[test]
    fn test_field_rows_empty_text() {
        assert!(field_rows(FieldType::Meta, "").is_empty());
        assert!(field_rows(FieldType::Meta, "   ").is_empty());
    }

    #[test]
    fn test_df_words_cover_only_written_fields() {
        let title = field_rows(FieldType::Title, "rust guide");
        let body = field_rows(FieldType::Body, "rust crawler internals");

        // Body rows were never written (insert failed), so its words
        // must not enter the document-frequency update
        let words = df_words(&[title]);
        assert_eq!(words, vec!["guide", "rust"]);
        assert!(!words.contains(&"crawler".to_string()));

        let all = df_words(&[field_rows(FieldType::Title, "rust guide"), body]);
        assert_eq!(all, vec!["crawler", "guide", "internals", "rust"]);
    }

    #[test]
    fn test_bigram_rows_aggregate_pairs() {
        let tokens: Vec<String> = ["rust", "search", "rust", "search"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let rows = bigram_rows(&tokens);
        let rs = rows
            .iter()
            .find(|r| r.word1 == "rust" && r.word2 == "search")
            .unwrap();

        assert_eq!(rs.frequency, 2);
        assert_eq!(rs.positions, vec![0, 2]);
    }
}
