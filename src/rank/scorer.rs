use std::collections::HashMap;

use crate::cli::config::RankingSettings;
use crate::index::FieldType;

/// A candidate document with its per-term, per-field raw frequencies
#[derive(Debug, Clone, Default)]
pub struct CandidateDoc {
    pub page_id: i64,
    pub authority: f64,
    pub term_fields: HashMap<String, HashMap<FieldType, u32>>,
}

/// A ranked candidate, ordered by descending final score
#[derive(Debug, Clone)]
pub struct RankedDoc {
    pub page_id: i64,
    pub score: f64,
    pub tfidf: f64,
    pub match_ratio: f64,
}

/// Multi-factor relevance scorer: TF-IDF, link authority and match ratio
/// combined under configurable weights.
pub struct Ranker {
    weights: RankingSettings,
}

impl Ranker {
    pub fn new(weights: RankingSettings) -> Self {
        Self { weights }
    }

    /// Score and sort candidates by descending final score.
    ///
    /// The sort is stable: ties keep the original candidate ordering.
    pub fn rank(
        &self,
        docs: Vec<CandidateDoc>,
        query_tokens: &[String],
        total_docs: u64,
        doc_freqs: &HashMap<String, i64>,
    ) -> Vec<RankedDoc> {
        let total = total_docs.max(1) as f64;

        let mut ranked: Vec<RankedDoc> = docs
            .into_iter()
            .map(|doc| {
                let tfidf = self.tfidf(&doc, query_tokens, total, doc_freqs);
                let match_ratio = match_ratio(&doc, query_tokens);
                let score = tfidf * self.weights.weight_tfidf
                    + doc.authority * self.weights.weight_authority
                    + match_ratio * self.weights.weight_match;

                RankedDoc {
                    page_id: doc.page_id,
                    score,
                    tfidf,
                    match_ratio,
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    /// `Σ log(1 + weightedTF) * log(total / df)` over the query tokens,
    /// where weightedTF applies the per-field boosts and a term missing
    /// from the frequency table defaults to df = 1.
    fn tfidf(
        &self,
        doc: &CandidateDoc,
        query_tokens: &[String],
        total_docs: f64,
        doc_freqs: &HashMap<String, i64>,
    ) -> f64 {
        query_tokens
            .iter()
            .map(|token| {
                let weighted_tf = weighted_tf(doc, token);
                if weighted_tf == 0.0 {
                    return 0.0;
                }

                let df = doc_freqs.get(token).copied().unwrap_or(1).max(1) as f64;
                (1.0 + weighted_tf).ln() * (total_docs / df).ln()
            })
            .sum()
    }
}

fn weighted_tf(doc: &CandidateDoc, token: &str) -> f64 {
    doc.term_fields
        .get(token)
        .map(|fields| {
            fields
                .iter()
                .map(|(field, &tf)| tf as f64 * field.boost())
                .sum()
        })
        .unwrap_or(0.0)
}

/// Distinct query tokens present in the document over the total token count
fn match_ratio(doc: &CandidateDoc, query_tokens: &[String]) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }

    let matched = query_tokens
        .iter()
        .filter(|token| weighted_tf(doc, token) > 0.0)
        .count();

    matched as f64 / query_tokens.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(page_id: i64, authority: f64, terms: &[(&str, FieldType, u32)]) -> CandidateDoc {
        let mut term_fields: HashMap<String, HashMap<FieldType, u32>> = HashMap::new();
        for &(term, field, tf) in terms {
            term_fields
                .entry(term.to_string())
                .or_default()
                .insert(field, tf);
        }
        CandidateDoc {
            page_id,
            authority,
            term_fields,
        }
    }

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn ranker() -> Ranker {
        Ranker::new(RankingSettings::default())
    }

    #[test]
    fn test_title_boost_outranks_body() {
        let docs = vec![
            doc(1, 0.0, &[("rust", FieldType::Body, 2)]),
            doc(2, 0.0, &[("rust", FieldType::Title, 2)]),
        ];

        let ranked = ranker().rank(docs, &tokens(&["rust"]), 100, &HashMap::new());
        assert_eq!(ranked[0].page_id, 2);
    }

    #[test]
    fn test_match_ratio() {
        let d = doc(1, 0.0, &[("rust", FieldType::Body, 1)]);
        let ranked = ranker().rank(vec![d], &tokens(&["rust", "web"]), 10, &HashMap::new());

        assert!((ranked[0].match_ratio - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_missing_df_defaults_to_one() {
        let d = doc(1, 0.0, &[("obscure", FieldType::Body, 1)]);
        let ranked = ranker().rank(vec![d], &tokens(&["obscure"]), 10, &HashMap::new());

        // df = 1 gives idf = ln(10), tf part = ln(2)
        let expected = (2.0_f64).ln() * (10.0_f64).ln();
        assert!((ranked[0].tfidf - expected).abs() < 1e-9);
    }

    #[test]
    fn test_rarer_terms_score_higher() {
        let mut doc_freqs = HashMap::new();
        doc_freqs.insert("common".to_string(), 90_i64);
        doc_freqs.insert("rare".to_string(), 2_i64);

        let docs = vec![
            doc(1, 0.0, &[("common", FieldType::Body, 3)]),
            doc(2, 0.0, &[("rare", FieldType::Body, 3)]),
        ];

        let ranked = ranker().rank(docs, &tokens(&["common", "rare"]), 100, &doc_freqs);
        assert_eq!(ranked[0].page_id, 2);
    }

    #[test]
    fn test_authority_breaks_textual_parity() {
        let docs = vec![
            doc(1, 0.1, &[("rust", FieldType::Body, 1)]),
            doc(2, 0.9, &[("rust", FieldType::Body, 1)]),
        ];

        let ranked = ranker().rank(docs, &tokens(&["rust"]), 10, &HashMap::new());
        assert_eq!(ranked[0].page_id, 2);
    }

    #[test]
    fn test_ties_keep_candidate_order() {
        let docs = vec![
            doc(7, 0.0, &[("rust", FieldType::Body, 1)]),
            doc(3, 0.0, &[("rust", FieldType::Body, 1)]),
            doc(9, 0.0, &[("rust", FieldType::Body, 1)]),
        ];

        let ranked = ranker().rank(docs, &tokens(&["rust"]), 10, &HashMap::new());
        let order: Vec<i64> = ranked.iter().map(|d| d.page_id).collect();
        assert_eq!(order, vec![7, 3, 9]);
    }
}
