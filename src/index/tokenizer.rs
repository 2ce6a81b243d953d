use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// Stop words dropped during tokenization
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from",
    "has", "have", "he", "her", "his", "if", "in", "into", "is", "it", "its",
    "no", "not", "of", "on", "or", "she", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "to", "was", "were", "will",
    "with", "you", "your",
];

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap())
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(https?://\S+|www\.\S+)").unwrap())
}

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Normalize free text into index/query tokens.
///
/// Lowercases, strips HTML tags and URLs, drops punctuation, then splits on
/// whitespace. Tokens shorter than 2 characters, stop words and purely
/// numeric tokens are discarded.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let no_tags = tag_re().replace_all(&lowered, " ");
    let no_urls = url_re().replace_all(&no_tags, " ");

    let cleaned: String = no_urls
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() >= 2)
        .filter(|t| !is_stop_word(t))
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .map(|t| t.to_string())
        .collect()
}

/// Term frequency and zero-based positions of one token within a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermStats {
    pub count: u32,
    pub positions: Vec<i32>,
}

/// Count occurrences per token, recording the zero-based index of each one
pub fn term_frequencies(tokens: &[String]) -> HashMap<String, TermStats> {
    let mut freqs: HashMap<String, TermStats> = HashMap::new();

    for (pos, token) in tokens.iter().enumerate() {
        let entry = freqs.entry(token.clone()).or_insert_with(|| TermStats {
            count: 0,
            positions: Vec::new(),
        });
        entry.count += 1;
        entry.positions.push(pos as i32);
    }

    freqs
}

/// Normalize a raw user query: lowercase, trim, collapse internal whitespace.
///
/// Stop-word removal happens later, during tokenization.
pub fn normalize_query(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract consecutive-token pairs with per-pair frequency and positions.
///
/// Positions are the zero-based index of the pair's first token.
pub fn bigrams(tokens: &[String]) -> HashMap<(String, String), TermStats> {
    let mut pairs: HashMap<(String, String), TermStats> = HashMap::new();

    for (pos, window) in tokens.windows(2).enumerate() {
        let key = (window[0].clone(), window[1].clone());
        let entry = pairs.entry(key).or_insert_with(|| TermStats {
            count: 0,
            positions: Vec::new(),
        });
        entry.count += 1;
        entry.positions.push(pos as i32);
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_word_table_is_sorted() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);
    }

    #[test]
    fn test_tokenize_drops_noise() {
        assert_eq!(
            tokenize("The Quick, Brown Fox! http://x.com"),
            vec!["quick", "brown", "fox"]
        );
    }

    #[test]
    fn test_tokenize_strips_tags_and_numbers() {
        assert_eq!(
            tokenize("<p>rust 2024 survey</p>"),
            vec!["rust", "survey"]
        );
    }

    #[test]
    fn test_tokenize_minimum_length() {
        // Single characters are dropped even when not stop words
        assert_eq!(tokenize("x y rust"), vec!["rust"]);
    }

    #[test]
    fn test_term_frequencies_positions() {
        let tokens: Vec<String> = ["quick", "fox", "quick"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let freqs = term_frequencies(&tokens);

        let quick = &freqs["quick"];
        assert_eq!(quick.count, 2);
        assert_eq!(quick.positions, vec![0, 2]);

        // Position-list length always matches the recorded frequency
        for stats in freqs.values() {
            assert_eq!(stats.positions.len(), stats.count as usize);
        }
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  The   QUICK fox "), "the quick fox");
    }

    #[test]
    fn test_bigrams() {
        let tokens: Vec<String> = ["rust", "web", "rust", "web"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let pairs = bigrams(&tokens);

        let rw = &pairs[&("rust".to_string(), "web".to_string())];
        assert_eq!(rw.count, 2);
        assert_eq!(rw.positions, vec![0, 2]);
        assert!(pairs.contains_key(&("web".to_string(), "rust".to_string())));
    }
}
