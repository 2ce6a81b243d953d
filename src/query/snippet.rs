/// How far into the text candidate snippet windows are considered
const SCAN_LIMIT: usize = 500;

/// Build a highlighted snippet around the densest cluster of query tokens.
///
/// Candidate window starts are offset 0 plus every token match within the
/// first 500 characters; the window maximizing the number of distinct
/// matched tokens wins, first offset on ties. Matched occurrences inside
/// the window are wrapped in `**` emphasis markers, and an ellipsis marks
/// a window that does not touch the start or end of the text.
pub fn generate_snippet(text: &str, query_tokens: &[String], max_length: usize) -> String {
    if text.is_empty() {
        return String::new();
    }

    let lowered = text.to_lowercase();
    let tokens: Vec<String> = query_tokens
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();

    // Lowercasing can shift byte offsets for some scripts, so clamp both
    // ends against the original text before slicing it
    let start = floor_boundary(text, best_window_start(&lowered, &tokens, max_length));
    let end = floor_boundary(text, (start + max_length).min(text.len()));

    let window = &text[start..end];
    let mut snippet = emphasize(window, &tokens);

    if start > 0 {
        snippet = format!("...{}", snippet);
    }
    if end < text.len() {
        snippet.push_str("...");
    }

    snippet
}

/// Pick the candidate start offset whose window covers the most distinct
/// query tokens; the first such offset wins ties.
fn best_window_start(lowered: &str, tokens: &[String], max_length: usize) -> usize {
    let scan_limit = floor_boundary(lowered, SCAN_LIMIT.min(lowered.len()));

    let mut candidates: Vec<usize> = vec![0];
    for token in tokens {
        let mut from = 0;
        while let Some(found) = lowered[from..scan_limit.max(from)].find(token.as_str()) {
            let offset = from + found;
            if offset >= scan_limit {
                break;
            }
            candidates.push(offset);
            from = offset + token.len();
        }
    }
    candidates.sort_unstable();
    candidates.dedup();

    let mut best_start = 0;
    let mut best_hits = 0;

    for &start in &candidates {
        let start = floor_boundary(lowered, start);
        let end = floor_boundary(lowered, (start + max_length).min(lowered.len()));
        let window = &lowered[start..end];

        let hits = tokens.iter().filter(|t| window.contains(t.as_str())).count();
        if hits > best_hits {
            best_hits = hits;
            best_start = start;
        }
    }

    best_start
}

/// Wrap every token occurrence in `**` markers, earliest match first,
/// preferring the longest token when two start at the same offset
fn emphasize(window: &str, tokens: &[String]) -> String {
    let lowered = window.to_lowercase();
    if lowered.len() != window.len() {
        // Offsets in the lowered copy no longer line up; skip emphasis
        return window.to_string();
    }
    let mut out = String::with_capacity(window.len());
    let mut cursor = 0;

    while cursor < lowered.len() {
        let mut next: Option<(usize, usize)> = None;

        for token in tokens {
            if let Some(found) = lowered[cursor..].find(token.as_str()) {
                let start = cursor + found;
                let wins = match next {
                    None => true,
                    Some((s, len)) => start < s || (start == s && token.len() > len),
                };
                if wins {
                    next = Some((start, token.len()));
                }
            }
        }

        match next {
            Some((start, len)) => {
                out.push_str(&window[cursor..start]);
                out.push_str("**");
                out.push_str(&window[start..start + len]);
                out.push_str("**");
                cursor = start + len;
            }
            None => {
                out.push_str(&window[cursor..]);
                break;
            }
        }
    }

    out
}

/// Clamp a byte offset down to the nearest char boundary
fn floor_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_short_text_highlights_without_ellipsis() {
        let snippet = generate_snippet("The quick brown fox", &tokens(&["quick"]), 200);
        assert_eq!(snippet, "The **quick** brown fox");
    }

    #[test]
    fn test_case_insensitive_match_keeps_original_case() {
        let snippet = generate_snippet("Rust is fast. RUST is safe.", &tokens(&["rust"]), 200);
        assert_eq!(snippet, "**Rust** is fast. **RUST** is safe.");
    }

    #[test]
    fn test_trailing_ellipsis_when_window_truncates() {
        let text = "alpha beta gamma delta epsilon";
        let snippet = generate_snippet(text, &tokens(&["alpha"]), 10);
        assert_eq!(snippet, "**alpha** beta...");
    }

    #[test]
    fn test_window_moves_to_token_cluster() {
        let filler = "x".repeat(120);
        let text = format!("{} rust engine here", filler);
        let snippet = generate_snippet(&text, &tokens(&["rust", "engine"]), 40);

        assert!(snippet.starts_with("..."));
        assert!(snippet.contains("**rust**"));
        assert!(snippet.contains("**engine**"));
    }

    #[test]
    fn test_no_token_match_keeps_window_at_start() {
        let snippet = generate_snippet("plain description text", &tokens(&["missing"]), 200);
        assert_eq!(snippet, "plain description text");
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(generate_snippet("", &tokens(&["x"]), 200), "");
    }
}
