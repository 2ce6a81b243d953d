use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

/// A link discovered on a page, already resolved to an absolute URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    pub url: String,
    pub anchor_text: String,
    pub internal: bool,
}

/// Structured content pulled out of one fetched HTML document
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub title: String,
    pub meta_description: String,
    pub meta_keywords: String,
    pub headings: Vec<String>,
    pub body_text: String,
    pub links: Vec<ExtractedLink>,
    pub image_alts: Vec<String>,
}

/// Subtrees excluded from body text extraction
const EXCLUDED_TAGS: &[&str] = &["script", "style", "nav", "footer", "header", "aside"];

/// Parse raw HTML into title, meta fields, body text, links and image alts.
///
/// Link resolution failures are skipped silently; the rest of the page
/// still extracts.
pub fn extract(html: &str, base_url: &Url) -> ExtractedContent {
    let document = Html::parse_document(html);

    let title = first_text(&document, "title")
        .or_else(|| first_text(&document, "h1"))
        .unwrap_or_default();

    let meta_description = meta_content(&document, r#"meta[name="description"]"#)
        .or_else(|| meta_content(&document, r#"meta[property="og:description"]"#))
        .unwrap_or_default();

    let meta_keywords = meta_content(&document, r#"meta[name="keywords"]"#).unwrap_or_default();

    let heading_selector = Selector::parse("h1, h2, h3").unwrap();
    let headings: Vec<String> = document
        .select(&heading_selector)
        .map(|el| collapse(&el.text().collect::<String>()))
        .filter(|h| !h.is_empty())
        .collect();

    let body_text = body_text(&document);
    let links = extract_links(&document, base_url);

    let img_selector = Selector::parse("img[alt]").unwrap();
    let image_alts: Vec<String> = document
        .select(&img_selector)
        .filter_map(|el| el.value().attr("alt"))
        .map(|alt| alt.trim().to_string())
        .filter(|alt| !alt.is_empty())
        .collect();

    ExtractedContent {
        title,
        meta_description,
        meta_keywords,
        headings,
        body_text,
        links,
        image_alts,
    }
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).unwrap();
    document
        .select(&selector)
        .next()
        .map(|el| collapse(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).unwrap();
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| collapse(c))
        .filter(|c| !c.is_empty())
}

/// Collect visible text, pruning excluded subtrees before extraction
fn body_text(document: &Html) -> String {
    let body_selector = Selector::parse("body").unwrap();
    let mut out = String::new();

    if let Some(body) = document.select(&body_selector).next() {
        collect_text(body, &mut out);
    }

    collapse(&out)
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        match child.value() {
            scraper::Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            scraper::Node::Element(el) => {
                if EXCLUDED_TAGS.contains(&el.name()) {
                    continue;
                }
                if let Some(child_ref) = ElementRef::wrap(child) {
                    collect_text(child_ref, out);
                }
            }
            _ => {}
        }
    }
}

/// Resolve `a[href]` targets against the base URL, dropping fragments and
/// in-page duplicates
fn extract_links(document: &Html, base_url: &Url) -> Vec<ExtractedLink> {
    let selector = Selector::parse("a[href]").unwrap();
    let base_domain = base_url.host_str().unwrap_or_default().to_lowercase();

    let mut seen: HashSet<String> = HashSet::new();
    let mut links = Vec::new();

    for el in document.select(&selector) {
        let href = match el.value().attr("href") {
            Some(href) => href.trim(),
            None => continue,
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }

        let mut resolved = match base_url.join(href) {
            Ok(url) => url,
            Err(e) => {
                debug!("Skipping malformed href '{}': {}", href, e);
                continue;
            }
        };
        resolved.set_fragment(None);

        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }

        let url_string = resolved.to_string();
        if !seen.insert(url_string.clone()) {
            continue;
        }

        let internal = resolved
            .host_str()
            .map(|h| h.to_lowercase() == base_domain)
            .unwrap_or(false);

        links.push(ExtractedLink {
            url: url_string,
            anchor_text: collapse(&el.text().collect::<String>()),
            internal,
        });
    }

    links
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/docs/page").unwrap()
    }

    #[test]
    fn test_title_with_h1_fallback() {
        let content = extract("<html><head><title>Front Page</title></head><body><h1>Other</h1></body></html>", &base());
        assert_eq!(content.title, "Front Page");

        let content = extract("<html><body><h1>Only Heading</h1></body></html>", &base());
        assert_eq!(content.title, "Only Heading");
    }

    #[test]
    fn test_meta_description_og_fallback() {
        let html = r#"<head><meta property="og:description" content="og text"></head>"#;
        assert_eq!(extract(html, &base()).meta_description, "og text");

        let html = r#"<head>
            <meta name="description" content="standard text">
            <meta property="og:description" content="og text">
        </head>"#;
        assert_eq!(extract(html, &base()).meta_description, "standard text");
    }

    #[test]
    fn test_body_text_prunes_excluded_subtrees() {
        let html = r#"<body>
            <nav>menu items</nav>
            <p>visible <b>words</b></p>
            <script>var hidden = 1;</script>
            <footer>legal</footer>
        </body>"#;
        let content = extract(html, &base());
        assert_eq!(content.body_text, "visible words");
    }

    #[test]
    fn test_link_resolution_and_dedup() {
        let html = r##"<body>
            <a href="/about">About</a>
            <a href="about">About again</a>
            <a href="/about#team">Team</a>
            <a href="https://other.org/x">External</a>
            <a href="#top">Top</a>
            <a href="mailto:a@b.c">Mail</a>
        </body>"##;
        let content = extract(html, &base());

        let urls: Vec<&str> = content.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/about",
                "https://example.com/docs/about",
                "https://other.org/x",
            ]
        );
        assert!(content.links[0].internal);
        assert!(!content.links[2].internal);
        assert_eq!(content.links[0].anchor_text, "About");
    }

    #[test]
    fn test_malformed_href_skipped() {
        let html = r#"<body><a href="http://[bad">broken</a><a href="/ok">ok</a></body>"#;
        let content = extract(html, &base());
        assert_eq!(content.links.len(), 1);
        assert_eq!(content.links[0].url, "https://example.com/ok");
    }

    #[test]
    fn test_headings_and_alts() {
        let html = r#"<body>
            <h1>Main</h1><h2>Sub</h2><h3>Minor</h3>
            <img alt="a diagram" src="d.png"><img src="plain.png">
        </body>"#;
        let content = extract(html, &base());
        assert_eq!(content.headings, vec!["Main", "Sub", "Minor"]);
        assert_eq!(content.image_alts, vec!["a diagram"]);
    }
}
