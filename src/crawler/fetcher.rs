use std::time::Duration;

use reqwest::redirect::Policy;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cli::config::CrawlerSettings;
use crate::error::EngineError;

/// A fetched page body with its status and content digest
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status_code: u16,
    pub body: String,
    pub content_hash: String,
    pub content_length: usize,
}

/// HTTP fetcher for page bodies: hard timeout, bounded redirects, fixed UA
pub struct Fetcher {
    http: reqwest::Client,
}

impl Fetcher {
    pub fn new(config: &CrawlerSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .redirect(Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { http })
    }

    /// Fetch a URL; any status of 400 or above is a [`EngineError::Fetch`]
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, EngineError> {
        debug!("Fetching {}", url);

        let response = self.http.get(url).send().await?;
        let status = response.status();

        if status.as_u16() >= 400 {
            return Err(EngineError::Fetch(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let body = response.text().await?;
        let content_hash = hash_content(body.as_bytes());

        Ok(FetchedPage {
            status_code: status.as_u16(),
            content_length: body.len(),
            body,
            content_hash,
        })
    }
}

/// Sha256 hex digest over a raw response body
pub fn hash_content(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::CrawlerSettings;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_hash_content_is_stable() {
        let a = hash_content(b"same body");
        let b = hash_content(b"same body");
        let c = hash_content(b"other body");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hi</html>"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&CrawlerSettings::default()).unwrap();
        let page = fetcher.fetch(&format!("{}/page", server.uri())).await.unwrap();

        assert_eq!(page.status_code, 200);
        assert_eq!(page.body, "<html>hi</html>");
        assert_eq!(page.content_hash, hash_content(b"<html>hi</html>"));
    }

    #[tokio::test]
    async fn test_fetch_client_error_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&CrawlerSettings::default()).unwrap();
        let result = fetcher.fetch(&format!("{}/missing", server.uri())).await;

        assert!(matches!(result, Err(EngineError::Fetch(_))));
    }
}
