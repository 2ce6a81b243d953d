use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::cli::config::RobotsSettings;
use crate::storage::cache::TtlCache;

/// Parsed robots.txt rules for one domain
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RobotsRules {
    pub disallow: Vec<String>,
    pub allow: Vec<String>,
    pub crawl_delay_secs: u64,
}

struct CachedRules {
    rules: RobotsRules,
    expires_at: Instant,
}

/// Politeness gate: robots.txt evaluation plus per-domain crawl delay.
///
/// Rules are cached in two tiers, an in-process map and a redis record,
/// both with a 24h TTL. The gate is an explicit state object owned by the
/// crawler, not a module-level singleton; the per-domain delay is
/// serialized through a domain mutex so two workers hitting the same
/// domain in one batch cannot both observe a stale last-fetch stamp.
pub struct PolitenessGate {
    http: reqwest::Client,
    cache: Arc<TtlCache>,
    config: RobotsSettings,
    rules: Mutex<HashMap<String, CachedRules>>,
    throttles: Mutex<HashMap<String, Arc<Mutex<Option<Instant>>>>>,
}

impl PolitenessGate {
    pub fn new(config: RobotsSettings, cache: Arc<TtlCache>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            cache,
            config,
            rules: Mutex::new(HashMap::new()),
            throttles: Mutex::new(HashMap::new()),
        })
    }

    /// Return the robots rules for a domain, fetching and caching on a miss.
    ///
    /// Any failure along the way fails open: everything allowed, no delay.
    pub async fn rules_for(&self, domain: &str) -> RobotsRules {
        {
            let cached = self.rules.lock().await;
            if let Some(entry) = cached.get(domain) {
                if entry.expires_at > Instant::now() {
                    return entry.rules.clone();
                }
            }
        }

        let cache_key = format!("robots:{}", domain);

        match self.cache.get_json::<RobotsRules>(&cache_key).await {
            Ok(Some(rules)) => {
                self.remember(domain, rules.clone()).await;
                return rules;
            }
            Ok(None) => {}
            Err(e) => debug!("Robots cache read failed for {}: {}", domain, e),
        }

        let rules = match self.fetch_rules(domain).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!("robots.txt fetch failed for {}, failing open: {}", domain, e);
                RobotsRules::default()
            }
        };

        if let Err(e) = self
            .cache
            .set_json(&cache_key, &rules, self.config.cache_ttl_secs)
            .await
        {
            debug!("Robots cache write failed for {}: {}", domain, e);
        }
        self.remember(domain, rules.clone()).await;

        rules
    }

    async fn remember(&self, domain: &str, rules: RobotsRules) {
        let mut cached = self.rules.lock().await;
        cached.insert(
            domain.to_string(),
            CachedRules {
                rules,
                expires_at: Instant::now() + Duration::from_secs(self.config.cache_ttl_secs),
            },
        );
    }

    async fn fetch_rules(&self, domain: &str) -> anyhow::Result<RobotsRules> {
        let robots_url = format!("https://{}/robots.txt", domain);
        debug!("Fetching {}", robots_url);

        let response = self.http.get(&robots_url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("robots.txt returned status {}", response.status());
        }

        let body = response.text().await?;
        Ok(parse_robots(&body, &self.config.user_agent))
    }

    /// Block until the domain's crawl delay has elapsed since its last fetch.
    ///
    /// The domain mutex is held across the sleep, so concurrent workers on
    /// the same domain queue up behind each other.
    pub async fn enforce_delay(&self, domain: &str, delay_secs: u64) {
        let throttle = {
            let mut throttles = self.throttles.lock().await;
            throttles
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone()
        };

        let mut last_fetch = throttle.lock().await;

        if let Some(last) = *last_fetch {
            let delay = Duration::from_secs(delay_secs);
            let elapsed = last.elapsed();
            if elapsed < delay {
                let remaining = delay - elapsed;
                debug!("Delaying {:?} before next fetch to {}", remaining, domain);
                tokio::time::sleep(remaining).await;
            }
        }

        *last_fetch = Some(Instant::now());
    }
}

/// Parse robots.txt text into disallow/allow prefixes and a crawl delay.
///
/// Honors the `*` group and any group naming our user agent; later groups
/// merge into the rule set.
pub fn parse_robots(body: &str, user_agent: &str) -> RobotsRules {
    let agent_token = user_agent
        .split('/')
        .next()
        .unwrap_or(user_agent)
        .to_lowercase();

    let mut rules = RobotsRules::default();
    let mut group_applies = false;
    let mut in_agent_line_run = false;

    for line in body.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let (directive, value) = match line.split_once(':') {
            Some((d, v)) => (d.trim().to_lowercase(), v.trim()),
            None => continue,
        };

        match directive.as_str() {
            "user-agent" => {
                let agent = value.to_lowercase();
                // A run of user-agent lines opens a fresh group
                if !in_agent_line_run {
                    group_applies = false;
                }
                in_agent_line_run = true;
                if agent == "*" || agent_token.contains(&agent) || agent.contains(&agent_token) {
                    group_applies = true;
                }
            }
            "disallow" if group_applies => {
                in_agent_line_run = false;
                if !value.is_empty() {
                    rules.disallow.push(value.to_string());
                }
            }
            "allow" if group_applies => {
                in_agent_line_run = false;
                if !value.is_empty() {
                    rules.allow.push(value.to_string());
                }
            }
            "crawl-delay" if group_applies => {
                in_agent_line_run = false;
                if let Ok(delay) = value.parse::<u64>() {
                    rules.crawl_delay_secs = delay;
                }
            }
            _ => {
                in_agent_line_run = false;
            }
        }
    }

    rules
}

/// The part of a URL that robots rules are evaluated against: the path,
/// plus the query string when present, so rules like `Disallow: /search?`
/// can match
pub fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Longest-prefix evaluation of a request target against a rule set.
///
/// A target is disallowed when some disallow prefix matches it, unless a
/// strictly longer allow prefix also matches; lengths compare by string
/// length, not path-segment count.
pub fn is_allowed(path: &str, rules: &RobotsRules) -> bool {
    let disallow_len = rules
        .disallow
        .iter()
        .filter(|prefix| path.starts_with(prefix.as_str()))
        .map(|prefix| prefix.len())
        .max();

    let disallow_len = match disallow_len {
        Some(len) => len,
        None => return true,
    };

    let allow_len = rules
        .allow
        .iter()
        .filter(|prefix| path.starts_with(prefix.as_str()))
        .map(|prefix| prefix.len())
        .max()
        .unwrap_or(0);

    allow_len > disallow_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_group() {
        let body = "User-agent: *\nDisallow: /private\nAllow: /private/public\nCrawl-delay: 2\n";
        let rules = parse_robots(body, "buscador/0.1");

        assert_eq!(rules.disallow, vec!["/private"]);
        assert_eq!(rules.allow, vec!["/private/public"]);
        assert_eq!(rules.crawl_delay_secs, 2);
    }

    #[test]
    fn test_parse_ignores_other_agents() {
        let body = "User-agent: googlebot\nDisallow: /\n\nUser-agent: *\nDisallow: /tmp\n";
        let rules = parse_robots(body, "buscador/0.1");

        assert_eq!(rules.disallow, vec!["/tmp"]);
    }

    #[test]
    fn test_parse_comments_and_blank_disallow() {
        let body = "User-agent: * # everyone\nDisallow:\nDisallow: /secret # hidden\n";
        let rules = parse_robots(body, "buscador/0.1");

        assert_eq!(rules.disallow, vec!["/secret"]);
    }

    #[test]
    fn test_longest_prefix_override() {
        let rules = RobotsRules {
            disallow: vec!["/private".to_string()],
            allow: vec!["/private/public".to_string()],
            crawl_delay_secs: 0,
        };

        assert!(!is_allowed("/private/x", &rules));
        assert!(is_allowed("/private/public/page", &rules));
        assert!(is_allowed("/open", &rules));
    }

    #[test]
    fn test_equal_length_allow_does_not_override() {
        let rules = RobotsRules {
            disallow: vec!["/data".to_string()],
            allow: vec!["/data".to_string()],
            crawl_delay_secs: 0,
        };

        assert!(!is_allowed("/data/x", &rules));
    }

    #[test]
    fn test_empty_rules_allow_everything() {
        assert!(is_allowed("/anything", &RobotsRules::default()));
    }

    #[test]
    fn test_query_string_rules_match() {
        let rules = RobotsRules {
            disallow: vec!["/search?".to_string()],
            allow: vec![],
            crawl_delay_secs: 0,
        };

        let with_query = Url::parse("https://example.com/search?q=rust").unwrap();
        let without = Url::parse("https://example.com/search").unwrap();

        assert_eq!(request_target(&with_query), "/search?q=rust");
        assert_eq!(request_target(&without), "/search");

        assert!(!is_allowed(&request_target(&with_query), &rules));
        assert!(is_allowed(&request_target(&without), &rules));
    }
}
