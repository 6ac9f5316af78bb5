//! robots.txt gate
//!
//! A site whose start URL is disallowed for its user agent is not crawled.
//! Rules are matched by path prefix; the longest matching rule wins and an
//! `Allow` beats a `Disallow` of equal length. An unreachable robots.txt
//! allows everything, and so does a fetch abandoned on cancellation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::http_client::HttpClient;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RuleGroup {
    agents: Vec<String>,
    allow: Vec<String>,
    disallow: Vec<String>,
}

/// Parsed robots.txt
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    groups: Vec<RuleGroup>,
}

impl RobotsTxt {
    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<RuleGroup> = Vec::new();
        let mut current = RuleGroup::default();
        let mut in_rules = false;

        for raw in content.lines() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match directive.trim().to_ascii_lowercase().as_str() {
                "user-agent" => {
                    // A user-agent line after rules starts a new group
                    if in_rules {
                        groups.push(std::mem::take(&mut current));
                        in_rules = false;
                    }
                    current.agents.push(value.to_ascii_lowercase());
                }
                "allow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        current.allow.push(value.to_string());
                    }
                }
                "disallow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        current.disallow.push(value.to_string());
                    }
                }
                _ => {}
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }
        Self { groups }
    }

    fn group_for(&self, user_agent: &str) -> Option<&RuleGroup> {
        let ua = user_agent.to_ascii_lowercase();
        self.groups
            .iter()
            .find(|g| g.agents.iter().any(|a| a != "*" && ua.contains(a.as_str())))
            .or_else(|| self.groups.iter().find(|g| g.agents.iter().any(|a| a == "*")))
    }

    /// Whether `path` (path plus query) may be fetched by `user_agent`
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let Some(group) = self.group_for(user_agent) else {
            return true;
        };
        let longest = |rules: &[String]| {
            rules
                .iter()
                .filter(|rule| path.starts_with(rule.as_str()))
                .map(String::len)
                .max()
        };
        match (longest(&group.allow), longest(&group.disallow)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(allow), Some(disallow)) => allow >= disallow,
        }
    }
}

/// Where robots.txt bodies come from
#[async_trait]
pub trait RobotsSource: Send + Sync {
    async fn fetch(&self, robots_url: &str, cancel: &CancellationToken) -> anyhow::Result<String>;
}

#[async_trait]
impl RobotsSource for HttpClient {
    async fn fetch(&self, robots_url: &str, cancel: &CancellationToken) -> anyhow::Result<String> {
        self.get_text_with_cancellation(robots_url, cancel).await
    }
}

type CachedRobots = Arc<OnceCell<Arc<RobotsTxt>>>;

/// Fetches and caches robots.txt per origin.
///
/// The cache lock only guards the per-origin cells; fetches for different
/// origins run concurrently and one origin is fetched at most once.
pub struct RobotsChecker {
    source: Arc<dyn RobotsSource>,
    cache: Mutex<HashMap<String, CachedRobots>>,
}

impl std::fmt::Debug for RobotsChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotsChecker").finish_non_exhaustive()
    }
}

impl RobotsChecker {
    pub fn new(client: HttpClient) -> Self {
        Self::with_source(Arc::new(client))
    }

    pub fn with_source(source: Arc<dyn RobotsSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Unparseable URLs, fetch failures and cancellation are treated as allowed
    pub async fn is_allowed(&self, url: &str, user_agent: &str, cancel: &CancellationToken) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        let origin = parsed.origin().ascii_serialization();
        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        let Some(robots) = self.robots_for(&origin, cancel).await else {
            return true;
        };
        let allowed = robots.is_allowed(user_agent, &path);
        debug!(%origin, %path, allowed, "robots.txt check");
        allowed
    }

    /// `None` when cancelled before the body arrived; nothing is cached then
    async fn robots_for(&self, origin: &str, cancel: &CancellationToken) -> Option<Arc<RobotsTxt>> {
        let cell = {
            let mut cache = self.cache.lock().await;
            Arc::clone(cache.entry(origin.to_string()).or_default())
        };

        let robots_url = format!("{origin}/robots.txt");
        let url = robots_url.as_str();
        let source = &self.source;
        let fetched = cell
            .get_or_try_init(|| async move {
                let response = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(()),
                    response = source.fetch(url, cancel) => response,
                };
                let robots = match response {
                    Ok(body) => RobotsTxt::parse(&body),
                    Err(_) if cancel.is_cancelled() => return Err(()),
                    Err(e) => {
                        warn!("Could not fetch {}, assuming allowed: {:#}", url, e);
                        RobotsTxt::default()
                    }
                };
                Ok(Arc::new(robots))
            })
            .await;

        match fetched {
            Ok(robots) => Some(Arc::clone(robots)),
            Err(()) => {
                debug!(%robots_url, "robots.txt fetch cancelled");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeRobotsSource;
    use std::time::Duration;
    use tokio::time::Instant;

    const UA: &str = "Mozilla/5.0 (X11; Linux x86_64) ShopBot/2.1";

    #[test]
    fn wildcard_group_applies_to_everyone() {
        let robots = RobotsTxt::parse(
            "User-agent: *\nDisallow: /checkout\nDisallow: /account/ # private\n",
        );
        assert!(robots.is_allowed(UA, "/category/mugs"));
        assert!(!robots.is_allowed(UA, "/checkout/step1"));
        assert!(!robots.is_allowed(UA, "/account/"));
    }

    #[test]
    fn named_group_takes_priority_over_wildcard() {
        let robots = RobotsTxt::parse(
            "User-agent: *\nDisallow: /\n\nUser-agent: shopbot\nDisallow: /admin\n",
        );
        assert!(robots.is_allowed(UA, "/category"));
        assert!(!robots.is_allowed(UA, "/admin"));
        assert!(!robots.is_allowed("OtherBot/1.0", "/category"));
    }

    #[test]
    fn longest_match_wins() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow: /shop\nAllow: /shop/sale\n");
        assert!(!robots.is_allowed(UA, "/shop/new"));
        assert!(robots.is_allowed(UA, "/shop/sale?page=2"));
    }

    #[test]
    fn consecutive_agents_share_a_group() {
        let robots = RobotsTxt::parse("User-agent: a-bot\nUser-agent: shopbot\nDisallow: /x\n");
        assert!(!robots.is_allowed(UA, "/x"));
        assert!(!robots.is_allowed("a-bot", "/x/y"));
    }

    #[test]
    fn empty_file_allows_everything() {
        let robots = RobotsTxt::parse("");
        assert!(robots.is_allowed(UA, "/"));
        let robots = RobotsTxt::parse("User-agent: *\nDisallow:\n");
        assert!(robots.is_allowed(UA, "/anything"));
    }

    #[tokio::test]
    async fn each_origin_is_fetched_once() {
        let source = FakeRobotsSource::new().with_body("https://shop.example", "User-agent: *\nDisallow: /cart\n");
        let checker = RobotsChecker::with_source(Arc::new(source.clone()));
        let cancel = CancellationToken::new();

        assert!(checker.is_allowed("https://shop.example/cat", UA, &cancel).await);
        assert!(!checker.is_allowed("https://shop.example/cart?x=1", UA, &cancel).await);
        assert_eq!(source.fetches("https://shop.example"), 1);
    }

    #[tokio::test]
    async fn missing_robots_allows_the_crawl() {
        let checker = RobotsChecker::with_source(Arc::new(FakeRobotsSource::new()));
        assert!(checker.is_allowed("https://shop.example/", UA, &CancellationToken::new()).await);
        assert!(checker.is_allowed("not a url", UA, &CancellationToken::new()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_origin_does_not_hold_up_others() {
        let source = FakeRobotsSource::new()
            .with_body("https://slow.example", "User-agent: *\nDisallow:\n")
            .with_latency("https://slow.example", Duration::from_secs(30))
            .with_body("https://fast.example", "User-agent: *\nDisallow: /private\n");
        let checker = Arc::new(RobotsChecker::with_source(Arc::new(source)));
        let cancel = CancellationToken::new();

        let slow = {
            let checker = Arc::clone(&checker);
            let cancel = cancel.clone();
            tokio::spawn(async move { checker.is_allowed("https://slow.example/", UA, &cancel).await })
        };
        tokio::task::yield_now().await;

        let started = Instant::now();
        assert!(!checker.is_allowed("https://fast.example/private", UA, &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(slow.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_the_fetch_without_caching() {
        let source = FakeRobotsSource::new()
            .with_body("https://shop.example", "User-agent: *\nDisallow: /\n")
            .with_latency("https://shop.example", Duration::from_secs(60));
        let checker = RobotsChecker::with_source(Arc::new(source.clone()));
        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            });
        }

        let started = Instant::now();
        assert!(checker.is_allowed("https://shop.example/", UA, &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(2));

        let fresh = CancellationToken::new();
        assert!(!checker.is_allowed("https://shop.example/", UA, &fresh).await);
        assert_eq!(source.fetches("https://shop.example"), 2);
    }
}
