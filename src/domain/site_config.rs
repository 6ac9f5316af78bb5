//! Per-site crawl configuration
//!
//! A `SiteConfig` is loaded once, defaulted, validated and then shared
//! read-only between the orchestrator, the collector and the site's own
//! crawl task.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::constants::{
    DEFAULT_BROWSER_TIMEOUT_SECS, DEFAULT_CONTAINER_SELECTOR, DEFAULT_DELAY_MS,
    DEFAULT_MAX_DEPTH_WITH_PAGINATION, DEFAULT_PARALLELISM, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_USER_AGENT, DEFAULT_WAIT_AFTER_LOAD_MORE_MS,
};

/// Configuration for a single e-commerce site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Informative name, also the identity of the site's result bucket
    pub name: String,
    /// Listing page where the crawl starts
    pub base_url: String,
    /// Hosts whose product links belong to this site
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    pub product_selector: String,
    pub name_selector: String,
    pub price_selector: String,
    #[serde(default)]
    pub category_selector: Option<String>,
    #[serde(default)]
    pub next_page_selector: Option<String>,
    #[serde(default)]
    pub load_more_button_selector: Option<String>,
    /// Element whose outer HTML is taken as the listing snapshot
    #[serde(default)]
    pub product_container_selector: String,

    /// Max listing pages followed through `next_page_selector` (0 = unbounded)
    #[serde(default)]
    pub max_depth: u32,
    /// Extra attempts for the initial navigation
    #[serde(default)]
    pub max_retries: u32,
    /// Max load-more clicks (0 = until the control disappears)
    #[serde(default)]
    pub max_load_more_clicks: u32,
    #[serde(default)]
    pub poll_timeout_ms: u64,
    #[serde(default)]
    pub poll_interval_ms: u64,
    /// Overall execution budget for the site's browser session
    #[serde(default, alias = "chromedp_timeout_sec")]
    pub browser_timeout_sec: u64,

    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub random_delay_ms: u64,
    #[serde(default)]
    pub wait_after_load_more_ms: u64,

    #[serde(default, rename = "async")]
    pub async_requests: bool,
    #[serde(default)]
    pub robots_txt_disabled: bool,
    #[serde(default)]
    pub scroll_to_bottom: bool,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default)]
    pub poll_for_product_increase: bool,

    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub parallelism: u32,
}

const fn default_headless() -> bool {
    true
}

impl SiteConfig {
    /// Minimal configuration; every optional field takes its zero value
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        allowed_domains: Vec<String>,
        product_selector: impl Into<String>,
        name_selector: impl Into<String>,
        price_selector: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            allowed_domains,
            product_selector: product_selector.into(),
            name_selector: name_selector.into(),
            price_selector: price_selector.into(),
            category_selector: None,
            next_page_selector: None,
            load_more_button_selector: None,
            product_container_selector: String::new(),
            max_depth: 0,
            max_retries: 0,
            max_load_more_clicks: 0,
            poll_timeout_ms: 0,
            poll_interval_ms: 0,
            browser_timeout_sec: 0,
            delay_ms: 0,
            random_delay_ms: 0,
            wait_after_load_more_ms: 0,
            async_requests: false,
            robots_txt_disabled: false,
            scroll_to_bottom: false,
            headless: true,
            poll_for_product_increase: false,
            user_agent: String::new(),
            parallelism: 0,
        }
    }

    /// Fill in the defaults the original config format relies on.
    pub fn apply_defaults(&mut self) {
        if self.user_agent.trim().is_empty() {
            self.user_agent = DEFAULT_USER_AGENT.to_string();
        }
        if self.delay_ms == 0 {
            self.delay_ms = DEFAULT_DELAY_MS;
        }
        if self.parallelism == 0 {
            self.parallelism = DEFAULT_PARALLELISM;
        }
        if self.max_depth == 0 && self.next_page_selector().is_some() {
            self.max_depth = DEFAULT_MAX_DEPTH_WITH_PAGINATION;
        }
        if self.product_container_selector.trim().is_empty() {
            self.product_container_selector = DEFAULT_CONTAINER_SELECTOR.to_string();
        }
    }

    /// Invariant violations, one message per problem
    pub fn validation_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let required = [
            ("name", &self.name),
            ("base_url", &self.base_url),
            ("product_selector", &self.product_selector),
            ("name_selector", &self.name_selector),
            ("price_selector", &self.price_selector),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                problems.push(format!("{field} must not be empty"));
            }
        }
        if self.allowed_domains.iter().all(|d| d.trim().is_empty()) {
            problems.push("allowed_domains must contain at least one domain".to_string());
        }
        if !self.base_url.trim().is_empty() && url::Url::parse(&self.base_url).is_err() {
            problems.push(format!("base_url '{}' is not an absolute URL", self.base_url));
        }
        problems
    }

    pub fn category_selector(&self) -> Option<&str> {
        non_blank(self.category_selector.as_deref())
    }

    pub fn next_page_selector(&self) -> Option<&str> {
        non_blank(self.next_page_selector.as_deref())
    }

    pub fn load_more_selector(&self) -> Option<&str> {
        non_blank(self.load_more_button_selector.as_deref())
    }

    pub fn container_selector(&self) -> &str {
        non_blank(Some(self.product_container_selector.as_str())).unwrap_or(DEFAULT_CONTAINER_SELECTOR)
    }

    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub const fn random_delay(&self) -> Duration {
        Duration::from_millis(self.random_delay_ms)
    }

    /// Wait after a load-more click; 3s when unset
    pub const fn load_more_wait(&self) -> Duration {
        if self.wait_after_load_more_ms == 0 {
            Duration::from_millis(DEFAULT_WAIT_AFTER_LOAD_MORE_MS)
        } else {
            Duration::from_millis(self.wait_after_load_more_ms)
        }
    }

    /// Budget for the whole site session; 60s when unset
    pub const fn overall_timeout(&self) -> Duration {
        if self.browser_timeout_sec == 0 {
            Duration::from_secs(DEFAULT_BROWSER_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.browser_timeout_sec)
        }
    }

    pub const fn poll_interval(&self) -> Duration {
        if self.poll_interval_ms == 0 {
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
        } else {
            Duration::from_millis(self.poll_interval_ms)
        }
    }

    /// Product-count polling budget; falls back to the load-more wait
    pub const fn poll_timeout(&self) -> Duration {
        if self.poll_timeout_ms == 0 {
            self.load_more_wait()
        } else {
            Duration::from_millis(self.poll_timeout_ms)
        }
    }

    /// Whether `host` is one of the site's allowed domains or a subdomain of one
    pub fn owns_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.allowed_domains.iter().any(|domain| {
            let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
            !domain.is_empty()
                && (host == domain
                    || host
                        .strip_suffix(domain.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.')))
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteConfig {
        SiteConfig::new(
            "Demo Shop",
            "https://shop.example/catalog",
            vec!["shop.example".to_string()],
            ".product",
            ".title",
            ".price",
        )
    }

    #[test]
    fn defaults_fill_the_legacy_values() {
        let mut cfg = site();
        cfg.next_page_selector = Some("a.next".to_string());
        cfg.apply_defaults();

        assert_eq!(cfg.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(cfg.delay(), Duration::from_secs(1));
        assert_eq!(cfg.parallelism, 2);
        assert_eq!(cfg.max_depth, 5);
        assert_eq!(cfg.container_selector(), "body");
    }

    #[test]
    fn max_depth_untouched_without_pagination() {
        let mut cfg = site();
        cfg.apply_defaults();
        assert_eq!(cfg.max_depth, 0);
    }

    #[test]
    fn unset_timings_fall_back() {
        let cfg = site();
        assert_eq!(cfg.load_more_wait(), Duration::from_millis(3000));
        assert_eq!(cfg.overall_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.poll_timeout(), Duration::from_millis(3000));
    }

    #[test]
    fn host_ownership_accepts_subdomains_only_on_label_boundary() {
        let cfg = site();
        assert!(cfg.owns_host("shop.example"));
        assert!(cfg.owns_host("WWW.Shop.Example"));
        assert!(!cfg.owns_host("evilshop.example"));
        assert!(!cfg.owns_host("other.example"));
    }

    #[test]
    fn validation_reports_each_missing_field() {
        let mut cfg = site();
        cfg.price_selector = "  ".to_string();
        cfg.allowed_domains.clear();

        let problems = cfg.validation_problems();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("price_selector"));
    }

    #[test]
    fn deserializes_original_field_names() {
        let json = r#"{
            "name": "Demo",
            "base_url": "https://shop.example/",
            "allowed_domains": ["shop.example"],
            "product_selector": ".p",
            "name_selector": ".n",
            "price_selector": ".pr",
            "chromedp_timeout_sec": 90,
            "async": true,
            "load_more_button_selector": "button.more"
        }"#;
        let cfg: SiteConfig = serde_json::from_str(json).unwrap();

        assert_eq!(cfg.overall_timeout(), Duration::from_secs(90));
        assert!(cfg.async_requests);
        assert!(cfg.headless);
        assert_eq!(cfg.load_more_selector(), Some("button.more"));
    }
}
