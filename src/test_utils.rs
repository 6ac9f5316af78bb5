//! Test utilities
//!
//! Scripted stand-ins for the browser, robots.txt and the result sink so crawl flows can
//! be exercised deterministically without a network or a real browser.
//!
//! `FakePageDriver` serves each URL as a sequence of DOM states. Selectors
//! are evaluated against the current state, and a successful click moves to
//! the next state (the last one repeats). Sleeping goes through the tokio
//! clock, so tests usually run with `#[tokio::test(start_paused = true)]`.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::crawling::sink::{ResultSink, SinkError};
use crate::domain::{ProductRecord, SiteConfig};
use crate::infrastructure::page_driver::{
    DriverError, DriverFactory, DriverResult, NodeInfo, PageDriver, ScrollTarget,
};
use crate::infrastructure::robots::RobotsSource;

/// One recorded driver interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Navigate(String),
    WaitVisible(String),
    OuterHtml(String),
    FindNodes(String),
    Click(String),
    Scroll(String),
    Sleep(Duration),
    Close,
}

/// Shared, append-only log of driver calls
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<DriverCall>>>);

impl CallLog {
    fn push(&self, call: DriverCall) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self, predicate: impl Fn(&DriverCall) -> bool) -> usize {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    /// Extraction passes, i.e. snapshots taken
    pub fn snapshots(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::OuterHtml(_)))
    }

    pub fn clicks(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::Click(_)))
    }

    pub fn navigations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                DriverCall::Navigate(url) => Some(url),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakePageDriver {
    pages: HashMap<String, Vec<String>>,
    current_url: Option<String>,
    state_index: usize,
    navigate_failures: u32,
    fail_clicks: bool,
    fail_scrolls: bool,
    hang_on: Option<&'static str>,
    log: CallLog,
}

impl FakePageDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `url` as the given DOM states
    #[must_use]
    pub fn with_page(mut self, url: &str, states: Vec<String>) -> Self {
        self.pages.insert(url.to_string(), states);
        self
    }

    /// Fail the first `count` navigations
    #[must_use]
    pub const fn failing_navigations(mut self, count: u32) -> Self {
        self.navigate_failures = count;
        self
    }

    #[must_use]
    pub const fn failing_clicks(mut self) -> Self {
        self.fail_clicks = true;
        self
    }

    #[must_use]
    pub const fn failing_scrolls(mut self) -> Self {
        self.fail_scrolls = true;
        self
    }

    /// Never resolve the named operation (e.g. `"click"`)
    #[must_use]
    pub const fn hanging_on(mut self, operation: &'static str) -> Self {
        self.hang_on = Some(operation);
        self
    }

    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    fn hangs(&self, operation: &str) -> bool {
        self.hang_on == Some(operation)
    }

    fn current_dom(&self) -> Option<&str> {
        let states = self.pages.get(self.current_url.as_deref()?)?;
        let last = states.len().checked_sub(1)?;
        states.get(self.state_index.min(last)).map(String::as_str)
    }

    fn select<T>(&self, selector: &str, collect: impl FnOnce(&Html, &Selector) -> T) -> DriverResult<T> {
        let parsed = Selector::parse(selector).map_err(|e| DriverError::Interaction {
            operation: "select",
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;
        let document = Html::parse_document(self.current_dom().unwrap_or_default());
        Ok(collect(&document, &parsed))
    }

    fn matches(&self, selector: &str) -> DriverResult<bool> {
        self.select(selector, |doc, sel| doc.select(sel).next().is_some())
    }
}

#[async_trait]
impl PageDriver for FakePageDriver {
    async fn navigate(&mut self, url: &str) -> DriverResult<()> {
        self.log.push(DriverCall::Navigate(url.to_string()));
        if self.hangs("navigate") {
            return std::future::pending().await;
        }
        if self.navigate_failures > 0 {
            self.navigate_failures -= 1;
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        if !self.pages.contains_key(url) {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: "404 Not Found".to_string(),
            });
        }
        self.current_url = Some(url.to_string());
        self.state_index = 0;
        Ok(())
    }

    async fn wait_visible(&mut self, selector: &str, timeout: Duration) -> DriverResult<()> {
        self.log.push(DriverCall::WaitVisible(selector.to_string()));
        if self.hangs("wait_visible") {
            return std::future::pending().await;
        }
        if self.matches(selector)? {
            Ok(())
        } else {
            Err(DriverError::NotVisible {
                selector: selector.to_string(),
                timeout,
            })
        }
    }

    async fn outer_html(&mut self, selector: &str) -> DriverResult<String> {
        self.log.push(DriverCall::OuterHtml(selector.to_string()));
        if self.hangs("outer_html") {
            return std::future::pending().await;
        }
        self.select(selector, |doc, sel| doc.select(sel).next().map(|el| el.html()))?
            .ok_or_else(|| DriverError::ElementNotFound {
                selector: selector.to_string(),
            })
    }

    async fn find_nodes(&mut self, selector: &str) -> DriverResult<Vec<NodeInfo>> {
        self.log.push(DriverCall::FindNodes(selector.to_string()));
        if self.hangs("find_nodes") {
            return std::future::pending().await;
        }
        self.select(selector, |doc, sel| {
            doc.select(sel)
                .map(|el| NodeInfo {
                    href: el.value().attr("href").map(str::to_string),
                })
                .collect()
        })
    }

    async fn click(&mut self, selector: &str) -> DriverResult<()> {
        self.log.push(DriverCall::Click(selector.to_string()));
        if self.hangs("click") {
            return std::future::pending().await;
        }
        if self.fail_clicks {
            return Err(DriverError::Interaction {
                operation: "click",
                selector: selector.to_string(),
                reason: "element is not clickable".to_string(),
            });
        }
        if !self.matches(selector)? {
            return Err(DriverError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        self.state_index += 1;
        Ok(())
    }

    async fn scroll_into_view(&mut self, target: ScrollTarget<'_>) -> DriverResult<()> {
        let label = match target {
            ScrollTarget::Bottom => "bottom".to_string(),
            ScrollTarget::Element(selector) => selector.to_string(),
        };
        self.log.push(DriverCall::Scroll(label.clone()));
        if self.fail_scrolls {
            return Err(DriverError::Interaction {
                operation: "scroll_into_view",
                selector: label,
                reason: "scroll failed".to_string(),
            });
        }
        Ok(())
    }

    async fn sleep(&mut self, duration: Duration) {
        self.log.push(DriverCall::Sleep(duration));
        tokio::time::sleep(duration).await;
    }

    async fn close(&mut self) {
        self.log.push(DriverCall::Close);
    }
}

/// Hands out a copy of the scripted driver registered for each site name
#[derive(Debug, Clone, Default)]
pub struct FakeDriverFactory {
    drivers: HashMap<String, FakePageDriver>,
    failing: HashSet<String>,
}

impl FakeDriverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_driver(mut self, site: &str, driver: FakePageDriver) -> Self {
        self.drivers.insert(site.to_string(), driver);
        self
    }

    /// Launching a session for `site` fails
    #[must_use]
    pub fn failing_launch(mut self, site: &str) -> Self {
        self.failing.insert(site.to_string());
        self
    }
}

#[async_trait]
impl DriverFactory for FakeDriverFactory {
    async fn launch(&self, site: &SiteConfig) -> DriverResult<Box<dyn PageDriver>> {
        if self.failing.contains(&site.name) {
            return Err(DriverError::Launch("browser binary not found".to_string()));
        }
        self.drivers
            .get(&site.name)
            .cloned()
            .map(|driver| Box::new(driver) as Box<dyn PageDriver>)
            .ok_or_else(|| DriverError::Launch(format!("no scripted driver for site '{}'", site.name)))
    }
}

/// Keeps every stored bucket in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    stored: Arc<Mutex<Vec<(String, Vec<ProductRecord>)>>>,
    failing: HashSet<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storing records for `site` fails
    #[must_use]
    pub fn failing_for(mut self, site: &str) -> Self {
        self.failing.insert(site.to_string());
        self
    }

    pub fn stored(&self) -> Vec<(String, Vec<ProductRecord>)> {
        self.stored.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn calls_for(&self, site: &str) -> usize {
        self.stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(name, _)| name == site)
            .count()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn store(&self, site: &str, records: &[ProductRecord]) -> Result<String, SinkError> {
        if self.failing.contains(site) {
            return Err(SinkError::Rejected {
                site: site.to_string(),
                reason: "disk full".to_string(),
            });
        }
        self.stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((site.to_string(), records.to_vec()));
        Ok(format!("memory://{site}"))
    }
}

/// Serves robots.txt bodies per origin, optionally after a delay
#[derive(Debug, Clone, Default)]
pub struct FakeRobotsSource {
    bodies: HashMap<String, String>,
    latency: HashMap<String, Duration>,
    fetches: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeRobotsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// `origin` is scheme plus host, e.g. `https://shop.example`
    #[must_use]
    pub fn with_body(mut self, origin: &str, body: &str) -> Self {
        self.bodies.insert(origin.to_string(), body.to_string());
        self
    }

    #[must_use]
    pub fn with_latency(mut self, origin: &str, latency: Duration) -> Self {
        self.latency.insert(origin.to_string(), latency);
        self
    }

    pub fn fetches(&self, origin: &str) -> usize {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(origin)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RobotsSource for FakeRobotsSource {
    async fn fetch(&self, robots_url: &str, _cancel: &CancellationToken) -> anyhow::Result<String> {
        let origin = robots_url.trim_end_matches("/robots.txt");
        *self
            .fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(origin.to_string())
            .or_default() += 1;
        if let Some(latency) = self.latency.get(origin) {
            tokio::time::sleep(*latency).await;
        }
        self.bodies
            .get(origin)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("HTTP request failed with status 404 Not Found: {robots_url}"))
    }
}

/// Site with `#grid` as container and `.product` / `.name` / `.price` selectors
pub fn demo_site(name: &str, base_url: &str, domain: &str) -> SiteConfig {
    let mut site = SiteConfig::new(name, base_url, vec![domain.to_string()], ".product", ".name", ".price");
    site.product_container_selector = "#grid".to_string();
    site
}

/// A listing page: one `.product` per `(name, price, href)` plus optional extras
/// (e.g. a load-more button or a next link) inside `#grid`
pub fn listing_html(products: &[(&str, &str, &str)], extra: &str) -> String {
    let items: String = products
        .iter()
        .map(|(name, price, href)| {
            format!(r#"<div class="product"><a class="name" href="{href}">{name}</a><span class="price">{price}</span></div>"#)
        })
        .collect();
    format!(r#"<html><body><div id="grid">{items}{extra}</div></body></html>"#)
}

/// Products named `"{prefix} {i}"` linking to `/p/{prefix}-{i}`
pub fn numbered_products(prefix: &str, range: std::ops::Range<usize>) -> Vec<(String, String, String)> {
    range
        .map(|i| (format!("{prefix} {i}"), format!("{}", 100 + i), format!("/p/{prefix}-{i}")))
        .collect()
}

/// [`listing_html`] for owned product tuples
pub fn listing_from(products: &[(String, String, String)], extra: &str) -> String {
    let borrowed: Vec<(&str, &str, &str)> = products
        .iter()
        .map(|(n, p, h)| (n.as_str(), p.as_str(), h.as_str()))
        .collect();
    listing_html(&borrowed, extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clicks_advance_through_dom_states() {
        let first = listing_html(&[("A", "1", "/a")], r#"<button class="more">More</button>"#);
        let second = listing_html(&[("A", "1", "/a"), ("B", "2", "/b")], "");
        let mut driver = FakePageDriver::new().with_page("https://shop.example/", vec![first, second]);

        driver.navigate("https://shop.example/").await.unwrap();
        assert_eq!(driver.find_nodes(".product").await.unwrap().len(), 1);
        driver.click("button.more").await.unwrap();
        assert_eq!(driver.find_nodes(".product").await.unwrap().len(), 2);
        assert!(matches!(
            driver.click("button.more").await,
            Err(DriverError::ElementNotFound { .. })
        ));
        assert_eq!(driver.call_log().clicks(), 2);
    }

    #[tokio::test]
    async fn unknown_urls_fail_navigation() {
        let mut driver = FakePageDriver::new();
        assert!(driver.navigate("https://nowhere.example/").await.is_err());
    }
}
