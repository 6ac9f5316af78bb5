//! # Site Crawl State Machine
//!
//! Drives one page session through
//! `Init -> Loaded -> Extract -> CheckForMore -> Click -> Wait -> Extract ... -> Done`,
//! or `Extract -> NextPage -> Extract ...` for sites paginated by links.
//!
//! Only a failure before the first listing is rendered is fatal. Everything
//! after that degrades to `Done`, so records collected so far are always
//! flushed. Every driver call is bounded by the site deadline and by the
//! shared cancellation token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::SiteCrawlState;
use crate::domain::constants::SCROLL_SETTLE_MS;
use crate::domain::{ProductRecord, SiteConfig};
use crate::infrastructure::page_driver::{DriverError, DriverFactory, DriverResult, PageDriver, ScrollTarget};
use crate::infrastructure::parsing::product_extractor::resolve_link;
use crate::infrastructure::parsing::{ParsingError, ProductExtractor};
use crate::infrastructure::robots::RobotsChecker;

/// Failures that end a site before any listing was extracted
#[derive(Error, Debug, Clone)]
pub enum SiteCrawlError {
    #[error("Invalid selector configuration: {0}")]
    InvalidSelector(#[from] ParsingError),

    #[error("robots.txt disallows {url}")]
    RobotsDisallowed { url: String },

    #[error("Failed to start browser session: {0}")]
    Launch(DriverError),

    #[error("Initial page load failed after {attempts} attempt(s): {source}")]
    InitialLoad {
        attempts: u32,
        #[source]
        source: DriverError,
    },

    #[error("Site task aborted: {0}")]
    Aborted(String),
}

/// Why a site that got past the initial load stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// No load-more control or next-page link configured
    SinglePass,
    /// The load-more control is no longer on the page
    NoMoreControl,
    ClickLimitReached,
    LookupFailed(String),
    ClickFailed(String),
    NoNextPage,
    PageLimitReached,
    AlreadyVisited(String),
    NavigationFailed(String),
    DeadlineExceeded,
    Cancelled,
}

impl StopReason {
    fn from_session_end(error: &DriverError) -> Option<Self> {
        match error {
            DriverError::DeadlineExceeded { .. } => Some(Self::DeadlineExceeded),
            DriverError::Cancelled { .. } => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SinglePass => write!(f, "single extraction pass"),
            Self::NoMoreControl => write!(f, "load-more control not found"),
            Self::ClickLimitReached => write!(f, "load-more click limit reached"),
            Self::LookupFailed(e) => write!(f, "load-more lookup failed: {e}"),
            Self::ClickFailed(e) => write!(f, "load-more click failed: {e}"),
            Self::NoNextPage => write!(f, "no next page"),
            Self::PageLimitReached => write!(f, "page limit reached"),
            Self::AlreadyVisited(url) => write!(f, "next page {url} already visited"),
            Self::NavigationFailed(e) => write!(f, "next page failed to load: {e}"),
            Self::DeadlineExceeded => write!(f, "site deadline exceeded"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Named states of the per-site controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlPhase {
    Init,
    Loaded,
    Extract,
    CheckForMore,
    Click,
    /// Waiting for content after a click; carries the pre-click product count
    Wait { products_before: usize },
    NextPage,
    Done(StopReason),
}

/// Final account of one site task
#[derive(Debug, Clone)]
pub struct SiteCrawlOutcome {
    pub site: String,
    /// Records flushed onto the result channel
    pub records_sent: usize,
    pub passes: u32,
    pub clicks: u32,
    pub pages: u32,
    pub result: Result<StopReason, SiteCrawlError>,
}

impl SiteCrawlOutcome {
    fn failed(site: &SiteConfig, error: SiteCrawlError) -> Self {
        Self {
            site: site.name.clone(),
            records_sent: 0,
            passes: 0,
            clicks: 0,
            pages: 0,
            result: Err(error),
        }
    }

    pub const fn is_fatal(&self) -> bool {
        self.result.is_err()
    }
}

/// Controller for one site's page session
pub struct SiteCrawler<'a> {
    site: &'a SiteConfig,
    extractor: ProductExtractor,
    deadline: Instant,
    cancel: CancellationToken,
}

impl<'a> SiteCrawler<'a> {
    /// `deadline` bounds every driver call made by [`run`](Self::run)
    pub fn new(
        site: &'a SiteConfig,
        extractor: ProductExtractor,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            site,
            extractor,
            deadline,
            cancel,
        }
    }

    /// Run the state machine to completion against `driver`.
    /// The returned state holds every accepted record, also on failure.
    pub async fn run(&self, driver: &mut dyn PageDriver) -> (SiteCrawlState, Result<StopReason, SiteCrawlError>) {
        let mut state = SiteCrawlState::new(&self.site.base_url);
        let mut phase = CrawlPhase::Init;

        loop {
            debug!(?phase, "Site crawl transition");
            phase = match phase {
                CrawlPhase::Init => match self.initial_load(driver, &mut state).await {
                    Ok(()) => CrawlPhase::Loaded,
                    Err(e) => return (state, Err(e)),
                },
                CrawlPhase::Loaded => CrawlPhase::Extract,
                CrawlPhase::Extract => self.extract(driver, &mut state).await,
                CrawlPhase::CheckForMore => self.check_for_more(driver).await,
                CrawlPhase::Click => self.click(driver, &mut state).await,
                CrawlPhase::Wait { products_before } => self.wait_for_content(driver, products_before).await,
                CrawlPhase::NextPage => self.next_page(driver, &mut state).await,
                CrawlPhase::Done(reason) => return (state, Ok(reason)),
            };
        }
    }

    async fn initial_load(&self, driver: &mut dyn PageDriver, state: &mut SiteCrawlState) -> Result<(), SiteCrawlError> {
        let attempts = self.site.max_retries.saturating_add(1);
        let url = self.site.base_url.as_str();
        let container = self.site.container_selector();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let loaded = match self.bounded("navigate", driver.navigate(url)).await {
                Ok(()) => {
                    let remaining = self.remaining();
                    self.bounded("wait_visible", driver.wait_visible(container, remaining))
                        .await
                }
                Err(e) => Err(e),
            };

            match loaded {
                Ok(()) => {
                    state.enter_page(url);
                    info!(attempt, "Listing page loaded");
                    return Ok(());
                }
                Err(e) if e.ends_session() || attempt >= attempts => {
                    warn!("Initial load failed: {}", e);
                    return Err(SiteCrawlError::InitialLoad { attempts: attempt, source: e });
                }
                Err(e) => {
                    warn!(attempt, attempts, "Initial load failed, retrying: {}", e);
                    if let Err(e) = self.pause(driver, self.inter_action_delay()).await {
                        return Err(SiteCrawlError::InitialLoad { attempts: attempt, source: e });
                    }
                }
            }
        }
    }

    async fn extract(&self, driver: &mut dyn PageDriver, state: &mut SiteCrawlState) -> CrawlPhase {
        let container = self.site.container_selector();
        match self.bounded("outer_html", driver.outer_html(container)).await {
            Ok(html) => {
                let page_url = state.current_url.clone();
                let summary = self.extractor.extract_into(&html, &page_url, state);
                state.passes += 1;
                debug!(
                    pass = state.passes,
                    added = summary.added,
                    total = state.len(),
                    "Extraction pass complete"
                );
            }
            Err(e) => {
                if let Some(reason) = StopReason::from_session_end(&e) {
                    return CrawlPhase::Done(reason);
                }
                warn!("Skipping extraction pass: {}", e);
            }
        }

        if self.site.load_more_selector().is_some() {
            let limit = self.site.max_load_more_clicks;
            if limit > 0 && state.clicks >= limit {
                info!(clicks = state.clicks, "Reached max load more clicks");
                return CrawlPhase::Done(StopReason::ClickLimitReached);
            }
            CrawlPhase::CheckForMore
        } else if self.site.next_page_selector().is_some() {
            CrawlPhase::NextPage
        } else {
            CrawlPhase::Done(StopReason::SinglePass)
        }
    }

    async fn check_for_more(&self, driver: &mut dyn PageDriver) -> CrawlPhase {
        let Some(selector) = self.site.load_more_selector() else {
            return CrawlPhase::Done(StopReason::SinglePass);
        };
        match self.bounded("find_nodes", driver.find_nodes(selector)).await {
            Ok(nodes) if nodes.is_empty() => {
                info!("Load more button not found, assuming all products are loaded");
                CrawlPhase::Done(StopReason::NoMoreControl)
            }
            Ok(_) => CrawlPhase::Click,
            Err(e) => StopReason::from_session_end(&e).map_or_else(
                || {
                    warn!("Load more lookup failed: {}", e);
                    CrawlPhase::Done(StopReason::LookupFailed(e.to_string()))
                },
                CrawlPhase::Done,
            ),
        }
    }

    async fn click(&self, driver: &mut dyn PageDriver, state: &mut SiteCrawlState) -> CrawlPhase {
        let Some(selector) = self.site.load_more_selector() else {
            return CrawlPhase::Done(StopReason::SinglePass);
        };

        let products_before = if self.site.poll_for_product_increase {
            match self.product_count(driver).await {
                Ok(count) => count,
                Err(reason) => return CrawlPhase::Done(reason),
            }
        } else {
            0
        };

        if let Err(e) = self.pause(driver, self.inter_action_delay()).await {
            return self.session_end_or(e, StopReason::ClickFailed);
        }

        let target = if self.site.scroll_to_bottom {
            ScrollTarget::Bottom
        } else {
            ScrollTarget::Element(selector)
        };
        if let Err(e) = self.bounded("scroll_into_view", driver.scroll_into_view(target)).await {
            if let Some(reason) = StopReason::from_session_end(&e) {
                return CrawlPhase::Done(reason);
            }
            warn!("Scroll before load more failed, clicking anyway: {}", e);
        }
        if let Err(e) = self.pause(driver, Duration::from_millis(SCROLL_SETTLE_MS)).await {
            return self.session_end_or(e, StopReason::ClickFailed);
        }

        match self.bounded("click", driver.click(selector)).await {
            Ok(()) => {
                state.clicks += 1;
                info!(click = state.clicks, "Clicked load more button");
                CrawlPhase::Wait { products_before }
            }
            Err(e) => {
                warn!("Load more click failed: {}", e);
                self.session_end_or(e, StopReason::ClickFailed)
            }
        }
    }

    async fn wait_for_content(&self, driver: &mut dyn PageDriver, products_before: usize) -> CrawlPhase {
        if !self.site.poll_for_product_increase {
            return match self.pause(driver, self.site.load_more_wait()).await {
                Ok(()) => CrawlPhase::Extract,
                Err(e) => self.session_end_or(e, StopReason::LookupFailed),
            };
        }

        let started = Instant::now();
        let budget = self.site.poll_timeout();
        loop {
            if let Err(e) = self.pause(driver, self.site.poll_interval()).await {
                return self.session_end_or(e, StopReason::LookupFailed);
            }
            match self.product_count(driver).await {
                Ok(count) if count > products_before => {
                    debug!(before = products_before, after = count, "Product count increased");
                    return CrawlPhase::Extract;
                }
                Ok(_) => {}
                Err(reason) => return CrawlPhase::Done(reason),
            }
            if started.elapsed() >= budget {
                debug!(before = products_before, "No product increase within poll timeout");
                return CrawlPhase::Extract;
            }
        }
    }

    async fn next_page(&self, driver: &mut dyn PageDriver, state: &mut SiteCrawlState) -> CrawlPhase {
        let Some(selector) = self.site.next_page_selector() else {
            return CrawlPhase::Done(StopReason::SinglePass);
        };
        let max_depth = self.site.max_depth;
        if max_depth > 0 && state.pages >= max_depth {
            info!(pages = state.pages, "Reached max depth");
            return CrawlPhase::Done(StopReason::PageLimitReached);
        }

        let nodes = match self.bounded("find_nodes", driver.find_nodes(selector)).await {
            Ok(nodes) => nodes,
            Err(e) => {
                debug!("Next page lookup failed: {}", e);
                return self.session_end_or(e, |_| StopReason::NoNextPage);
            }
        };
        let Some(href) = nodes.into_iter().find_map(|node| node.href.filter(|h| !h.trim().is_empty())) else {
            return CrawlPhase::Done(StopReason::NoNextPage);
        };
        let next_url = match resolve_link(href.trim(), &state.current_url) {
            Ok(url) => url,
            Err(e) => {
                warn!("Unusable next page link: {}", e);
                return CrawlPhase::Done(StopReason::NoNextPage);
            }
        };
        if state.has_visited(&next_url) {
            return CrawlPhase::Done(StopReason::AlreadyVisited(next_url));
        }

        if let Err(e) = self.pause(driver, self.inter_action_delay()).await {
            return self.session_end_or(e, StopReason::NavigationFailed);
        }
        let container = self.site.container_selector();
        let loaded = match self.bounded("navigate", driver.navigate(&next_url)).await {
            Ok(()) => {
                let remaining = self.remaining();
                self.bounded("wait_visible", driver.wait_visible(container, remaining))
                    .await
            }
            Err(e) => Err(e),
        };
        match loaded {
            Ok(()) => {
                state.enter_page(&next_url);
                info!(page = state.pages, url = %next_url, "Visiting next page");
                CrawlPhase::Extract
            }
            Err(e) => {
                warn!("Next page {} failed to load: {}", next_url, e);
                self.session_end_or(e, StopReason::NavigationFailed)
            }
        }
    }

    async fn product_count(&self, driver: &mut dyn PageDriver) -> Result<usize, StopReason> {
        match self
            .bounded("find_nodes", driver.find_nodes(&self.site.product_selector))
            .await
        {
            Ok(nodes) => Ok(nodes.len()),
            Err(e) => Err(StopReason::from_session_end(&e).unwrap_or_else(|| StopReason::LookupFailed(e.to_string()))),
        }
    }

    fn session_end_or(&self, error: DriverError, otherwise: impl FnOnce(String) -> StopReason) -> CrawlPhase {
        let reason = StopReason::from_session_end(&error).unwrap_or_else(|| otherwise(error.to_string()));
        CrawlPhase::Done(reason)
    }

    fn inter_action_delay(&self) -> Duration {
        let max_jitter = self.site.random_delay();
        let jitter = if max_jitter.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..=u64::try_from(max_jitter.as_millis()).unwrap_or(u64::MAX)))
        };
        self.site.delay() + jitter
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    async fn pause(&self, driver: &mut dyn PageDriver, duration: Duration) -> DriverResult<()> {
        if duration.is_zero() {
            return Ok(());
        }
        self.bounded("sleep", async {
            driver.sleep(duration).await;
            Ok(())
        })
        .await
    }

    /// Race a driver operation against the site deadline and cancellation
    async fn bounded<T, F>(&self, operation: &'static str, op: F) -> DriverResult<T>
    where
        F: Future<Output = DriverResult<T>>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(DriverError::Cancelled { operation }),
            result = tokio::time::timeout_at(self.deadline, op) => {
                result.unwrap_or(Err(DriverError::DeadlineExceeded { operation }))
            }
        }
    }
}

/// Everything a site task needs, owned so the task can be spawned
pub struct SiteTask {
    pub site: Arc<SiteConfig>,
    pub factory: Arc<dyn DriverFactory>,
    pub robots: Option<Arc<RobotsChecker>>,
    pub results: mpsc::Sender<ProductRecord>,
    pub cancel: CancellationToken,
}

impl SiteTask {
    /// Crawl the site end to end and flush its records onto the result channel
    pub async fn run(self) -> SiteCrawlOutcome {
        let site = self.site.as_ref();
        info!(
            timeout_secs = site.overall_timeout().as_secs(),
            load_more = site.load_more_selector().is_some(),
            next_page = site.next_page_selector().is_some(),
            "Starting site crawl"
        );

        let extractor = match ProductExtractor::from_site(site) {
            Ok(extractor) => extractor,
            Err(e) => return SiteCrawlOutcome::failed(site, e.into()),
        };

        if !site.robots_txt_disabled {
            if let Some(robots) = &self.robots {
                if !robots.is_allowed(&site.base_url, &site.user_agent, &self.cancel).await {
                    warn!("Disallowed by robots.txt, skipping site");
                    return SiteCrawlOutcome::failed(
                        site,
                        SiteCrawlError::RobotsDisallowed {
                            url: site.base_url.clone(),
                        },
                    );
                }
            }
        }

        // The site's time budget covers the browser session only
        let deadline = Instant::now() + site.overall_timeout();
        let crawler = SiteCrawler::new(site, extractor, deadline, self.cancel.clone());

        let launched = crawler.bounded("launch", self.factory.launch(site)).await;
        let mut driver = match launched {
            Ok(driver) => driver,
            Err(e) => {
                warn!("Browser session could not be started: {}", e);
                return SiteCrawlOutcome::failed(site, SiteCrawlError::Launch(e));
            }
        };

        let (mut state, result) = crawler.run(driver.as_mut()).await;
        driver.close().await;

        let records = state.take_records();
        let total = records.len();
        let mut records_sent = 0;
        for record in records {
            if self.results.send(record).await.is_err() {
                warn!("Result channel closed, {} records not delivered", total - records_sent);
                break;
            }
            records_sent += 1;
        }

        match &result {
            Ok(reason) => info!(
                products = records_sent,
                passes = state.passes,
                clicks = state.clicks,
                %reason,
                "Finished crawling site"
            ),
            Err(e) => warn!(products = records_sent, "Site crawl failed: {}", e),
        }

        SiteCrawlOutcome {
            site: site.name.clone(),
            records_sent,
            passes: state.passes,
            clicks: state.clicks,
            pages: state.pages,
            result,
        }
    }
}
