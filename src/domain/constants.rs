//! Crawl defaults shared by the config loader and the site state machine
//!
//! Values mirror the behaviour existing site configuration files were
//! written against.

/// User agent sent when a site does not configure its own
pub const DEFAULT_USER_AGENT: &str =
    "EcomCrawler/1.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

/// Delay between interactions with a site (milliseconds)
pub const DEFAULT_DELAY_MS: u64 = 1000;

pub const DEFAULT_PARALLELISM: u32 = 2;

/// Pagination depth used when `next_page_selector` is set without `max_depth`
pub const DEFAULT_MAX_DEPTH_WITH_PAGINATION: u32 = 5;

/// Wait for new content after clicking load-more (milliseconds)
pub const DEFAULT_WAIT_AFTER_LOAD_MORE_MS: u64 = 3000;

/// Overall per-site browser budget (seconds)
pub const DEFAULT_BROWSER_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Snapshot root when no product container selector is configured
pub const DEFAULT_CONTAINER_SELECTOR: &str = "body";

/// Settle time between scrolling the load-more control and clicking it
pub const SCROLL_SETTLE_MS: u64 = 1000;

/// Browser viewport used for every site
pub const VIEWPORT_WIDTH: u32 = 1280;
pub const VIEWPORT_HEIGHT: u32 = 800;

/// Result channel slots reserved per configured site
pub const DEFAULT_CHANNEL_CAPACITY_PER_SITE: usize = 200;
