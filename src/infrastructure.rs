//! Infrastructure layer: configuration, logging, parsing and external integrations
//!
//! The browser, the HTTP client and the output files live here; the crawl
//! logic in `crawling` only sees them through traits.

pub mod config;
pub mod http_client;
pub mod json_exporter;
pub mod logging;
pub mod page_driver;
pub mod parsing;
pub mod parsing_error;
pub mod robots;

#[cfg(feature = "chromium")]
pub mod chromium_driver;

// Re-export commonly used items
pub use self::config::{ConfigError, CrawlerSettings, LoggingConfig, OrchestratorSettings, load_site_configs};
pub use http_client::{HttpClient, HttpClientConfig};
pub use json_exporter::JsonFileSink;
pub use logging::init_logging;
pub use page_driver::{DriverError, DriverFactory, DriverResult, NodeInfo, PageDriver, ScrollTarget};
pub use parsing::{ParsingError, ParsingResult, ProductExtractor};
pub use robots::{RobotsChecker, RobotsTxt};

#[cfg(feature = "chromium")]
pub use chromium_driver::{ChromiumDriver, ChromiumDriverFactory};
