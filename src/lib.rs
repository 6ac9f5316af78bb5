//! E-commerce product crawler
//!
//! Crawls independently configured shop listings in parallel, one browser
//! session per site, expanding each listing through its load-more control or
//! next-page links, and exports the deduplicated products per site.

pub mod crawling;
pub mod domain;
pub mod infrastructure;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crawling::{CrawlOrchestrator, CrawlReport};
pub use domain::{ProductRecord, SiteConfig};
