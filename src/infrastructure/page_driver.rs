//! Page Driver capability
//!
//! The site state machine only talks to a browser through this trait, so it
//! can be driven by a real Chromium session in production and by a scripted
//! fake in tests. Every operation is fallible; the caller bounds each one by
//! the site's overall deadline.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::SiteConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("No element matches '{selector}'")]
    ElementNotFound { selector: String },

    #[error("Element '{selector}' did not become visible within {timeout:?}")]
    NotVisible { selector: String, timeout: Duration },

    #[error("{operation} on '{selector}' failed: {reason}")]
    Interaction {
        operation: &'static str,
        selector: String,
        reason: String,
    },

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Site deadline exceeded during {operation}")]
    DeadlineExceeded { operation: &'static str },

    #[error("Crawl cancelled during {operation}")]
    Cancelled { operation: &'static str },
}

impl DriverError {
    /// Deadline or cancellation: nothing further can be done with this session
    pub const fn ends_session(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. } | Self::Cancelled { .. })
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Where to scroll before clicking the load-more control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollTarget<'a> {
    Bottom,
    Element(&'a str),
}

/// Lightweight view of a matched node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    pub href: Option<String>,
}

/// Browser-style interaction primitives for one page session
#[async_trait]
pub trait PageDriver: Send {
    async fn navigate(&mut self, url: &str) -> DriverResult<()>;

    /// Resolve once `selector` matches a rendered, visible element
    async fn wait_visible(&mut self, selector: &str, timeout: Duration) -> DriverResult<()>;

    async fn outer_html(&mut self, selector: &str) -> DriverResult<String>;

    async fn find_nodes(&mut self, selector: &str) -> DriverResult<Vec<NodeInfo>>;

    async fn click(&mut self, selector: &str) -> DriverResult<()>;

    async fn scroll_into_view(&mut self, target: ScrollTarget<'_>) -> DriverResult<()>;

    async fn sleep(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Release the browser session. Errors are logged by implementations.
    async fn close(&mut self) {}
}

/// Creates one page session per site
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(&self, site: &SiteConfig) -> DriverResult<Box<dyn PageDriver>>;
}
