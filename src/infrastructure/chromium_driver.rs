//! Headless Chromium page driver
//!
//! Launches one browser per site through `chromiumoxide` and maps the
//! `PageDriver` primitives onto CDP calls. The CDP handler stream is pumped on
//! a dedicated task for the lifetime of the session.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::page_driver::{DriverError, DriverFactory, DriverResult, NodeInfo, PageDriver, ScrollTarget};
use crate::domain::SiteConfig;
use crate::domain::constants::{DEFAULT_POLL_INTERVAL_MS, VIEWPORT_HEIGHT, VIEWPORT_WIDTH};

/// Launches a fresh Chromium instance per site
#[derive(Debug, Clone, Default)]
pub struct ChromiumDriverFactory {
    /// Explicit browser binary; auto-detected when `None`
    pub executable: Option<std::path::PathBuf>,
}

#[async_trait]
impl DriverFactory for ChromiumDriverFactory {
    async fn launch(&self, site: &SiteConfig) -> DriverResult<Box<dyn PageDriver>> {
        let mut builder = BrowserConfig::builder()
            .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", site.user_agent));
        if !site.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(DriverError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler event error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        debug!(site = %site.name, headless = site.headless, "Chromium session started");
        Ok(Box::new(ChromiumDriver {
            browser,
            page,
            handler_task: Some(handler_task),
        }))
    }
}

pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
}

impl ChromiumDriver {
    async fn is_visible(&self, selector: &str) -> DriverResult<bool> {
        let literal = serde_json::to_string(selector).map_err(|e| DriverError::Script(e.to_string()))?;
        let script = format!(
            "(() => {{ const el = document.querySelector({literal}); \
             if (!el) return false; \
             const style = window.getComputedStyle(el); \
             const rect = el.getBoundingClientRect(); \
             return style.visibility !== 'hidden' && style.display !== 'none' \
                 && rect.width > 0 && rect.height > 0; }})()"
        );
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::Script(e.to_string()))?;
        result.into_value::<bool>().map_err(|e| DriverError::Script(e.to_string()))
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str) -> DriverResult<()> {
        self.page.goto(url).await.map_err(|e| DriverError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn wait_visible(&mut self, selector: &str, timeout: Duration) -> DriverResult<()> {
        let started = Instant::now();
        loop {
            if self.is_visible(selector).await? {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(DriverError::NotVisible {
                    selector: selector.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)).await;
        }
    }

    async fn outer_html(&mut self, selector: &str) -> DriverResult<String> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        let html = element.outer_html().await.map_err(|e| DriverError::Interaction {
            operation: "outer_html",
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;
        Ok(html.unwrap_or_default())
    }

    async fn find_nodes(&mut self, selector: &str) -> DriverResult<Vec<NodeInfo>> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| DriverError::Interaction {
                operation: "find_nodes",
                selector: selector.to_string(),
                reason: e.to_string(),
            })?;

        let mut nodes = Vec::with_capacity(elements.len());
        for element in elements {
            let href = element.attribute("href").await.ok().flatten();
            nodes.push(NodeInfo { href });
        }
        Ok(nodes)
    }

    async fn click(&mut self, selector: &str) -> DriverResult<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| DriverError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        element.click().await.map_err(|e| DriverError::Interaction {
            operation: "click",
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn scroll_into_view(&mut self, target: ScrollTarget<'_>) -> DriverResult<()> {
        match target {
            ScrollTarget::Bottom => {
                self.page
                    .evaluate("window.scrollTo(0, document.body.scrollHeight)")
                    .await
                    .map_err(|e| DriverError::Script(e.to_string()))?;
            }
            ScrollTarget::Element(selector) => {
                let element = self
                    .page
                    .find_element(selector)
                    .await
                    .map_err(|_| DriverError::ElementNotFound {
                        selector: selector.to_string(),
                    })?;
                element.scroll_into_view().await.map_err(|e| DriverError::Interaction {
                    operation: "scroll_into_view",
                    selector: selector.to_string(),
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser process wait failed: {}", e);
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}
