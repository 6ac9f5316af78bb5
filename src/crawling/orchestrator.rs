//! # Crawl Orchestrator
//!
//! Runs one site task per configuration concurrently, fans their records
//! into a bounded channel drained by a single collector, and exports the
//! frozen buckets once every site has finished.
//!
//! Ordering: all site tasks are joined, then the last sender is dropped,
//! then the collector is awaited. The channel is therefore closed exactly
//! once and never while a producer can still send.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::collector::{CollectorStats, ResultBuckets, run_collector};
use super::site_crawler::{SiteCrawlError, SiteCrawlOutcome, SiteTask};
use super::sink::{ExportOutcome, ExportStatus, ResultSink, export_buckets};
use crate::domain::SiteConfig;
use crate::infrastructure::config::OrchestratorSettings;
use crate::infrastructure::page_driver::DriverFactory;
use crate::infrastructure::robots::RobotsChecker;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("No sites to crawl")]
    NoSites,

    #[error("Result collector failed: {0}")]
    CollectorFailed(String),
}

/// Per-site line of the run report
#[derive(Debug, Clone)]
pub struct SiteReport {
    pub crawl: SiteCrawlOutcome,
    /// Records left in the site's bucket after routing
    pub collected: usize,
    pub export: ExportStatus,
}

/// Aggregate result of one orchestration run
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub run_id: Uuid,
    /// One entry per configured site, in configuration order
    pub sites: Vec<SiteReport>,
    pub collector: CollectorStats,
}

impl CrawlReport {
    pub fn site(&self, name: &str) -> Option<&SiteReport> {
        self.sites.iter().find(|s| s.crawl.site == name)
    }

    pub fn total_collected(&self) -> usize {
        self.sites.iter().map(|s| s.collected).sum()
    }

    pub fn export_failures(&self) -> usize {
        self.sites.iter().filter(|s| s.export.is_failure()).count()
    }

    pub fn has_export_failures(&self) -> bool {
        self.export_failures() > 0
    }

    pub fn fatal_sites(&self) -> impl Iterator<Item = &SiteReport> {
        self.sites.iter().filter(|s| s.crawl.is_fatal())
    }
}

pub struct CrawlOrchestrator {
    sites: Arc<[SiteConfig]>,
    factory: Arc<dyn DriverFactory>,
    sink: Arc<dyn ResultSink>,
    robots: Option<Arc<RobotsChecker>>,
    settings: OrchestratorSettings,
    cancel: CancellationToken,
}

impl CrawlOrchestrator {
    pub fn new(
        sites: Vec<SiteConfig>,
        factory: Arc<dyn DriverFactory>,
        sink: Arc<dyn ResultSink>,
        settings: OrchestratorSettings,
    ) -> Result<Self, OrchestratorError> {
        if sites.is_empty() {
            return Err(OrchestratorError::NoSites);
        }
        Ok(Self {
            sites: Arc::from(sites),
            factory,
            sink,
            robots: None,
            settings,
            cancel: CancellationToken::new(),
        })
    }

    /// Gate every site on its robots.txt
    #[must_use]
    pub fn with_robots(mut self, robots: Arc<RobotsChecker>) -> Self {
        self.robots = Some(robots);
        self
    }

    /// Share an externally controlled cancellation token (e.g. Ctrl-C)
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<CrawlReport, OrchestratorError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("crawl_run", %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<CrawlReport, OrchestratorError> {
        let capacity = self
            .settings
            .channel_capacity_per_site
            .max(1)
            .saturating_mul(self.sites.len());
        info!(sites = self.sites.len(), capacity, "Starting crawl run");

        let (tx, rx) = mpsc::channel(capacity);
        let collector = tokio::spawn(run_collector(rx, ResultBuckets::new(Arc::clone(&self.sites))).in_current_span());

        let mut handles = Vec::with_capacity(self.sites.len());
        for site in self.sites.iter() {
            let span = info_span!("site", site = %site.name, url = %site.base_url);
            let task = SiteTask {
                site: Arc::new(site.clone()),
                factory: Arc::clone(&self.factory),
                robots: if self.settings.respect_robots_txt {
                    self.robots.clone()
                } else {
                    None
                },
                results: tx.clone(),
                cancel: self.cancel.clone(),
            };
            handles.push((site.name.clone(), tokio::spawn(task.run().instrument(span))));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(site = %name, "Site task aborted: {}", e);
                    SiteCrawlOutcome {
                        site: name,
                        records_sent: 0,
                        passes: 0,
                        clicks: 0,
                        pages: 0,
                        result: Err(SiteCrawlError::Aborted(e.to_string())),
                    }
                }
            };
            outcomes.push(outcome);
        }
        info!("All site tasks finished, closing result channel");
        drop(tx);

        let buckets = collector
            .await
            .map_err(|e| OrchestratorError::CollectorFailed(e.to_string()))?;
        let collector_stats = buckets.stats();
        let buckets = buckets.into_buckets();
        let collected: Vec<usize> = buckets.iter().map(|b| b.len()).collect();

        let exports = export_buckets(Arc::clone(&self.sink), buckets, self.settings.export_concurrency).await;

        let sites = outcomes
            .into_iter()
            .zip(collected)
            .zip(exports)
            .map(|((crawl, collected), ExportOutcome { status, .. })| SiteReport {
                crawl,
                collected,
                export: status,
            })
            .collect::<Vec<_>>();

        let report = CrawlReport {
            run_id,
            sites,
            collector: collector_stats,
        };
        for failed in report.fatal_sites() {
            if let Err(e) = &failed.crawl.result {
                warn!(site = %failed.crawl.site, "Site produced no results: {}", e);
            }
        }
        info!(
            products = report.total_collected(),
            export_failures = report.export_failures(),
            "Crawl run complete"
        );
        Ok(report)
    }
}
