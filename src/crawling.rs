//! # Crawling
//!
//! Per-site state machine, result collection and the orchestrator that ties
//! them together:
//! - `state`: site-scoped deduplicating accumulator
//! - `site_crawler`: load-more / next-page state machine for one site
//! - `collector`: single-writer per-site buckets with domain routing
//! - `sink`: persistence seam and export fan-out
//! - `orchestrator`: concurrent run over every configured site

pub mod collector;
pub mod orchestrator;
pub mod site_crawler;
pub mod sink;
pub mod state;

pub use collector::{CollectorStats, ResultBuckets, SiteBucket};
pub use orchestrator::{CrawlOrchestrator, CrawlReport, OrchestratorError, SiteReport};
pub use site_crawler::{CrawlPhase, SiteCrawlError, SiteCrawlOutcome, SiteCrawler, SiteTask, StopReason};
pub use sink::{ExportOutcome, ExportStatus, ResultSink, SinkError};
pub use state::SiteCrawlState;
