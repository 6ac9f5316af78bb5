//! Command-line entry point
//!
//! Loads settings and site configurations, crawls every site once, writes one
//! JSON file per site with products, and exits non-zero when any export
//! failed. Ctrl-C stops the sites early; whatever they collected is still
//! exported.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ecom_crawler::crawling::{CrawlOrchestrator, CrawlReport, ExportStatus};
use ecom_crawler::infrastructure::{
    CrawlerSettings, DriverFactory, HttpClient, JsonFileSink, RobotsChecker, init_logging, load_site_configs,
};

#[derive(Parser, Debug)]
#[command(name = "ecom-crawler", version, about = "Browser-driven e-commerce product crawler")]
struct Cli {
    /// JSON array of site configurations
    #[arg(long, default_value = "./site_configs.json")]
    config: PathBuf,

    /// Output directory for the per-site JSON files
    #[arg(long)]
    output: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace) [default: info]
    #[arg(long)]
    loglevel: Option<String>,

    /// Optional application settings file (JSON, TOML or YAML)
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut settings = CrawlerSettings::load(cli.settings.as_deref()).context("Failed to load application settings")?;
    if let Some(level) = cli.loglevel {
        settings.logging.level = level;
    }
    if let Some(output) = cli.output {
        settings.output_dir = output;
    }
    let _log_guard = init_logging(&settings.logging)?;

    let sites = load_site_configs(&cli.config)
        .await
        .with_context(|| format!("Failed to load site configs from {}", cli.config.display()))?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping sites and exporting what was collected");
                cancel.cancel();
            }
        });
    }

    let sink = Arc::new(JsonFileSink::new(&settings.output_dir));
    let mut orchestrator = CrawlOrchestrator::new(sites, driver_factory()?, sink, settings.orchestrator.clone())?
        .with_cancellation(cancel);
    if settings.orchestrator.respect_robots_txt {
        let client = HttpClient::new(settings.http.clone())?;
        orchestrator = orchestrator.with_robots(Arc::new(RobotsChecker::new(client)));
    }

    let report = orchestrator.run().await?;
    log_summary(&report);

    Ok(if report.has_export_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(feature = "chromium")]
fn driver_factory() -> Result<Arc<dyn DriverFactory>> {
    Ok(Arc::new(ecom_crawler::infrastructure::ChromiumDriverFactory::default()))
}

#[cfg(not(feature = "chromium"))]
fn driver_factory() -> Result<Arc<dyn DriverFactory>> {
    anyhow::bail!("built without the `chromium` feature, no page driver available")
}

fn log_summary(report: &CrawlReport) {
    for site in &report.sites {
        match (&site.crawl.result, &site.export) {
            (Err(e), _) => warn!(site = %site.crawl.site, "Failed: {}", e),
            (Ok(reason), ExportStatus::Exported { location }) => info!(
                site = %site.crawl.site,
                products = site.collected,
                %reason,
                "Exported to {}", location
            ),
            (Ok(reason), ExportStatus::SkippedEmpty) => info!(site = %site.crawl.site, %reason, "No products found"),
            (Ok(_), ExportStatus::Failed { reason }) => error!(site = %site.crawl.site, "Export failed: {}", reason),
        }
    }
    info!(
        run_id = %report.run_id,
        products = report.total_collected(),
        export_failures = report.export_failures(),
        "Crawl finished"
    );
}
