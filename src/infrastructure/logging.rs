//! Logging system configuration and initialization
//!
//! Console output with a local timestamp, plus an optional daily-rolling file
//! (plain or JSON) written through a non-blocking appender. The returned
//! `WorkerGuard` must be held until the process exits or buffered file lines
//! are lost.

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

pub const LOG_FILE_NAME: &str = "ecom-crawler.log";

/// Dependencies that flood the output below `trace`
const NOISY_TARGETS: &[(&str, &str)] = &[
    ("chromiumoxide", "error"),
    ("tungstenite", "warn"),
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("h2", "warn"),
    ("reqwest", "info"),
    ("html5ever", "warn"),
    ("selectors", "warn"),
];

/// `YYYY-MM-DD HH:MM:SS` in the local timezone
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Build the level filter. `rust_log` (normally `RUST_LOG`) replaces the
/// configured level entirely when set.
pub fn build_filter(config: &LoggingConfig, rust_log: Option<&str>) -> Result<EnvFilter> {
    if let Some(directives) = rust_log.filter(|s| !s.trim().is_empty()) {
        return EnvFilter::try_new(directives).with_context(|| format!("Invalid RUST_LOG value '{directives}'"));
    }

    let level = config.level.trim().to_lowercase();
    let mut filter = EnvFilter::try_new(&level).with_context(|| format!("Invalid log level '{level}'"))?;
    if level != "trace" {
        for (target, target_level) in NOISY_TARGETS {
            filter = filter.add_directive(format!("{target}={target_level}").parse()?);
        }
    }
    for (target, target_level) in &config.module_filters {
        let directive = format!("{target}={target_level}");
        filter = filter.add_directive(
            directive
                .parse()
                .with_context(|| format!("Invalid module filter '{directive}'"))?,
        );
    }
    Ok(filter)
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(config, rust_log.as_deref())?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if config.console_output {
        layers.push(
            fmt::Layer::new()
                .with_writer(std::io::stdout)
                .with_timer(LocalTimeFormatter)
                .with_target(false)
                .boxed(),
        );
    }

    if config.file_output {
        std::fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("Failed to create log directory {}", config.log_dir.display()))?;
        let (writer, file_guard) = non_blocking(rolling::daily(&config.log_dir, LOG_FILE_NAME));
        guard = Some(file_guard);

        let file_layer = if config.json_format {
            fmt::Layer::new()
                .json()
                .with_writer(writer)
                .with_timer(LocalTimeFormatter)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::Layer::new()
                .with_writer(writer)
                .with_timer(LocalTimeFormatter)
                .with_target(false)
                .with_ansi(false)
                .boxed()
        };
        layers.push(file_layer);
    }

    if layers.is_empty() {
        return Err(anyhow!("No logging output configured"));
    }

    Registry::default()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    info!(
        level = %config.level,
        console = config.console_output,
        file = config.file_output,
        json = config.json_format,
        "Logging system initialized"
    );
    if config.file_output {
        info!("Log directory: {}", config.log_dir.display());
    }
    Ok(guard)
}
