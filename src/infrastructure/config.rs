//! Configuration infrastructure
//!
//! Two sources:
//! 1. Site configurations: a JSON array of `SiteConfig` objects, defaulted
//!    and validated before any crawl starts.
//! 2. Application settings: output location, logging, orchestration limits
//!    and the HTTP client, layered from an optional file and
//!    `ECOM_CRAWLER__*` environment variables.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use super::http_client::HttpClientConfig;
use super::parsing::{ParsingError, ProductExtractor};
use crate::domain::SiteConfig;
use crate::domain::constants::DEFAULT_CHANNEL_CAPACITY_PER_SITE;

pub const ENV_PREFIX: &str = "ECOM_CRAWLER";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration for site '{site}': {problems}")]
    InvalidSite { site: String, problems: String },

    #[error("Invalid selector for site '{site}': {source}")]
    InvalidSelector {
        site: String,
        #[source]
        source: ParsingError,
    },

    #[error("Site name '{0}' is configured more than once")]
    DuplicateSite(String),

    #[error("No sites configured in {0}")]
    NoSites(PathBuf),

    #[error("Invalid application settings: {0}")]
    Settings(#[from] config::ConfigError),
}

/// Read, default and validate the site list at `path`
pub async fn load_site_configs(path: impl AsRef<Path>) -> Result<Vec<SiteConfig>, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let sites = parse_site_configs(&content, path)?;
    info!("Loaded {} site configs from {}", sites.len(), path.display());
    Ok(sites)
}

/// Parse a JSON array of site configs; `origin` is only used in errors
pub fn parse_site_configs(content: &str, origin: &Path) -> Result<Vec<SiteConfig>, ConfigError> {
    let mut sites: Vec<SiteConfig> = serde_json::from_str(content).map_err(|source| ConfigError::Parse {
        path: origin.to_path_buf(),
        source,
    })?;
    if sites.is_empty() {
        return Err(ConfigError::NoSites(origin.to_path_buf()));
    }

    let mut names = HashSet::new();
    for site in &mut sites {
        site.apply_defaults();
        validate_site(site)?;
        if !names.insert(site.name.clone()) {
            return Err(ConfigError::DuplicateSite(site.name.clone()));
        }
        debug!(
            site = %site.name,
            parallelism = site.parallelism,
            async_requests = site.async_requests,
            "Site config ready"
        );
    }
    Ok(sites)
}

/// Check the invariants and make sure every selector compiles
pub fn validate_site(site: &SiteConfig) -> Result<(), ConfigError> {
    let problems = site.validation_problems();
    if !problems.is_empty() {
        return Err(ConfigError::InvalidSite {
            site: site.name.clone(),
            problems: problems.join("; "),
        });
    }

    let invalid = |source| ConfigError::InvalidSelector {
        site: site.name.clone(),
        source,
    };
    ProductExtractor::from_site(site).map_err(invalid)?;

    let optional = [
        ("next_page_selector", site.next_page_selector()),
        ("load_more_button_selector", site.load_more_selector()),
        ("product_container_selector", Some(site.container_selector())),
    ];
    for (field, selector) in optional {
        if let Some(selector) = selector {
            scraper::Selector::parse(selector)
                .map_err(|e| invalid(ParsingError::invalid_selector(field, selector, e)))?;
        }
    }
    Ok(())
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerSettings {
    /// Directory the JSON exporter writes into
    pub output_dir: PathBuf,
    pub logging: LoggingConfig,
    pub orchestrator: OrchestratorSettings,
    pub http: HttpClientConfig,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output_data"),
            logging: LoggingConfig::default(),
            orchestrator: OrchestratorSettings::default(),
            http: HttpClientConfig::default(),
        }
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    /// Directory for the rolling log file
    pub log_dir: PathBuf,

    /// Per-target level overrides, e.g. `"chromiumoxide": "error"`
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: PathBuf::from("logs"),
            module_filters: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Result channel slots per configured site
    pub channel_capacity_per_site: usize,
    /// Sites exported concurrently once crawling is done
    pub export_concurrency: usize,
    /// Consult robots.txt before crawling a site
    pub respect_robots_txt: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            channel_capacity_per_site: DEFAULT_CHANNEL_CAPACITY_PER_SITE,
            export_concurrency: 1,
            respect_robots_txt: true,
        }
    }
}

impl CrawlerSettings {
    /// Layer defaults, the optional settings file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Same as [`load`](Self::load) with an explicit environment snapshot
    /// (`None` reads the process environment)
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let environment = Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(env);
        let settings: Self = builder.add_source(environment).build()?.try_deserialize()?;
        Ok(settings.sanitized())
    }

    fn sanitized(mut self) -> Self {
        self.orchestrator.channel_capacity_per_site = self.orchestrator.channel_capacity_per_site.max(1);
        self.orchestrator.export_concurrency = self.orchestrator.export_concurrency.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SITES: &str = r#"[
        {
            "name": "Demo Shop",
            "base_url": "https://shop.example/cat",
            "allowed_domains": ["shop.example"],
            "product_selector": "li.product",
            "name_selector": ".title",
            "price_selector": ".price",
            "next_page_selector": "a.next",
            "chromedp_timeout_sec": 30,
            "async": true
        },
        {
            "name": "Other",
            "base_url": "https://other.example/",
            "allowed_domains": ["other.example"],
            "product_selector": ".item",
            "name_selector": "h2",
            "price_selector": ".cost",
            "headless": false,
            "delay_ms": 250,
            "user_agent": "CustomBot/1.0"
        }
    ]"#;

    #[test]
    fn site_defaults_are_applied() {
        let sites = parse_site_configs(SITES, Path::new("sites.json")).unwrap();
        assert_eq!(sites.len(), 2);

        let demo = &sites[0];
        assert!(demo.user_agent.starts_with("EcomCrawler/1.0"));
        assert_eq!(demo.delay_ms, 1000);
        assert_eq!(demo.parallelism, 2);
        assert_eq!(demo.max_depth, 5);
        assert!(demo.headless);
        assert_eq!(demo.browser_timeout_sec, 30);
        assert!(demo.async_requests);
        assert_eq!(demo.product_container_selector, "body");

        let other = &sites[1];
        assert_eq!(other.max_depth, 0);
        assert_eq!(other.delay_ms, 250);
        assert!(!other.headless);
        assert_eq!(other.user_agent, "CustomBot/1.0");
    }

    #[test]
    fn empty_list_is_rejected() {
        let err = parse_site_configs("[]", Path::new("sites.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NoSites(_)));
    }

    #[test]
    fn missing_domains_name_the_site() {
        let json = r#"[{"name": "Bare", "base_url": "https://bare.example", "product_selector": "a",
                        "name_selector": "b", "price_selector": "c"}]"#;
        let err = parse_site_configs(json, Path::new("sites.json")).unwrap_err();
        match err {
            ConfigError::InvalidSite { site, problems } => {
                assert_eq!(site, "Bare");
                assert!(problems.contains("allowed_domains"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_load_more_selector_is_rejected() {
        let json = r#"[{"name": "Bad", "base_url": "https://bad.example", "allowed_domains": ["bad.example"],
                        "product_selector": ".p", "name_selector": ".n", "price_selector": ".c",
                        "load_more_button_selector": "button[["}]"#;
        let err = parse_site_configs(json, Path::new("sites.json")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSelector { ref site, .. } if site == "Bad"));
    }

    #[test]
    fn duplicate_site_names_are_rejected() {
        let json = format!(
            "[{0},{0}]",
            r#"{"name": "Twice", "base_url": "https://t.example", "allowed_domains": ["t.example"],
                "product_selector": ".p", "name_selector": ".n", "price_selector": ".c"}"#
        );
        let err = parse_site_configs(&json, Path::new("sites.json")).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSite(ref name) if name == "Twice"));
    }

    #[tokio::test]
    async fn loads_sites_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SITES.as_bytes()).unwrap();

        let sites = load_site_configs(file.path()).await.unwrap();
        assert_eq!(sites[1].name, "Other");

        let missing = load_site_configs("/definitely/not/here.json").await.unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn settings_default_without_sources() {
        let settings = CrawlerSettings::load_with_env(None, Some(HashMap::new())).unwrap();
        assert_eq!(settings.output_dir, PathBuf::from("output_data"));
        assert_eq!(settings.orchestrator.channel_capacity_per_site, 200);
        assert_eq!(settings.orchestrator.export_concurrency, 1);
        assert_eq!(settings.http.timeout_seconds, 30);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn settings_layer_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"output_dir": "from_file", "logging": {"level": "debug"}, "orchestrator": {"export_concurrency": 4}}"#)
            .unwrap();

        let env = HashMap::from([
            ("ECOM_CRAWLER__OUTPUT_DIR".to_string(), "from_env".to_string()),
            ("ECOM_CRAWLER__HTTP__MAX_REQUESTS_PER_SECOND".to_string(), "5".to_string()),
        ]);
        let settings = CrawlerSettings::load_with_env(Some(file.path()), Some(env)).unwrap();

        assert_eq!(settings.output_dir, PathBuf::from("from_env"));
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.orchestrator.export_concurrency, 4);
        assert_eq!(settings.http.max_requests_per_second, 5);
    }
}
