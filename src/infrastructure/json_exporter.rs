//! Pretty-printed JSON file per site
//!
//! Files are named `<site>_<YYYY-MM-DD_HH-MM-SS>_products.json` inside the
//! output directory, which is created when missing.

use async_trait::async_trait;
use chrono::Local;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use crate::crawling::sink::{ResultSink, SinkError};
use crate::domain::ProductRecord;

#[derive(Debug, Clone)]
pub struct JsonFileSink {
    output_dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn file_name(site: &str, stamp: &str) -> String {
        format!("{}_{}_products.json", sanitize_site_name(site), stamp)
    }
}

/// Lowercase, spaces and slashes replaced by underscores
pub fn sanitize_site_name(site: &str) -> String {
    site.to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn store(&self, site: &str, records: &[ProductRecord]) -> Result<String, SinkError> {
        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| SinkError::Io {
                path: self.output_dir.clone(),
                source,
            })?;

        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let path = self.output_dir.join(Self::file_name(site, &stamp));
        let body = serde_json::to_vec_pretty(records)?;
        fs::write(&path, body).await.map_err(|source| SinkError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), records = records.len(), "Wrote JSON export");
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_names_are_sanitized() {
        assert_eq!(sanitize_site_name("Demo Shop/EU"), "demo_shop_eu");
        assert_eq!(
            JsonFileSink::file_name("Demo Shop", "2024-05-01_10-00-00"),
            "demo_shop_2024-05-01_10-00-00_products.json"
        );
    }

    #[tokio::test]
    async fn writes_pretty_json_into_a_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("nested/out"));
        let records = vec![
            ProductRecord::new("Mug", "1299", "Kitchen", "https://shop.example/mug"),
            ProductRecord::new("Plate", "Call for price", "", "https://shop.example/plate"),
        ];

        let location = sink.store("Demo Shop", &records).await.unwrap();
        let path = PathBuf::from(&location);
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("demo_shop_"));
        assert!(file_name.ends_with("_products.json"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  {"));
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["category"], "Kitchen");
        assert!(parsed[1].get("category").is_none());
        assert_eq!(parsed[1]["price"], "Call for price");
    }
}
