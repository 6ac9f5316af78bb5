//! # Result sink
//!
//! Persistence seam for finished site buckets. Exports run after the
//! collector has drained, with a bounded number in flight; one site's
//! failure never blocks another's export.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use super::collector::SiteBucket;
use crate::domain::ProductRecord;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize records: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink rejected records for '{site}': {reason}")]
    Rejected { site: String, reason: String },
}

/// Consumes one site's final records
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist `records` for `site`, returning where they went
    async fn store(&self, site: &str, records: &[ProductRecord]) -> Result<String, SinkError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    Exported { location: String },
    /// Nothing to export; the sink was not called
    SkippedEmpty,
    Failed { reason: String },
}

impl ExportStatus {
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub site: String,
    pub records: usize,
    pub status: ExportStatus,
}

/// Export every non-empty bucket, at most `concurrency` at a time.
/// Outcomes come back in bucket order.
pub async fn export_buckets(sink: Arc<dyn ResultSink>, buckets: Vec<SiteBucket>, concurrency: usize) -> Vec<ExportOutcome> {
    let mut outcomes: Vec<(usize, ExportOutcome)> = stream::iter(buckets.into_iter().enumerate())
        .map(|(index, bucket)| {
            let sink = Arc::clone(&sink);
            async move { (index, export_one(sink.as_ref(), bucket).await) }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

async fn export_one(sink: &dyn ResultSink, bucket: SiteBucket) -> ExportOutcome {
    let records = bucket.len();
    if bucket.is_empty() {
        info!(site = %bucket.site, "No products collected, skipping export");
        return ExportOutcome {
            site: bucket.site,
            records,
            status: ExportStatus::SkippedEmpty,
        };
    }

    let status = match sink.store(&bucket.site, &bucket.records).await {
        Ok(location) => {
            info!(site = %bucket.site, products = records, %location, "Products exported");
            ExportStatus::Exported { location }
        }
        Err(e) => {
            error!(site = %bucket.site, "Failed to export products: {}", e);
            ExportStatus::Failed { reason: e.to_string() }
        }
    };
    ExportOutcome {
        site: bucket.site,
        records,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawling::collector::ResultBuckets;
    use crate::domain::SiteConfig;
    use crate::test_utils::RecordingSink;

    fn buckets() -> Vec<SiteBucket> {
        let sites: Arc<[SiteConfig]> = Arc::from(vec![
            SiteConfig::new("Shop", "https://shop.example/", vec!["shop.example".into()], ".p", ".n", ".c"),
            SiteConfig::new("Mall", "https://mall.example/", vec!["mall.example".into()], ".p", ".n", ".c"),
            SiteConfig::new("Bazaar", "https://bazaar.example/", vec!["bazaar.example".into()], ".p", ".n", ".c"),
        ]);
        let mut buckets = ResultBuckets::new(sites);
        buckets.route(ProductRecord::new("Mug", "5", "", "https://shop.example/mug"));
        buckets.route(ProductRecord::new("Lamp", "40", "", "https://bazaar.example/lamp"));
        buckets.into_buckets()
    }

    #[tokio::test]
    async fn outcomes_follow_bucket_order_and_skip_empty_sites() {
        let sink = RecordingSink::new();
        let outcomes = export_buckets(Arc::new(sink.clone()), buckets(), 3).await;

        let sites: Vec<_> = outcomes.iter().map(|o| o.site.as_str()).collect();
        assert_eq!(sites, ["Shop", "Mall", "Bazaar"]);
        assert_eq!(outcomes[1].status, ExportStatus::SkippedEmpty);
        assert_eq!(
            outcomes[2].status,
            ExportStatus::Exported {
                location: "memory://Bazaar".to_string()
            }
        );
        assert_eq!(sink.calls_for("Mall"), 0);
        assert_eq!(sink.stored().len(), 2);
    }

    #[tokio::test]
    async fn one_failing_export_does_not_block_the_rest() {
        let sink = RecordingSink::new().failing_for("Shop");
        let outcomes = export_buckets(Arc::new(sink.clone()), buckets(), 1).await;

        assert!(outcomes[0].status.is_failure());
        assert_eq!(outcomes[0].records, 1);
        assert!(matches!(outcomes[2].status, ExportStatus::Exported { .. }));
        assert_eq!(sink.calls_for("Bazaar"), 1);
    }
}
