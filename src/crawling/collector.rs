//! # Result collector
//!
//! The single consumer of the result channel and the only writer of the
//! per-site buckets. A record is routed to the first site whose allowed
//! domains own its URL host; records no site owns are dropped.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::domain::{ProductKey, ProductRecord, SiteConfig};

/// Records collected for one site, in arrival order
#[derive(Debug, Clone)]
pub struct SiteBucket {
    pub site: String,
    pub records: Vec<ProductRecord>,
    seen: HashSet<ProductKey>,
}

impl SiteBucket {
    fn new(site: &str) -> Self {
        Self {
            site: site.to_string(),
            records: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Appended to the bucket at this index
    Added(usize),
    Duplicate(usize),
    /// No site owns the record's host
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorStats {
    pub received: usize,
    pub added: usize,
    pub duplicates: usize,
    pub dropped: usize,
}

/// Per-site buckets in configuration order
#[derive(Debug)]
pub struct ResultBuckets {
    sites: Arc<[SiteConfig]>,
    buckets: Vec<SiteBucket>,
    stats: CollectorStats,
}

impl ResultBuckets {
    /// One empty bucket per configured site
    pub fn new(sites: Arc<[SiteConfig]>) -> Self {
        let buckets = sites.iter().map(|site| SiteBucket::new(&site.name)).collect();
        Self {
            sites,
            buckets,
            stats: CollectorStats::default(),
        }
    }

    /// Index of the first site owning `url`'s host
    pub fn route_target(&self, url: &str) -> Option<usize> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        self.sites.iter().position(|site| site.owns_host(host))
    }

    pub fn route(&mut self, record: ProductRecord) -> Routed {
        self.stats.received += 1;
        let Some(index) = self.route_target(&record.source_url) else {
            debug!(url = %record.source_url, "Dropping record outside every allowed domain");
            self.stats.dropped += 1;
            return Routed::Dropped;
        };

        let bucket = &mut self.buckets[index];
        if !bucket.seen.insert(record.key()) {
            self.stats.duplicates += 1;
            return Routed::Duplicate(index);
        }
        bucket.records.push(record);
        self.stats.added += 1;
        Routed::Added(index)
    }

    pub fn get(&self, site: &str) -> Option<&SiteBucket> {
        self.buckets.iter().find(|bucket| bucket.site == site)
    }

    pub const fn stats(&self) -> CollectorStats {
        self.stats
    }

    /// Freeze the buckets, configuration order preserved
    pub fn into_buckets(self) -> Vec<SiteBucket> {
        self.buckets
    }
}

/// Drain `results` until every sender is gone
pub async fn run_collector(mut results: mpsc::Receiver<ProductRecord>, mut buckets: ResultBuckets) -> ResultBuckets {
    while let Some(record) = results.recv().await {
        buckets.route(record);
    }
    let stats = buckets.stats();
    info!(
        received = stats.received,
        added = stats.added,
        duplicates = stats.duplicates,
        dropped = stats.dropped,
        "Result channel closed, collection complete"
    );
    buckets
}
