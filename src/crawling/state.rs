//! # Site Crawl State
//!
//! Per-site accumulator owned by exactly one site task. It is never shared,
//! so no locking is involved; the records leave it only when the task
//! flushes them onto the result channel.

use std::collections::HashSet;

use crate::domain::{ProductKey, ProductRecord};
use crate::infrastructure::parsing::product_extractor::RecordAccumulator;

#[derive(Debug, Default)]
pub struct SiteCrawlState {
    /// Accepted records in extraction order
    records: Vec<ProductRecord>,
    seen: HashSet<ProductKey>,
    /// Successful extraction passes
    pub passes: u32,
    /// Successful load-more clicks
    pub clicks: u32,
    /// Listing pages loaded (initial page included)
    pub pages: u32,
    /// URL of the listing page currently rendered
    pub current_url: String,
    visited: HashSet<String>,
}

impl SiteCrawlState {
    pub fn new(start_url: &str) -> Self {
        Self {
            current_url: start_url.to_string(),
            ..Self::default()
        }
    }

    pub fn records(&self) -> &[ProductRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record that `url` is now the rendered listing page.
    /// Returns false when it had already been visited.
    pub fn enter_page(&mut self, url: &str) -> bool {
        if !self.visited.insert(url.to_string()) {
            return false;
        }
        self.current_url = url.to_string();
        self.pages += 1;
        true
    }

    pub fn has_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }

    /// Hand over the records; the state is left empty
    pub fn take_records(&mut self) -> Vec<ProductRecord> {
        self.seen.clear();
        std::mem::take(&mut self.records)
    }
}

impl RecordAccumulator for SiteCrawlState {
    fn insert_if_new(&mut self, record: ProductRecord) -> bool {
        if !self.seen.insert(record.key()) {
            return false;
        }
        self.records.push(record);
        true
    }
}
