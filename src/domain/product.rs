use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Product record extracted from one listing snapshot
///
/// Records are immutable once created. `price` is the normalized,
/// numeric-leaning token produced by the text normalizer and is not
/// guaranteed to parse as a number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub name: String,
    pub price: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    pub source_url: String,
    pub scraped_at: DateTime<Utc>,
}

/// Identity tuple used for deduplication: (name, price, source URL)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductKey {
    pub name: String,
    pub price: String,
    pub source_url: String,
}

impl ProductRecord {
    /// Create a record stamped with the current UTC time
    pub fn new(
        name: impl Into<String>,
        price: impl Into<String>,
        category: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            price: price.into(),
            category: category.into(),
            source_url: source_url.into(),
            scraped_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ProductKey {
        ProductKey {
            name: self.name.clone(),
            price: self.price.clone(),
            source_url: self.source_url.clone(),
        }
    }

    /// True when both records carry the same identity tuple.
    /// Category and timestamp do not take part in identity.
    pub fn same_identity(&self, other: &Self) -> bool {
        self.name == other.name && self.price == other.price && self.source_url == other.source_url
    }
}
