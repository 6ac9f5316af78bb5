//! HTML parsing infrastructure
//!
//! Text normalization and the selector-driven product extractor that turns a
//! listing snapshot into candidate `ProductRecord`s.

pub mod error;
pub mod product_extractor;
pub mod text_normalizer;

// Re-export public types
pub use error::{ParsingError, ParsingResult};
pub use product_extractor::{ExtractionSummary, ProductExtractor};
pub use text_normalizer::{clean_text, extract_category, extract_price};
