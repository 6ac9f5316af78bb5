//! Domain module - product records and site configuration
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod constants;
pub mod product;
pub mod site_config;

pub use product::{ProductKey, ProductRecord};
pub use site_config::SiteConfig;
