//! Selector-driven product extraction
//!
//! Turns one HTML snapshot of a listing into product records, resolving
//! product links against the page URL. Deduplication happens against a
//! caller-owned accumulator, so repeated snapshots of a growing listing only
//! contribute the products that were not seen before.

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::text_normalizer::{PriceTokenKind, clean_text, extract_category, parse_price};
use super::{ParsingError, ParsingResult};
use crate::domain::{ProductRecord, SiteConfig};

/// Anything that can take net-new records and reject repeats
pub trait RecordAccumulator {
    /// Append `record` unless a record with the same identity is present.
    /// Returns whether it was appended.
    fn insert_if_new(&mut self, record: ProductRecord) -> bool;
}

impl RecordAccumulator for Vec<ProductRecord> {
    fn insert_if_new(&mut self, record: ProductRecord) -> bool {
        if self.iter().any(|existing| existing.same_identity(&record)) {
            return false;
        }
        self.push(record);
        true
    }
}

/// Outcome of one extraction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// Product nodes matched by the product selector
    pub matched_nodes: usize,
    /// Nodes skipped because both name and price were empty
    pub skipped: usize,
    /// Records appended to the accumulator
    pub added: usize,
    /// Records already present in the accumulator
    pub duplicates: usize,
}

/// Compiled selectors for one site
#[derive(Debug, Clone)]
pub struct ProductExtractor {
    product: Selector,
    name: Selector,
    price: Selector,
    category: Option<Selector>,
    any_link: Selector,
}

impl ProductExtractor {
    /// Compile the site's selectors; any invalid selector is a configuration error
    pub fn from_site(site: &SiteConfig) -> ParsingResult<Self> {
        Ok(Self {
            product: compile("product_selector", &site.product_selector)?,
            name: compile("name_selector", &site.name_selector)?,
            price: compile("price_selector", &site.price_selector)?,
            category: site
                .category_selector()
                .map(|s| compile("category_selector", s))
                .transpose()?,
            any_link: compile("link", "a[href]")?,
        })
    }

    /// Candidate records of a snapshot in document order, without deduplication
    pub fn extract(&self, html: &str, page_url: &str) -> Vec<ProductRecord> {
        let mut candidates = Vec::new();
        self.for_each_candidate(html, page_url, |record| candidates.push(record));
        candidates
    }

    /// Extract a snapshot into `accumulator`, appending only net-new records
    pub fn extract_into<A>(&self, html: &str, page_url: &str, accumulator: &mut A) -> ExtractionSummary
    where
        A: RecordAccumulator + ?Sized,
    {
        let mut summary = ExtractionSummary::default();
        let (matched, skipped) = self.for_each_candidate(html, page_url, |record| {
            if accumulator.insert_if_new(record) {
                summary.added += 1;
            } else {
                summary.duplicates += 1;
            }
        });
        summary.matched_nodes = matched;
        summary.skipped = skipped;

        if summary.added > 0 {
            info!(
                "Parsed and added {} new unique products from current HTML state ({} duplicates)",
                summary.added, summary.duplicates
            );
        } else {
            debug!(
                "No new products in snapshot ({} nodes, {} duplicates, {} skipped)",
                summary.matched_nodes, summary.duplicates, summary.skipped
            );
        }
        summary
    }

    /// Returns (matched nodes, skipped nodes)
    fn for_each_candidate<F>(&self, html: &str, page_url: &str, mut emit: F) -> (usize, usize)
    where
        F: FnMut(ProductRecord),
    {
        let document = match parse_snapshot(html) {
            Ok(document) => document,
            Err(e) => {
                warn!("Skipping snapshot for {}: {}", page_url, e);
                return (0, 0);
            }
        };

        let mut matched = 0;
        let mut skipped = 0;
        for node in document.select(&self.product) {
            matched += 1;
            match self.record_from_node(node, page_url) {
                Some(record) => emit(record),
                None => skipped += 1,
            }
        }
        (matched, skipped)
    }

    fn record_from_node(&self, node: ElementRef<'_>, page_url: &str) -> Option<ProductRecord> {
        let name_el = node.select(&self.name).next();
        let name = name_el.map(element_text).unwrap_or_default();

        let raw_price = node.select(&self.price).next().map(element_text).unwrap_or_default();
        let price = parse_price(&raw_price);
        match &price.kind {
            PriceTokenKind::NoNumber if !price.token.is_empty() => {
                warn!(original_price = %price.token, "Could not extract numerical value from price string");
            }
            PriceTokenKind::RawMatch { stripped } => {
                warn!(
                    extracted_match = %price.token,
                    cleaned_match = %stripped,
                    "Cleaned price did not parse as a number, keeping raw match"
                );
            }
            _ => {}
        }

        let category = self
            .category
            .as_ref()
            .and_then(|selector| node.select(selector).next())
            .map(|el| extract_category(&el.text().collect::<String>()))
            .unwrap_or_default();

        if name.is_empty() && price.token.is_empty() {
            return None;
        }

        let source_url = match self.product_link(node, name_el) {
            Some(href) => resolve_link(href, page_url).unwrap_or_else(|e| {
                warn!("{}; falling back to page URL", e);
                page_url.to_string()
            }),
            None => page_url.to_string(),
        };

        Some(ProductRecord::new(name, price.token, category, source_url))
    }

    /// Name link, else the name's enclosing link, else the first link in the product node
    fn product_link<'a>(&self, node: ElementRef<'a>, name_el: Option<ElementRef<'a>>) -> Option<&'a str> {
        if let Some(el) = name_el {
            if el.value().name() == "a" {
                if let Some(link) = href(el) {
                    return Some(link);
                }
            } else if let Some(link) = el
                .ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| a.value().name() == "a")
                .and_then(href)
            {
                return Some(link);
            }
        }
        node.select(&self.any_link).find_map(href)
    }
}

fn compile(field: &str, selector: &str) -> ParsingResult<Selector> {
    Selector::parse(selector).map_err(|e| ParsingError::invalid_selector(field, selector, e))
}

fn parse_snapshot(html: &str) -> ParsingResult<Html> {
    if html.trim().is_empty() {
        return Err(ParsingError::HtmlParsingFailed {
            message: "snapshot is empty".to_string(),
        });
    }
    let document = Html::parse_document(html);
    if !document.errors.is_empty() {
        debug!("Snapshot parsed with {} recoverable HTML errors", document.errors.len());
    }
    Ok(document)
}

fn element_text(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<String>())
}

fn href(el: ElementRef<'_>) -> Option<&str> {
    el.value().attr("href").map(str::trim).filter(|h| !h.is_empty())
}

/// Resolve `href` against `page_url` (RFC 3986); absolute links pass through unchanged
pub fn resolve_link(href: &str, page_url: &str) -> ParsingResult<String> {
    if Url::parse(href).is_ok() {
        return Ok(href.to_string());
    }
    let base = Url::parse(page_url).map_err(|e| ParsingError::UrlResolutionFailed {
        url: href.to_string(),
        reason: format!("invalid base URL: {e}"),
        base_url: Some(page_url.to_string()),
    })?;
    base.join(href)
        .map(String::from)
        .map_err(|e| ParsingError::UrlResolutionFailed {
            url: href.to_string(),
            reason: format!("failed to join URL: {e}"),
            base_url: Some(page_url.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://shop.example/cat?p=2";

    fn site() -> SiteConfig {
        let mut cfg = SiteConfig::new(
            "Demo",
            PAGE,
            vec!["shop.example".to_string()],
            "li.product",
            ".title",
            ".price",
        );
        cfg.category_selector = Some(".cat".to_string());
        cfg
    }

    fn listing() -> &'static str {
        r#"<ul id="grid">
            <li class="product"><a class="title" href="/item/42"> Blue
                Mug </a><span class="price">$1,234.56</span><span class="cat"> Kitchen </span></li>
            <li class="product"><a href="https://cdn.example/p/7"><h3 class="title">Plate</h3></a>
                <span class="price">Call for price</span></li>
            <li class="product"><h3 class="title">Bowl</h3><span class="price">9</span>
                <div><a href="bowl.html">details</a></div></li>
            <li class="product"><h3 class="title">Spoon</h3><span class="price">3</span></li>
            <li class="product"><span class="badge">Sale!</span></li>
        </ul>"#
    }

    #[test]
    fn extracts_records_in_document_order() {
        let extractor = ProductExtractor::from_site(&site()).unwrap();
        let records = extractor.extract(listing(), PAGE);

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Blue Mug", "Plate", "Bowl", "Spoon"]);
        assert_eq!(records[0].price, "123456");
        assert_eq!(records[0].category, "Kitchen");
        assert_eq!(records[1].price, "Call for price");
        assert_eq!(records[1].category, "");
    }

    #[test]
    fn resolves_links_through_the_fallback_chain() {
        let extractor = ProductExtractor::from_site(&site()).unwrap();
        let records = extractor.extract(listing(), PAGE);

        assert_eq!(records[0].source_url, "https://shop.example/item/42");
        assert_eq!(records[1].source_url, "https://cdn.example/p/7");
        assert_eq!(records[2].source_url, "https://shop.example/bowl.html");
        assert_eq!(records[3].source_url, PAGE);
    }

    #[test]
    fn resolve_link_follows_rfc3986() {
        assert_eq!(resolve_link("/item/42", PAGE).unwrap(), "https://shop.example/item/42");
        assert_eq!(
            resolve_link("https://other.example/x?y=1", PAGE).unwrap(),
            "https://other.example/x?y=1"
        );
        assert_eq!(resolve_link("../up", "https://shop.example/a/b/c").unwrap(), "https://shop.example/a/up");
        assert!(resolve_link("/x", "not a url").is_err());
    }

    #[test]
    fn decoration_nodes_are_skipped() {
        let extractor = ProductExtractor::from_site(&site()).unwrap();
        let mut acc: Vec<ProductRecord> = Vec::new();
        let summary = extractor.extract_into(listing(), PAGE, &mut acc);

        assert_eq!(summary.matched_nodes, 5);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.added, 4);
    }

    #[test]
    fn re_extracting_the_same_snapshot_adds_nothing() {
        let extractor = ProductExtractor::from_site(&site()).unwrap();
        let mut acc: Vec<ProductRecord> = Vec::new();
        extractor.extract_into(listing(), PAGE, &mut acc);

        let second = extractor.extract_into(listing(), PAGE, &mut acc);
        assert_eq!(second.added, 0);
        assert_eq!(second.duplicates, 4);
        assert_eq!(acc.len(), 4);
    }

    #[test]
    fn empty_snapshot_yields_nothing() {
        let extractor = ProductExtractor::from_site(&site()).unwrap();
        assert!(extractor.extract("   ", PAGE).is_empty());
    }

    #[test]
    fn invalid_selector_names_the_field() {
        let mut cfg = site();
        cfg.price_selector = "span[".to_string();
        let err = ProductExtractor::from_site(&cfg).unwrap_err();

        assert!(matches!(err, ParsingError::InvalidSelector { ref field, .. } if field == "price_selector"));
    }
}
