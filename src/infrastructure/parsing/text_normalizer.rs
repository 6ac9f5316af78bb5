//! Text and price normalization
//!
//! Pure functions, total over their input. The price rule strips both `,`
//! and `.` from the first numeric run, which merges thousands separators and
//! decimal points (`"19.99"` becomes `"1999"`). Callers and downstream
//! consumers rely on exactly this token, so it is kept as-is.

use once_cell::sync::Lazy;
use regex::Regex;

static NUMERIC_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9.,]+").expect("numeric run pattern is valid"));

/// How a price token was obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceTokenKind {
    /// Digits only, grouping punctuation removed
    Numeric,
    /// The stripped run did not parse; the raw numeric run is returned
    RawMatch { stripped: String },
    /// No numeric run at all; the cleaned input is returned
    NoNumber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceExtraction {
    pub token: String,
    pub kind: PriceTokenKind,
}

/// Trim and collapse every whitespace run (newlines and tabs included) to one space.
pub fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the canonical price token from a raw price string.
pub fn extract_price(raw: &str) -> String {
    parse_price(raw).token
}

/// Same as [`extract_price`], also reporting which branch produced the token.
pub fn parse_price(raw: &str) -> PriceExtraction {
    let cleaned = clean_text(raw);
    let Some(found) = NUMERIC_RUN.find(&cleaned) else {
        return PriceExtraction {
            token: cleaned,
            kind: PriceTokenKind::NoNumber,
        };
    };

    let matched = found.as_str();
    let stripped: String = matched.chars().filter(|c| *c != ',' && *c != '.').collect();
    if stripped.parse::<f64>().is_ok() {
        PriceExtraction {
            token: stripped,
            kind: PriceTokenKind::Numeric,
        }
    } else {
        PriceExtraction {
            token: matched.to_string(),
            kind: PriceTokenKind::RawMatch { stripped },
        }
    }
}

/// Category text is normalized like any other text node.
pub fn extract_category(raw: &str) -> String {
    clean_text(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("  Blue   Mug \n\t Large ", "Blue Mug Large")]
    #[case("\n\n", "")]
    #[case("single", "single")]
    #[case("a\u{00a0}b", "a b")]
    fn clean_text_collapses_whitespace(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(clean_text(input), expected);
    }

    #[rstest]
    #[case("  $1,234.56 \n", "123456")]
    #[case("19.99 EUR", "1999")]
    #[case("1.234,56 €", "123456")]
    #[case("Now 15, was 20", "15")]
    #[case("Call for price", "Call for price")]
    #[case("  Sold \n out ", "Sold out")]
    #[case("", "")]
    fn extract_price_applies_the_stripping_rule(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(extract_price(input), expected);
    }

    #[test]
    fn punctuation_only_run_falls_back_to_raw_match() {
        let result = parse_price("price: ...");
        assert_eq!(result.token, "...");
        assert_eq!(
            result.kind,
            PriceTokenKind::RawMatch {
                stripped: String::new()
            }
        );
    }

    #[test]
    fn missing_number_is_reported() {
        assert_eq!(parse_price("Call for price").kind, PriceTokenKind::NoNumber);
        assert_eq!(parse_price("$5").kind, PriceTokenKind::Numeric);
    }

    #[test]
    fn category_is_cleaned_text() {
        assert_eq!(extract_category(" Home >  Kitchen "), "Home > Kitchen");
    }

    proptest! {
        #[test]
        fn clean_text_is_idempotent(s in "\\PC*") {
            let once = clean_text(&s);
            prop_assert_eq!(clean_text(&once), once.clone());
            prop_assert!(!once.contains("  "));
            prop_assert_eq!(once.trim(), once.as_str());
        }

        #[test]
        fn numeric_tokens_are_digits(s in "[a-z $]{0,5}[0-9]{1,6}([.,][0-9]{1,3}){0,2}[a-z ]{0,5}") {
            let token = extract_price(&s);
            prop_assert!(token.chars().all(|c| c.is_ascii_digit()));
            prop_assert!(!token.is_empty());
        }
    }
}
