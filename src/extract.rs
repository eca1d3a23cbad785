//! Price extraction from fetched pages.
//!
//! Given page bytes and a selector expression, the extractor parses the
//! document, takes the **first** matching element, reads its text, and
//! normalizes that text into a number.
//!
//! Only the element's own leading text counts: the text before its first
//! child element. In `<span><del>1 200</del> 999 грн</span>` the span has no
//! leading text, so the site fails with "no text content" rather than
//! reporting the struck-through and current prices glued together.
//!
//! # Normalization
//!
//! 1. Trim surrounding whitespace.
//! 2. Keep only ASCII digits and `.`, in their original order. Currency
//!    symbols, spaces, and thousands separators are dropped.
//! 3. Parse the remainder as `f64`.
//!
//! This is deliberately locale-unaware: `" 1,234.56 ₴ "` becomes `1234.56`,
//! but a decimal comma is dropped too (`"12,50"` becomes `1250`). Callers
//! that need locale-aware parsing must normalize before registering sites.

use scraper::{ElementRef, Html};
use thiserror::Error;

use crate::selector::{self, SelectorError};

/// Why a price could not be read from a fetched page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("invalid selector: {0}")]
    InvalidSelector(#[from] SelectorError),
    #[error("element not found")]
    NotFound,
    #[error("no text content")]
    NoText,
    #[error("no numeric content in {0:?}")]
    NoNumericContent(String),
    #[error("unparseable price {text:?}: {reason}")]
    Unparseable { text: String, reason: String },
}

/// Reads a price out of page content.
pub trait Extractor: Send + Sync {
    fn extract(&self, content: &[u8], selector: &str) -> Result<f64, ExtractionError>;
}

/// [`Extractor`] over HTML documents, using `scraper` for parsing and
/// selector evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

impl Extractor for HtmlExtractor {
    fn extract(&self, content: &[u8], selector: &str) -> Result<f64, ExtractionError> {
        let compiled = selector::compile(selector)?;
        let html = String::from_utf8_lossy(content);
        let document = Html::parse_document(&html);

        let element = document
            .select(compiled.selector())
            .next()
            .ok_or(ExtractionError::NotFound)?;

        let text = leading_text(element).ok_or(ExtractionError::NoText)?;
        normalize_price(text)
    }
}

/// Text before the element's first child node, if any.
fn leading_text<'a>(element: ElementRef<'a>) -> Option<&'a str> {
    let first = element.first_child()?;
    let text: &str = first.value().as_text()?;
    Some(text).filter(|t| !t.is_empty())
}

/// Digits and periods of `text`, in order, after trimming.
pub fn numeric_chars(text: &str) -> String {
    text.trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect()
}

/// Turn element text into a positive price.
pub fn normalize_price(text: &str) -> Result<f64, ExtractionError> {
    let filtered = numeric_chars(text);
    if filtered.is_empty() {
        return Err(ExtractionError::NoNumericContent(text.to_string()));
    }

    let price: f64 = filtered
        .parse()
        .map_err(|e: std::num::ParseFloatError| ExtractionError::Unparseable {
            text: filtered.clone(),
            reason: e.to_string(),
        })?;

    if !(price.is_finite() && price > 0.0) {
        return Err(ExtractionError::Unparseable {
            text: filtered,
            reason: "price must be a positive amount".to_string(),
        });
    }
    Ok(price)
}
