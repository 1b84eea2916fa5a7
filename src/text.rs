use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::BLANK_DAY_MARKER;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Trims outer whitespace and collapses each interior whitespace run to a single space.
///
/// `\s` in the `regex` crate is Unicode-aware, so non-breaking spaces left over
/// from `&nbsp;` entities are treated as whitespace too.
pub fn normalize(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text.trim(), " ").into_owned()
}

/// Normalises the concatenated text nodes of an element.
pub fn element_text(element: &scraper::ElementRef<'_>) -> String {
    normalize(&element.text().collect::<String>())
}

/// True when a cell carries no real value: empty after normalisation or the literal placeholder.
pub fn is_blank_marker(text: &str) -> bool {
    let normalized = normalize(text);
    normalized.is_empty() || normalized == BLANK_DAY_MARKER
}
