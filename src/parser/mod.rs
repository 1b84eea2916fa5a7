//! Extraction of structured records from catalog markup.
//!
//! Everything here is synchronous and works on a parsed [`scraper::Html`]
//! tree; callers parse and extract between suspension points.

pub mod courses;
pub mod options;
pub mod row;

pub use courses::{extract_course, extract_page, parse_header, PageExtraction, SkippedUnit};
pub use options::{extract_options, form_root, to_records};
pub use row::{decode_row, parse_lenient_int, Column, Decoded, DecodedRow};

use scraper::ElementRef;

/// Direct element children of `parent` with the given tag name.
pub(crate) fn child_elements<'a>(
    parent: ElementRef<'a>,
    name: &'static str,
) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    parent
        .children()
        .filter_map(ElementRef::wrap)
        .filter(move |el| el.value().name() == name)
}
