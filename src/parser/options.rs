use scraper::{ElementRef, Html, Selector};

use crate::error::{Result, ScraperError};
use crate::text;
use crate::types::{OptionData, OptionRecord, RecordTime, SourceInfo};

/// The search form every reference list is read from.
pub fn form_root<'a>(document: &'a Html, form_selector: &str) -> Result<ElementRef<'a>> {
    let selector = Selector::parse(form_selector)
        .map_err(|_| ScraperError::Selector(form_selector.to_string()))?;
    document.select(&selector).next().ok_or_else(|| {
        ScraperError::MalformedMarkup(format!("search form '{form_selector}' not found"))
    })
}

/// Every `<option>` under `selector`, as normalised (value, text) pairs in document order.
pub fn extract_options(root: ElementRef<'_>, selector: &str) -> Result<Vec<OptionData>> {
    let option_selector = Selector::parse(&format!("{selector} option"))
        .map_err(|_| ScraperError::Selector(selector.to_string()))?;

    Ok(root
        .select(&option_selector)
        .map(|option| OptionData {
            value: text::normalize(option.value().attr("value").unwrap_or_default()),
            text: text::element_text(&option),
        })
        .collect())
}

/// Tags extracted options with the run's provenance.
pub fn to_records(options: Vec<OptionData>, source: &SourceInfo, time: RecordTime) -> Vec<OptionRecord> {
    options
        .into_iter()
        .map(|data| OptionRecord { source: source.clone(), time, data })
        .collect()
}
