//! Decoding of a single timetable row.
//!
//! The twelve cells are described by [`Column`]; decoding walks that table
//! instead of indexing cells by hand, so a layout change is a one-line edit.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Selector};

use super::child_elements;
use crate::error::{Result, ScraperError};
use crate::text;
use crate::types::{DecodeWarning, MeetingTime, SectionRecord};

static NESTED_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("valid selector"));

/// Source columns of a section row, in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Section,
    Component,
    ClassNumber,
    Days,
    StartTime,
    EndTime,
    Location,
    Instructor,
    Requisites,
    Status,
    Campus,
    Delivery,
}

impl Column {
    pub const ALL: [Column; 12] = [
        Column::Section,
        Column::Component,
        Column::ClassNumber,
        Column::Days,
        Column::StartTime,
        Column::EndTime,
        Column::Location,
        Column::Instructor,
        Column::Requisites,
        Column::Status,
        Column::Campus,
        Column::Delivery,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Field name used in warnings and in the persisted document.
    pub fn field_name(self) -> &'static str {
        match self {
            Column::Section => "sectionData.number",
            Column::Component => "sectionData.component",
            Column::ClassNumber => "sectionData.classNumber",
            Column::Days => "sectionData.times.days",
            Column::StartTime => "sectionData.times.startTime",
            Column::EndTime => "sectionData.times.endTime",
            Column::Location => "sectionData.location",
            Column::Instructor => "sectionData.instructor",
            Column::Requisites => "sectionData.requisites",
            Column::Status => "sectionData.status",
            Column::Campus => "sectionData.campus",
            Column::Delivery => "sectionData.delivery",
        }
    }
}

/// A decoded value, plus the warning raised if it had to be defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub value: T,
    pub warning: Option<DecodeWarning>,
}

impl<T> Decoded<T> {
    pub fn into_parts(self, warnings: &mut Vec<DecodeWarning>) -> T {
        warnings.extend(self.warning);
        self.value
    }
}

/// Parses a base-10 integer; anything else yields 0 and a warning carrying the raw text.
pub fn parse_lenient_int(field: &'static str, raw: &str) -> Decoded<i64> {
    match raw.trim().parse::<i64>() {
        Ok(value) => Decoded { value, warning: None },
        Err(_) => Decoded {
            value: 0,
            warning: Some(DecodeWarning { field, raw: raw.to_string() }),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRow {
    pub section: SectionRecord,
    pub warnings: Vec<DecodeWarning>,
}

/// Decodes a `<tr>` with exactly [`Column::COUNT`] direct `<td>` children.
///
/// The days cell holds a nested table with one cell per weekday; blank days
/// are skipped and every remaining day shares the row's start/end time.
pub fn decode_row(row: ElementRef<'_>) -> Result<DecodedRow> {
    let cells: Vec<ElementRef<'_>> = child_elements(row, "td").collect();
    if cells.len() != Column::COUNT {
        return Err(ScraperError::MalformedMarkup(format!(
            "section row has {} cells, expected {}",
            cells.len(),
            Column::COUNT
        )));
    }

    let mut section = SectionRecord::default();
    let mut warnings = Vec::new();
    let mut days = Vec::new();
    let mut start_time = String::new();
    let mut end_time = String::new();

    for (column, cell) in Column::ALL.into_iter().zip(cells) {
        let field = column.field_name();
        match column {
            Column::Section => {
                section.number = parse_lenient_int(field, &text::element_text(&cell)).into_parts(&mut warnings)
            }
            Column::ClassNumber => {
                section.class_number =
                    parse_lenient_int(field, &text::element_text(&cell)).into_parts(&mut warnings)
            }
            Column::Days => days = day_tokens(cell),
            Column::StartTime => start_time = text::element_text(&cell),
            Column::EndTime => end_time = text::element_text(&cell),
            Column::Component => section.component = text::element_text(&cell),
            Column::Location => section.location = text::element_text(&cell),
            Column::Instructor => section.instructor = text::element_text(&cell),
            Column::Requisites => section.requisites = text::element_text(&cell),
            Column::Status => section.status = text::element_text(&cell),
            Column::Campus => section.campus = text::element_text(&cell),
            Column::Delivery => section.delivery = text::element_text(&cell),
        }
    }

    section.times = days
        .into_iter()
        .map(|day| MeetingTime {
            days: day,
            start_time: start_time.clone(),
            end_time: end_time.clone(),
        })
        .collect();

    Ok(DecodedRow { section, warnings })
}

/// Non-blank day labels from the nested per-day table of a days cell.
fn day_tokens(cell: ElementRef<'_>) -> Vec<String> {
    cell.select(&NESTED_CELL)
        .map(|day| text::element_text(&day))
        .filter(|day| !text::is_blank_marker(day))
        .collect()
}
