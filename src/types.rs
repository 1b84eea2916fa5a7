use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::YEAR_SUFFIX_LEN;
use crate::error::{Result, ScraperError};

/// Provenance of a scraped page, derived once per run from the catalog header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub title: String,
    pub year: String,
    pub url: String,
}

impl SourceInfo {
    /// Splits a header such as `"Fall/Winter Academic Timetable2020/2021"` into
    /// title and the trailing 9-character academic year.
    pub fn from_header(header: &str, url: &str) -> Result<Self> {
        let chars: Vec<char> = header.chars().collect();
        if chars.len() < YEAR_SUFFIX_LEN {
            return Err(ScraperError::MalformedMarkup(format!(
                "catalog header '{}' is shorter than the {}-character year suffix",
                header, YEAR_SUFFIX_LEN
            )));
        }
        let split = chars.len() - YEAR_SUFFIX_LEN;
        Ok(Self {
            title: chars[..split].iter().collect(),
            year: chars[split..].iter().collect(),
            url: url.to_string(),
        })
    }
}

/// Creation timestamp stamped on every record of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTime {
    #[serde(rename = "addedAt")]
    pub added_at: DateTime<Utc>,
}

impl RecordTime {
    pub fn now() -> Self {
        Self { added_at: Utc::now() }
    }
}

/// One `<option>` of a search-form selection list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionData {
    pub value: String,
    pub text: String,
}

/// Persisted reference-list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionRecord {
    pub source: SourceInfo,
    pub time: RecordTime,
    pub data: OptionData,
}

/// Identifies a course independently of how it is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseIdentity {
    pub faculty: String,
    pub number: i64,
    pub suffix: String,
    pub name: String,
    pub description: String,
}

/// One scheduled day with the row's start and end time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingTime {
    pub days: String,
    #[serde(rename = "startTime")]
    pub start_time: String,
    #[serde(rename = "endTime")]
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectionRecord {
    pub number: i64,
    pub component: String,
    #[serde(rename = "classNumber")]
    pub class_number: i64,
    pub location: String,
    pub instructor: String,
    pub requisites: String,
    pub status: String,
    pub campus: String,
    pub delivery: String,
    pub times: Vec<MeetingTime>,
}

/// Pre-merge unit of work: one source row paired with its course.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedRow {
    pub source: SourceInfo,
    pub time: RecordTime,
    pub course: CourseIdentity,
    pub section: SectionRecord,
}

/// Persisted section, with times accumulated from every row sharing its identity key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSection {
    pub source: SourceInfo,
    pub time: RecordTime,
    #[serde(rename = "courseData")]
    pub course: CourseIdentity,
    #[serde(rename = "sectionData")]
    pub section: SectionRecord,
}

impl From<&ScrapedRow> for StoredSection {
    fn from(row: &ScrapedRow) -> Self {
        Self {
            source: row.source.clone(),
            time: row.time,
            course: row.course.clone(),
            section: row.section.clone(),
        }
    }
}

/// A field whose raw text could not be decoded and fell back to a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodeWarning {
    pub field: &'static str,
    pub raw: String,
}

impl std::fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} could not decode '{}', defaulted to 0", self.field, self.raw)
    }
}
