use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::child_elements;
use super::row::{decode_row, parse_lenient_int};
use crate::error::{Result, ScraperError};
use crate::text;
use crate::types::{CourseIdentity, DecodeWarning, RecordTime, ScrapedRow, SourceInfo};

/// Rows, warnings and skipped units from one search-results page.
#[derive(Debug, Default)]
pub struct PageExtraction {
    pub rows: Vec<ScrapedRow>,
    pub warnings: Vec<DecodeWarning>,
    pub skipped: Vec<SkippedUnit>,
}

/// A course block or row that could not be decoded and was left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedUnit {
    pub location: String,
    pub reason: String,
}

/// Parses `"FACULTY CODE - Name"`.
///
/// A 5-character code is a 4-digit number plus a one-letter suffix; any other
/// code is the whole number with an empty suffix. The name is everything after
/// the first `-`, so names may contain dashes.
pub fn parse_header(header: &str) -> Result<(CourseIdentity, Vec<DecodeWarning>)> {
    let (designation, name) = header
        .split_once('-')
        .ok_or_else(|| ScraperError::MalformedMarkup(format!("course header '{header}' has no '-'")))?;

    let mut parts = designation.split_whitespace();
    let (faculty, code) = match (parts.next(), parts.next()) {
        (Some(faculty), Some(code)) => (faculty, code),
        _ => {
            return Err(ScraperError::MalformedMarkup(format!(
                "course header '{header}' is missing a faculty or code"
            )))
        }
    };

    let mut warnings = Vec::new();
    let code_chars: Vec<char> = code.chars().collect();
    let (number, suffix) = if code_chars.len() == 5 {
        let digits: String = code_chars[..4].iter().collect();
        (
            parse_lenient_int("courseData.number", &digits).into_parts(&mut warnings),
            code_chars[4].to_string(),
        )
    } else {
        (parse_lenient_int("courseData.number", code).into_parts(&mut warnings), String::new())
    };

    Ok((
        CourseIdentity {
            faculty: faculty.to_string(),
            number,
            suffix,
            name: text::normalize(name),
            description: String::new(),
        },
        warnings,
    ))
}

/// The `index`-th course of a results container: its `<h4>` header and `<p>` description.
pub fn extract_course(container: ElementRef<'_>, index: usize) -> Result<(CourseIdentity, Vec<DecodeWarning>)> {
    let header = child_elements(container, "h4")
        .nth(index)
        .ok_or_else(|| ScraperError::MalformedMarkup(format!("no course header at position {index}")))?;
    let description = child_elements(container, "p")
        .nth(index)
        .ok_or_else(|| ScraperError::MalformedMarkup(format!("no course description at position {index}")))?;

    let (mut course, warnings) = parse_header(&text::element_text(&header))?;
    course.description = text::element_text(&description);
    Ok((course, warnings))
}

/// Extracts every section row on a results page.
///
/// Inside each results container the i-th `<h4>`, `<p>` and `<table>` belong to
/// the same course. Containers without tables carry no courses and are
/// ignored; containers whose counts disagree reject the whole page, since
/// pairing would be ambiguous. Unparseable headers or rows are skipped
/// and reported in [`PageExtraction::skipped`].
pub fn extract_page(document: &Html, results_selector: &str, source: &SourceInfo) -> Result<PageExtraction> {
    let containers = Selector::parse(results_selector)
        .map_err(|_| ScraperError::Selector(results_selector.to_string()))?;

    let mut extraction = PageExtraction::default();

    for (container_index, container) in document.select(&containers).enumerate() {
        let headers = child_elements(container, "h4").count();
        let descriptions = child_elements(container, "p").count();
        let tables: Vec<ElementRef<'_>> = child_elements(container, "table").collect();

        if tables.is_empty() {
            debug!(container = container_index, "skipping results container without tables");
            continue;
        }
        if headers != descriptions || headers != tables.len() {
            return Err(ScraperError::MalformedMarkup(format!(
                "results container {container_index} has {headers} headers, {descriptions} descriptions and {} tables",
                tables.len()
            )));
        }

        for (course_index, table) in tables.into_iter().enumerate() {
            let location = format!("container {container_index}, course {course_index}");
            let (course, warnings) = match extract_course(container, course_index) {
                Ok(parsed) => parsed,
                Err(e) => {
                    extraction.skipped.push(SkippedUnit { location, reason: e.to_string() });
                    continue;
                }
            };
            extraction.warnings.extend(warnings);

            for (row_index, row) in table_rows(table).enumerate() {
                match decode_row(row) {
                    Ok(decoded) => {
                        extraction.warnings.extend(decoded.warnings);
                        extraction.rows.push(ScrapedRow {
                            source: source.clone(),
                            time: RecordTime::now(),
                            course: course.clone(),
                            section: decoded.section,
                        });
                    }
                    Err(e) => extraction.skipped.push(SkippedUnit {
                        location: format!("{location}, row {row_index}"),
                        reason: e.to_string(),
                    }),
                }
            }
        }
    }

    debug!(
        rows = extraction.rows.len(),
        warnings = extraction.warnings.len(),
        skipped = extraction.skipped.len(),
        "extracted results page"
    );
    Ok(extraction)
}

/// `<tr>` rows of a table's `<tbody>` sections, excluding nested tables.
fn table_rows<'a>(table: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    child_elements(table, "tbody").flat_map(|body| child_elements(body, "tr"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceInfo {
        SourceInfo { title: "Timetable".into(), year: "2020/2021".into(), url: "http://catalog".into() }
    }

    fn row(section: &str, component: &str, days: &[&str]) -> String {
        let day_cells: String = days.iter().map(|d| format!("<td>{d}</td>")).collect();
        format!(
            "<tr><td>{section}</td><td>{component}</td><td>5001</td>\
             <td><table><tbody><tr>{day_cells}</tr></tbody></table></td>\
             <td>8:30 AM</td><td>9:30 AM</td><td>NS 1</td><td>Smith</td><td></td>\
             <td>Not Full</td><td>Main</td><td>In Person</td></tr>"
        )
    }

    fn course(header: &str, description: &str, rows: &[String]) -> String {
        format!(
            "<h4>{header}</h4><p>{description}</p><table><thead><tr><th>Section</th></tr></thead><tbody>{}</tbody></table>",
            rows.concat()
        )
    }

    fn page(body: &str) -> Html {
        Html::parse_document(&format!("<html><body><div class=\"span12\">{body}</div></body></html>"))
    }

    #[test]
    fn header_with_suffix() {
        let (course, warnings) = parse_header("PSYCH 1000A - Introduction To Psychology").unwrap();
        assert_eq!(course.faculty, "PSYCH");
        assert_eq!(course.number, 1000);
        assert_eq!(course.suffix, "A");
        assert_eq!(course.name, "Introduction To Psychology");
        assert!(warnings.is_empty());
    }

    #[test]
    fn header_without_suffix() {
        let (course, _) = parse_header("MATH 1000 - Calculus").unwrap();
        assert_eq!(course.number, 1000);
        assert_eq!(course.suffix, "");
    }

    #[test]
    fn name_keeps_later_dashes() {
        let (course, _) = parse_header("CS 2210A - Data Structures - Honours").unwrap();
        assert_eq!(course.name, "Data Structures - Honours");
    }

    #[test]
    fn non_numeric_code_defaults_number() {
        let (course, warnings) = parse_header("MATH 10X0B - Odd").unwrap();
        assert_eq!(course.number, 0);
        assert_eq!(course.suffix, "B");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].raw, "10X0");
    }

    #[test]
    fn header_without_dash_is_malformed() {
        assert!(parse_header("MATH 1000 Calculus").is_err());
        assert!(parse_header("MATH - Calculus").is_err());
    }

    #[test]
    fn pairs_headers_descriptions_and_tables_by_position() {
        let body = [
            course("MATH 1000A - Calculus", "Limits.", &[row("001", "LEC", &["M", "&nbsp;", "W"])]),
            course("STATS 2244B - Statistics", "Data.", &[row("002", "LAB", &["Tu"]), row("003", "TUT", &["F"])]),
        ]
        .concat();
        let extraction = extract_page(&page(&body), ".span12", &source()).unwrap();

        assert_eq!(extraction.rows.len(), 3);
        assert!(extraction.skipped.is_empty());
        assert_eq!(extraction.rows[0].course.faculty, "MATH");
        assert_eq!(extraction.rows[0].course.description, "Limits.");
        assert_eq!(extraction.rows[0].section.times.len(), 2);
        assert_eq!(extraction.rows[1].course.faculty, "STATS");
        assert_eq!(extraction.rows[2].section.number, 3);
        assert_eq!(extraction.rows[2].source, source());
    }

    #[test]
    fn mismatched_counts_reject_the_page() {
        let body = format!("<h4>MATH 1000 - Calculus</h4>{}", course("STATS 2244 - Stats", "d", &[]));
        let err = extract_page(&page(&body), ".span12", &source()).unwrap_err();
        assert!(matches!(err, ScraperError::MalformedMarkup(_)));
    }

    #[test]
    fn containers_without_tables_are_ignored() {
        let document = Html::parse_document(&format!(
            "<html><body><div class=\"span12\"><p>Search results</p></div>\
             <div class=\"span12\">{}</div></body></html>",
            course("MATH 1000A - Calculus", "Limits.", &[row("001", "LEC", &["M"])])
        ));
        let extraction = extract_page(&document, ".span12", &source()).unwrap();

        assert_eq!(extraction.rows.len(), 1);
        assert_eq!(extraction.rows[0].course.faculty, "MATH");
        assert!(extraction.skipped.is_empty());
    }

    #[test]
    fn bad_rows_and_headers_are_skipped() {
        let short_row = "<tr><td>001</td></tr>".to_string();
        let body = [
            course("Broken header", "x", &[row("001", "LEC", &["M"])]),
            course("MATH 1000 - Calculus", "y", &[short_row, row("002", "LEC", &["M"])]),
        ]
        .concat();
        let extraction = extract_page(&page(&body), ".span12", &source()).unwrap();

        assert_eq!(extraction.rows.len(), 1);
        assert_eq!(extraction.rows[0].section.number, 2);
        assert_eq!(extraction.skipped.len(), 2);
        assert_eq!(extraction.skipped[1].location, "container 0, course 1, row 0");
    }

    #[test]
    fn page_without_results_is_empty() {
        let document = Html::parse_document("<html><body><p>No classes found.</p></body></html>");
        let extraction = extract_page(&document, ".span12", &source()).unwrap();
        assert!(extraction.rows.is_empty());
    }
}
