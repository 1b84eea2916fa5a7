//! Read-side query translation: `?field=op:operand&sortby=..&limit=..` into a [`FindQuery`].

use serde_json::Value;

use crate::error::{Result, ScraperError};
use crate::storage::{CompareOp, Filter, FindQuery, SortSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Exact,
    Except,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl FilterOp {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "exact" => Some(FilterOp::Exact),
            "except" => Some(FilterOp::Except),
            "gt" => Some(FilterOp::Gt),
            "gte" => Some(FilterOp::Gte),
            "lt" => Some(FilterOp::Lt),
            "lte" => Some(FilterOp::Lte),
            _ => None,
        }
    }

    fn compare_op(self) -> CompareOp {
        match self {
            FilterOp::Exact => CompareOp::Eq,
            FilterOp::Except => CompareOp::Ne,
            FilterOp::Gt => CompareOp::Gt,
            FilterOp::Gte => CompareOp::Gte,
            FilterOp::Lt => CompareOp::Lt,
            FilterOp::Lte => CompareOp::Lte,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
}

/// A queryable parameter and the document path it filters on.
#[derive(Debug, Clone, Copy)]
pub struct QueryField {
    pub param: &'static str,
    pub path: &'static str,
    pub kind: FieldKind,
}

const fn text(param: &'static str, path: &'static str) -> QueryField {
    QueryField { param, path, kind: FieldKind::Text }
}

const fn integer(param: &'static str, path: &'static str) -> QueryField {
    QueryField { param, path, kind: FieldKind::Integer }
}

pub const OPTION_FIELDS: &[QueryField] = &[text("value", "data.value"), text("text", "data.text")];

pub const COURSE_FIELDS: &[QueryField] = &[
    integer("section-number", "sectionData.number"),
    text("section-component", "sectionData.component"),
    integer("section-class-number", "sectionData.classNumber"),
    text("section-location", "sectionData.location"),
    text("section-instructor", "sectionData.instructor"),
    text("section-reqs", "sectionData.requisites"),
    text("section-status", "sectionData.status"),
    text("section-campus", "sectionData.campus"),
    text("section-delivery", "sectionData.delivery"),
    text("section-day", "sectionData.times.days"),
    text("section-start-time", "sectionData.times.startTime"),
    text("section-end-time", "sectionData.times.endTime"),
    text("class-faculty", "courseData.faculty"),
    integer("class-number", "courseData.number"),
    text("class-suffix", "courseData.suffix"),
    text("class-name", "courseData.name"),
    text("class-desc", "courseData.description"),
];

/// Parses `"<op>:<operand>"`. Only the first `:` separates, so operands such
/// as `8:30 AM` survive intact.
pub fn parse_expression(field: &QueryField, expression: &str) -> Result<Filter> {
    let (op_name, operand) = expression.split_once(':').ok_or_else(|| {
        ScraperError::InvalidQuery(format!("{}: expected '<op>:<value>', got '{}'", field.param, expression))
    })?;
    let op = FilterOp::parse(op_name)
        .ok_or_else(|| ScraperError::InvalidQuery(format!("{}: unknown filter '{}'", field.param, op_name)))?;

    let value = match field.kind {
        FieldKind::Text => Value::from(operand),
        FieldKind::Integer => operand.trim().parse::<i64>().map(Value::from).map_err(|_| {
            ScraperError::InvalidQuery(format!("{}: '{}' is not an integer", field.param, operand))
        })?,
    };

    Ok(Filter::Compare { path: field.path.to_string(), op: op.compare_op(), value })
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw {
        "" | "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ScraperError::InvalidQuery(format!("{name}: expected a boolean, got '{raw}'"))),
    }
}

fn parse_count(name: &str, raw: &str) -> Result<usize> {
    raw.parse()
        .map_err(|_| ScraperError::InvalidQuery(format!("{name}: expected a non-negative integer, got '{raw}'")))
}

/// Builds a find query from raw (possibly repeated) query parameters.
///
/// Filters combine with AND unless `inclusive` is set. `offset` is 1-based and
/// only applies when `limit` is positive.
pub fn build_query(fields: &[QueryField], params: &[(String, String)]) -> Result<FindQuery> {
    let mut filters = Vec::new();
    let mut inclusive = false;
    let mut sort_by: Option<&QueryField> = None;
    let mut descending = false;
    let mut limit = 0usize;
    let mut offset = 0usize;

    for (name, raw) in params {
        match name.as_str() {
            "inclusive" => inclusive = parse_flag(name, raw)?,
            "dec" => descending = parse_flag(name, raw)?,
            "limit" => limit = parse_count(name, raw)?,
            "offset" => offset = parse_count(name, raw)?,
            "sortby" => {
                sort_by = Some(
                    fields
                        .iter()
                        .find(|f| f.param == raw.as_str())
                        .ok_or_else(|| ScraperError::InvalidQuery(format!("sortby: unknown field '{raw}'")))?,
                )
            }
            param => {
                let field = fields
                    .iter()
                    .find(|f| f.param == param)
                    .ok_or_else(|| ScraperError::InvalidQuery(format!("unknown query parameter '{param}'")))?;
                filters.push(parse_expression(field, raw)?);
            }
        }
    }

    let filter = match filters.len() {
        0 => Filter::All,
        _ if inclusive => Filter::Or(filters),
        _ => Filter::And(filters),
    };

    let (skip, limit) = if limit > 0 {
        (limit * offset.saturating_sub(1), Some(limit))
    } else {
        (0, None)
    };

    Ok(FindQuery {
        filter,
        sort: sort_by.map(|field| SortSpec { path: field.path.to_string(), descending }),
        skip,
        limit,
    })
}

/// Folds consecutive sections of the same course into one course document
/// whose `sectionData` is the list of those sections, preserving query order.
pub fn group_courses(sections: Vec<Value>) -> Vec<Value> {
    let mut courses: Vec<Value> = Vec::new();
    for mut section in sections {
        let section_data = section.get_mut("sectionData").map(Value::take).unwrap_or(Value::Null);
        let same_course = courses
            .last()
            .map_or(false, |last| last.get("courseData") == section.get("courseData"));

        if same_course {
            if let Some(Value::Array(list)) = courses.last_mut().and_then(|c| c.get_mut("sectionData")) {
                list.push(section_data);
            }
        } else {
            if let Value::Object(map) = &mut section {
                map.insert("sectionData".to_string(), Value::Array(vec![section_data]));
            }
            courses.push(section);
        }
    }
    courses
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn consecutive_sections_group_under_their_course() {
        let section = |faculty: &str, number: i64| {
            json!({ "source": {}, "courseData": { "faculty": faculty }, "sectionData": { "number": number } })
        };
        let grouped = group_courses(vec![section("MATH", 1), section("MATH", 2), section("CS", 1), section("MATH", 3)]);

        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped[0]["sectionData"], json!([{ "number": 1 }, { "number": 2 }]));
        assert_eq!(grouped[1]["courseData"]["faculty"], json!("CS"));
        assert_eq!(grouped[2]["sectionData"], json!([{ "number": 3 }]));
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn operands_keep_later_colons() {
        let field = COURSE_FIELDS.iter().find(|f| f.param == "section-start-time").unwrap();
        let filter = parse_expression(field, "exact:8:30 AM").unwrap();
        assert_eq!(filter, Filter::eq("sectionData.times.startTime", "8:30 AM"));
    }

    #[test]
    fn integer_fields_need_integer_operands() {
        let field = COURSE_FIELDS.iter().find(|f| f.param == "class-number").unwrap();
        assert_eq!(
            parse_expression(field, "gte:2000").unwrap(),
            Filter::compare("courseData.number", CompareOp::Gte, 2000)
        );
        assert!(matches!(parse_expression(field, "gte:abc"), Err(ScraperError::InvalidQuery(_))));
    }

    #[test]
    fn unknown_operator_and_missing_colon_are_rejected() {
        let field = &OPTION_FIELDS[0];
        assert!(parse_expression(field, "like:MATH").is_err());
        assert!(parse_expression(field, "MATH").is_err());
    }

    #[test]
    fn filters_are_conjunctive_unless_inclusive() {
        let and = build_query(OPTION_FIELDS, &params(&[("value", "exact:MATH"), ("text", "except:Math")])).unwrap();
        assert!(matches!(and.filter, Filter::And(ref f) if f.len() == 2));

        let or = build_query(
            OPTION_FIELDS,
            &params(&[("value", "exact:MATH"), ("value", "exact:CS"), ("inclusive", "true")]),
        )
        .unwrap();
        assert!(or.filter.matches(&json!({ "data": { "value": "CS" } })));
        assert!(!or.filter.matches(&json!({ "data": { "value": "STATS" } })));
    }

    #[test]
    fn no_filters_match_everything() {
        let query = build_query(COURSE_FIELDS, &[]).unwrap();
        assert_eq!(query, FindQuery::default());
    }

    #[test]
    fn pagination_is_one_based_and_needs_a_limit() {
        let page3 = build_query(OPTION_FIELDS, &params(&[("limit", "10"), ("offset", "3")])).unwrap();
        assert_eq!((page3.skip, page3.limit), (20, Some(10)));

        let first = build_query(OPTION_FIELDS, &params(&[("limit", "10"), ("offset", "0")])).unwrap();
        assert_eq!((first.skip, first.limit), (0, Some(10)));

        let no_limit = build_query(OPTION_FIELDS, &params(&[("offset", "4")])).unwrap();
        assert_eq!((no_limit.skip, no_limit.limit), (0, None));
    }

    #[test]
    fn sort_uses_the_field_registry() {
        let query = build_query(COURSE_FIELDS, &params(&[("sortby", "class-number"), ("dec", "true")])).unwrap();
        assert_eq!(query.sort, Some(SortSpec { path: "courseData.number".into(), descending: true }));
        assert!(build_query(COURSE_FIELDS, &params(&[("sortby", "nope")])).is_err());
    }

    #[test]
    fn unknown_parameters_and_bad_numbers_are_rejected() {
        assert!(build_query(OPTION_FIELDS, &params(&[("colour", "exact:red")])).is_err());
        assert!(build_query(OPTION_FIELDS, &params(&[("limit", "-1")])).is_err());
        assert!(build_query(OPTION_FIELDS, &params(&[("dec", "maybe")])).is_err());
    }
}
