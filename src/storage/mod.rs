//! Document store used for staging and published collections.
//!
//! Documents are JSON objects. Filters and find queries follow the usual
//! document-database conventions: dotted paths, array traversal, and a
//! whole-collection replace that readers observe atomically.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Result, ScraperError};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Removes every document from `collection`.
    async fn clear(&self, collection: &str) -> Result<()>;

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<()>;

    /// Appends `values` to the array at `array_path` of every document matching
    /// `filter`, creating the array when absent. Returns the number matched.
    async fn push_each(&self, collection: &str, filter: &Filter, array_path: &str, values: Vec<Value>) -> Result<u64>;

    /// Replaces the contents of `target` with a copy of `source` in one step.
    /// Readers of `target` see either the old or the new contents.
    async fn replace_collection(&self, source: &str, target: &str) -> Result<usize>;

    async fn drop_collection(&self, collection: &str) -> Result<()>;

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;

    /// Declares a compound equality index over `paths` in `collection`. The
    /// paths must resolve to scalars without crossing arrays. Stores that scan
    /// in memory may ignore it.
    async fn create_index(&self, _collection: &str, _paths: &[&str]) -> Result<()> {
        Ok(())
    }
}

pub fn store_from_config(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory document store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreBackend::Sqlite => {
            info!(path = %config.path, "Using SQLite document store");
            Ok(Arc::new(SqliteStore::open(&config.path)?))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Compare { path: String, op: CompareOp, value: Value },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn compare(path: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Filter::Compare { path: path.into(), op, value: value.into() }
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Eq, value)
    }

    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(document)),
            Filter::Compare { path, op, value } => {
                let candidates = resolve_path(document, path);
                match op {
                    CompareOp::Eq => candidates.iter().any(|c| equals(c, value)),
                    CompareOp::Ne => !candidates.iter().any(|c| equals(c, value)),
                    ordering => candidates.iter().any(|c| match compare_values(c, value) {
                        Some(found) => match ordering {
                            CompareOp::Gt => found == Ordering::Greater,
                            CompareOp::Gte => found != Ordering::Less,
                            CompareOp::Lt => found == Ordering::Less,
                            CompareOp::Lte => found != Ordering::Greater,
                            CompareOp::Eq | CompareOp::Ne => false,
                        },
                        None => false,
                    }),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub path: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    pub sort: Option<SortSpec>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Default for FindQuery {
    fn default() -> Self {
        Self { filter: Filter::All, sort: None, skip: 0, limit: None }
    }
}

impl FindQuery {
    pub fn filtered(filter: Filter) -> Self {
        Self { filter, ..Self::default() }
    }
}

/// Applies filter, stable sort, skip and limit to a materialised collection.
pub fn apply_find<'a, I>(documents: I, query: &FindQuery) -> Vec<Value>
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut matched: Vec<&Value> = documents.into_iter().filter(|d| query.filter.matches(d)).collect();

    if let Some(sort) = &query.sort {
        matched.sort_by(|a, b| {
            let ordering = sort_key_cmp(first_value(a, &sort.path), first_value(b, &sort.path));
            if sort.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }

    let page = matched.into_iter().skip(query.skip);
    match query.limit {
        Some(limit) => page.take(limit).cloned().collect(),
        None => page.cloned().collect(),
    }
}

/// Appends `values` to the array at a dotted `path`, creating intermediate objects.
pub fn push_at_path(document: &mut Value, path: &str, values: &[Value]) -> Result<()> {
    let mut current = document;
    for segment in path.split('.') {
        let object = current
            .as_object_mut()
            .ok_or_else(|| ScraperError::Store(format!("cannot descend into non-object at '{segment}' of '{path}'")))?;
        current = object.entry(segment.to_string()).or_insert(Value::Null);
    }
    if current.is_null() {
        *current = Value::Array(Vec::new());
    }
    let items = current
        .as_array_mut()
        .ok_or_else(|| ScraperError::Store(format!("field '{path}' is not an array")))?;
    items.extend_from_slice(values);
    Ok(())
}

/// Every value reachable through a dotted path, flattening arrays along the way.
fn resolve_path<'a>(document: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![document];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => {
                    if let Some(child) = map.get(segment) {
                        next.push(child);
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        if let Some(child) = item.as_object().and_then(|m: &Map<String, Value>| m.get(segment)) {
                            next.push(child);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }

    // A terminal array matches through its elements as well as as a whole.
    let mut expanded = Vec::with_capacity(current.len());
    for value in current {
        expanded.push(value);
        if let Value::Array(items) = value {
            expanded.extend(items.iter());
        }
    }
    expanded
}

fn first_value<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    resolve_path(document, path).into_iter().next()
}

fn equals(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

/// Orders numbers with numbers and strings with strings; other pairs are incomparable.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Missing values sort first; mixed types fall back to a fixed type rank.
fn sort_key_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Object(_) => 3,
            Value::Array(_) => 4,
            Value::Bool(_) => 5,
        }
    }
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or_else(|| rank(x).cmp(&rank(y))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn section(faculty: &str, number: i64, days: &[&str]) -> Value {
        let times: Vec<Value> = days.iter().map(|d| json!({ "days": d, "startTime": "8:30 AM" })).collect();
        json!({
            "courseData": { "faculty": faculty, "number": number },
            "sectionData": { "number": 1, "times": times }
        })
    }

    #[test]
    fn dotted_paths_traverse_arrays() {
        let doc = section("MATH", 1000, &["M", "W"]);
        assert!(Filter::eq("sectionData.times.days", "W").matches(&doc));
        assert!(!Filter::eq("sectionData.times.days", "F").matches(&doc));
        assert!(Filter::compare("sectionData.times.days", CompareOp::Ne, "F").matches(&doc));
        assert!(!Filter::compare("sectionData.times.days", CompareOp::Ne, "M").matches(&doc));
    }

    #[test]
    fn ordering_is_type_strict() {
        let doc = section("MATH", 1000, &[]);
        assert!(Filter::compare("courseData.number", CompareOp::Gte, 1000).matches(&doc));
        assert!(Filter::compare("courseData.number", CompareOp::Lt, 2000).matches(&doc));
        assert!(!Filter::compare("courseData.number", CompareOp::Gt, "999").matches(&doc));
        assert!(Filter::compare("courseData.faculty", CompareOp::Gt, "CS").matches(&doc));
    }

    #[test]
    fn missing_field_matches_only_ne() {
        let doc = json!({ "a": 1 });
        assert!(!Filter::eq("b", 1).matches(&doc));
        assert!(Filter::compare("b", CompareOp::Ne, 1).matches(&doc));
        assert!(!Filter::compare("b", CompareOp::Lt, 5).matches(&doc));
    }

    #[test]
    fn whole_object_equality() {
        let doc = json!({ "key": { "x": 1, "y": "z" } });
        assert!(Filter::eq("key", json!({ "y": "z", "x": 1 })).matches(&doc));
        assert!(!Filter::eq("key", json!({ "x": 1 })).matches(&doc));
    }

    #[test]
    fn and_or_combinators() {
        let doc = section("MATH", 1000, &["M"]);
        let math = Filter::eq("courseData.faculty", "MATH");
        let stats = Filter::eq("courseData.faculty", "STATS");
        assert!(Filter::Or(vec![math.clone(), stats.clone()]).matches(&doc));
        assert!(!Filter::And(vec![math, stats]).matches(&doc));
        assert!(Filter::And(vec![]).matches(&doc));
    }

    #[test]
    fn find_sorts_skips_and_limits() {
        let docs = vec![
            section("MATH", 3000, &[]),
            section("CS", 1000, &[]),
            section("STATS", 2000, &[]),
            json!({ "other": true }),
        ];
        let query = FindQuery {
            filter: Filter::compare("courseData.number", CompareOp::Gt, 0),
            sort: Some(SortSpec { path: "courseData.number".into(), descending: true }),
            skip: 1,
            limit: Some(1),
        };
        let found = apply_find(&docs, &query);
        assert_eq!(found, vec![section("STATS", 2000, &[])]);

        let ascending = FindQuery {
            sort: Some(SortSpec { path: "courseData.faculty".into(), descending: false }),
            ..FindQuery::default()
        };
        let names: Vec<Value> = apply_find(&docs, &ascending).iter().map(|d| d["courseData"]["faculty"].clone()).collect();
        assert_eq!(names, vec![Value::Null, json!("CS"), json!("MATH"), json!("STATS")]);
    }

    #[test]
    fn push_creates_and_extends_arrays() {
        let mut doc = json!({ "sectionData": {} });
        push_at_path(&mut doc, "sectionData.times", &[json!(1)]).unwrap();
        push_at_path(&mut doc, "sectionData.times", &[json!(2), json!(3)]).unwrap();
        assert_eq!(doc["sectionData"]["times"], json!([1, 2, 3]));

        let mut scalar = json!({ "times": 5 });
        assert!(push_at_path(&mut scalar, "times", &[json!(1)]).is_err());
    }
}
