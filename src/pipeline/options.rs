//! Reference-list refresh: extract every configured selection list from the
//! bootstrap page and republish each into its own collection.

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::writer::snapshot_publish;
use crate::config::OptionTarget;
use crate::constants::staging_name;
use crate::error::{Result, ScraperError};
use crate::page::Page;
use crate::parser;
use crate::storage::{DocumentStore, FindQuery};
use crate::types::{OptionRecord, RecordTime, SourceInfo};

/// Outcome of refreshing one reference collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionRefresh {
    pub collection: String,
    pub selector: String,
    pub extracted: usize,
    /// `None` when nothing was extracted and the previous contents were kept.
    pub published: Option<usize>,
    /// Catalog year of the kept contents when `published` is `None` and the
    /// collection was not empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_year: Option<String>,
}

/// Records extracted for one target, ready to be written.
#[derive(Debug, Clone)]
pub struct ExtractedOptions {
    pub target: OptionTarget,
    pub records: Vec<OptionRecord>,
    /// Catalog year the records were extracted for.
    pub year: String,
}

/// Extracts every target's options from the bootstrap page's search form.
///
/// Parsing happens here, synchronously, so the resulting records can be moved
/// into concurrent write tasks.
pub fn extract_all(
    page: &Page,
    form_selector: &str,
    targets: &[OptionTarget],
    source: &SourceInfo,
    time: RecordTime,
) -> Result<Vec<ExtractedOptions>> {
    let document = page.document();
    let form = parser::form_root(&document, form_selector)?;

    targets
        .iter()
        .map(|target| -> Result<ExtractedOptions> {
            let options = parser::extract_options(form, &target.selector)?;
            Ok(ExtractedOptions {
                target: target.clone(),
                records: parser::to_records(options, source, time),
                year: source.year.clone(),
            })
        })
        .collect()
}

/// `source.year` of the first published document, if any.
async fn published_year(store: &dyn DocumentStore, collection: &str) -> Result<Option<String>> {
    let query = FindQuery { limit: Some(1), ..FindQuery::default() };
    let first = store.find(collection, &query).await?;
    Ok(first
        .first()
        .and_then(|doc| doc.pointer("/source/year"))
        .and_then(|year| year.as_str())
        .map(str::to_string))
}

/// Stages `records` and publishes them into `target.collection`.
///
/// An empty extraction leaves the published collection as it was and reports
/// the year the kept contents were scraped for.
pub async fn refresh_collection(store: Arc<dyn DocumentStore>, extracted: ExtractedOptions) -> Result<OptionRefresh> {
    let ExtractedOptions { target, records, year } = extracted;
    let extracted = records.len();

    if records.is_empty() {
        let stale_year = published_year(store.as_ref(), &target.collection).await?;
        match stale_year.as_deref() {
            Some(kept) if kept != year => warn!(
                collection = %target.collection,
                selector = %target.selector,
                kept_year = kept,
                current_year = %year,
                "Selector matched no options; keeping a collection from another catalog year"
            ),
            Some(kept) => warn!(
                collection = %target.collection,
                selector = %target.selector,
                kept_year = kept,
                "Selector matched no options; keeping previously published collection"
            ),
            None => warn!(
                collection = %target.collection,
                selector = %target.selector,
                "Selector matched no options and nothing was published before"
            ),
        }
        return Ok(OptionRefresh {
            collection: target.collection,
            selector: target.selector,
            extracted,
            published: None,
            stale_year,
        });
    }

    let staging = staging_name(&target.collection);
    let documents = records
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    store.clear(&staging).await?;
    store.insert_many(&staging, documents).await?;
    let published = snapshot_publish(store.as_ref(), &staging, &target.collection).await?;
    store.drop_collection(&staging).await?;

    info!(collection = %target.collection, published, "Refreshed reference collection");
    Ok(OptionRefresh {
        collection: target.collection,
        selector: target.selector,
        extracted,
        published: Some(published),
        stale_year: None,
    })
}

/// Runs one refresh task per target and waits for all of them.
///
/// Every task settles before this returns; the first failure, if any, is
/// returned after the barrier.
pub async fn refresh_all(store: Arc<dyn DocumentStore>, batches: Vec<ExtractedOptions>) -> Result<Vec<OptionRefresh>> {
    let mut tasks = JoinSet::new();
    for (index, batch) in batches.into_iter().enumerate() {
        let store = Arc::clone(&store);
        tasks.spawn(async move { (index, refresh_collection(store, batch).await) });
    }

    let mut outcomes = Vec::new();
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(outcome))) => outcomes.push((index, outcome)),
            Ok((index, Err(e))) => {
                warn!(task = index, error = %e, "Reference collection refresh failed");
                first_error = first_error.or(Some(e));
            }
            Err(join_error) => {
                let e = ScraperError::Store(format!("refresh task aborted: {join_error}"));
                first_error = first_error.or(Some(e));
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    outcomes.sort_by_key(|(index, _)| *index);
    Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Filter, InMemoryStore};
    use serde_json::json;

    const BOOTSTRAP: &str = r#"<html><body>
        <div class="page-header"><h1>Timetable <small>Fall/Winter Academic Timetable2020/2021</small></h1></div>
        <form id="searchForm">
          <select id="inputSubject"><option value="MATH">Mathematics</option></select>
          <select id="inputCampus"></select>
        </form></body></html>"#;

    fn page() -> Page {
        Page { body: BOOTSTRAP.to_string(), status: "200 OK".to_string() }
    }

    fn source() -> SourceInfo {
        SourceInfo { title: "Fall/Winter Academic Timetable".into(), year: "2020/2021".into(), url: "u".into() }
    }

    fn targets() -> Vec<OptionTarget> {
        vec![
            OptionTarget { collection: "subjects".into(), selector: "#inputSubject".into() },
            OptionTarget { collection: "campuses".into(), selector: "#inputCampus".into() },
        ]
    }

    #[tokio::test]
    async fn refresh_replaces_prior_contents() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_many("subjects", vec![json!({ "data": { "value": "OLD" } })]).await.unwrap();
        store.insert_many("campuses", vec![json!({ "data": { "value": "Main" } })]).await.unwrap();

        let batches = extract_all(&page(), "#searchForm", &targets(), &source(), RecordTime::now()).unwrap();
        let outcomes = refresh_all(store.clone(), batches).await.unwrap();

        assert_eq!(outcomes[0].published, Some(1));
        assert_eq!(outcomes[1].collection, "campuses");
        assert_eq!(outcomes[1].published, None);
        assert_eq!(outcomes[1].stale_year, None);

        let subjects = store.find("subjects", &FindQuery::default()).await.unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0]["data"], json!({ "value": "MATH", "text": "Mathematics" }));
        assert_eq!(subjects[0]["source"]["year"], json!("2020/2021"));

        // empty extraction keeps what was there
        assert_eq!(store.count("campuses", &Filter::All).await.unwrap(), 1);
        assert_eq!(store.count("subjects_staging", &Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_extraction_reports_the_year_it_kept() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_many("campuses", vec![json!({ "data": { "value": "Main" }, "source": { "year": "2019/2020" } })])
            .await
            .unwrap();

        let batches = extract_all(&page(), "#searchForm", &targets(), &source(), RecordTime::now()).unwrap();
        let outcomes = refresh_all(store.clone(), batches).await.unwrap();

        let campuses = &outcomes[1];
        assert_eq!(campuses.extracted, 0);
        assert_eq!(campuses.published, None);
        assert_eq!(campuses.stale_year.as_deref(), Some("2019/2020"));
        assert_eq!(outcomes[0].stale_year, None);

        let report = serde_json::to_value(campuses).unwrap();
        assert_eq!(report["stale_year"], json!("2019/2020"));
        assert!(serde_json::to_value(&outcomes[0]).unwrap().get("stale_year").is_none());
    }

    #[test]
    fn missing_form_fails_extraction() {
        let page = Page { body: "<html></html>".into(), status: "200 OK".into() };
        let result = extract_all(&page, "#searchForm", &targets(), &source(), RecordTime::now());
        assert!(matches!(result, Err(ScraperError::MalformedMarkup(_))));
    }
}
