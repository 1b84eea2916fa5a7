#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use timetable_scraper::app::ports::{HttpClientPort, HttpResponse};
use timetable_scraper::config::Config;
use timetable_scraper::error::{Result, ScraperError};
use timetable_scraper::storage::{DocumentStore, Filter, FindQuery, InMemoryStore};

pub const CATALOG_URL: &str = "http://catalog.test/timetable";

pub const BOOTSTRAP: &str = r#"<html><body>
  <div class="page-header"><h1>Timetable <small>Fall/Winter Academic Timetable2020/2021</small></h1></div>
  <form id="searchForm">
    <select id="inputSubject" name="subject">
      <option value="">All Subjects</option>
      <option value="MATH">Mathematics</option>
      <option value="CS">Computer   Science</option>
      <option value="GONE">Discontinued</option>
    </select>
    <select id="inputDesignation"><option value="A">A</option><option value="B">B</option></select>
    <select id="inputCourseType"><option value="IP">In Person</option></select>
    <select id="inputComponent"><option value="LEC">Lecture</option><option value="LAB">Lab</option></select>
    <select id="inputCampus"></select>
    <select name="time"><option value="8:30 AM">8:30 AM</option></select>
    <select name="end_time"><option value="9:30 AM">9:30 AM</option></select>
  </form>
</body></html>"#;

pub fn row(section: &str, component: &str, days: &[&str], start: &str) -> String {
    let day_cells: String = days.iter().map(|d| format!("<td>{d}</td>")).collect();
    format!(
        "<tr><td>{section}</td><td>{component}</td><td>5001</td>\
         <td><table><tbody><tr>{day_cells}</tr></tbody></table></td>\
         <td>{start}</td><td>9:30 AM</td><td>NS 1</td><td>Smith</td><td></td>\
         <td>Not Full</td><td>Main</td><td>In Person</td></tr>"
    )
}

pub fn course(header: &str, description: &str, rows: &[String]) -> String {
    format!(
        "<h4>{header}</h4><p>{description}</p>\
         <table><thead><tr><th>Section</th></tr></thead><tbody>{}</tbody></table>",
        rows.concat()
    )
}

pub fn results_page(courses: &[String]) -> String {
    format!("<html><body><div class=\"span12\">{}</div></body></html>", courses.concat())
}

/// MATH has one lecture split across two rows plus a lab; CS has a single lecture.
pub fn default_results() -> HashMap<String, String> {
    let math = results_page(&[course(
        "MATH 1000A - Calculus - Honours",
        "Limits and derivatives.",
        &[
            row("001", "LEC", &["M", "&nbsp;", "&nbsp;", "&nbsp;", "&nbsp;"], "8:30 AM"),
            row("001", "LEC", &["&nbsp;", "&nbsp;", "W", "&nbsp;", "&nbsp;"], "10:30 AM"),
            row("002", "LAB", &["&nbsp;", "Tu", "&nbsp;", "&nbsp;", "&nbsp;"], "1:30 PM"),
        ],
    )]);
    let cs = results_page(&[course(
        "CS 2210 - Data Structures",
        "Trees.",
        &[row("001", "LEC", &["F"], "8:30 AM")],
    )]);
    HashMap::from([("MATH".to_string(), math), ("CS".to_string(), cs)])
}

pub fn test_config() -> Config {
    let mut config = Config::with_defaults();
    config.catalog.url = CATALOG_URL.to_string();
    config.crawl.subject_delay_ms = 0;
    config.crawl.max_attempts = 1;
    config.crawl.base_backoff_ms = 1;
    config.crawl.max_backoff_ms = 1;
    config
}

fn ok(body: &str) -> std::result::Result<HttpResponse, String> {
    Ok(HttpResponse { status: 200, status_text: "200 OK".into(), body: body.into() })
}

/// Serves the bootstrap page and canned results per subject; unknown subjects get a 404.
pub struct FakeCatalog {
    bootstrap: String,
    results: HashMap<String, String>,
    pub submitted: Mutex<Vec<String>>,
}

impl FakeCatalog {
    pub fn new(results: HashMap<String, String>) -> Arc<Self> {
        Arc::new(Self { bootstrap: BOOTSTRAP.to_string(), results, submitted: Mutex::new(Vec::new()) })
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

fn subject_of(form: &[(String, String)]) -> String {
    form.iter().find(|(name, _)| name == "subject").map(|(_, v)| v.clone()).unwrap_or_default()
}

#[async_trait]
impl HttpClientPort for FakeCatalog {
    async fn get(&self, _url: &str) -> std::result::Result<HttpResponse, String> {
        ok(&self.bootstrap)
    }

    async fn post_form(&self, _url: &str, form: &[(String, String)]) -> std::result::Result<HttpResponse, String> {
        let subject = subject_of(form);
        self.submitted.lock().unwrap().push(subject.clone());
        match self.results.get(&subject) {
            Some(body) => ok(body),
            None => Ok(HttpResponse { status: 404, status_text: "404 Not Found".into(), body: String::new() }),
        }
    }
}

/// Answers the bootstrap request, then hangs on every submission after signalling `entered`.
pub struct StallingCatalog {
    pub entered: Arc<Notify>,
}

#[async_trait]
impl HttpClientPort for StallingCatalog {
    async fn get(&self, _url: &str) -> std::result::Result<HttpResponse, String> {
        ok(BOOTSTRAP)
    }

    async fn post_form(&self, _url: &str, _form: &[(String, String)]) -> std::result::Result<HttpResponse, String> {
        self.entered.notify_one();
        std::future::pending().await
    }
}

/// Delegates to an in-memory store but fails inserts into one collection while armed.
pub struct FailingStore {
    pub inner: Arc<InMemoryStore>,
    fail_collection: String,
    armed: AtomicBool,
}

impl FailingStore {
    pub fn new(inner: Arc<InMemoryStore>, fail_collection: &str) -> Arc<Self> {
        Arc::new(Self { inner, fail_collection: fail_collection.to_string(), armed: AtomicBool::new(false) })
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn clear(&self, collection: &str) -> Result<()> {
        self.inner.clear(collection).await
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<()> {
        if self.armed.load(Ordering::SeqCst) && collection == self.fail_collection {
            return Err(ScraperError::Store(format!("disk full writing {collection}")));
        }
        self.inner.insert_many(collection, documents).await
    }

    async fn push_each(&self, collection: &str, filter: &Filter, array_path: &str, values: Vec<Value>) -> Result<u64> {
        self.inner.push_each(collection, filter, array_path, values).await
    }

    async fn replace_collection(&self, source: &str, target: &str) -> Result<usize> {
        self.inner.replace_collection(source, target).await
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.inner.drop_collection(collection).await
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Value>> {
        self.inner.find(collection, query).await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        self.inner.count(collection, filter).await
    }
}
