//! Page client for the catalog site: one bootstrap GET and one form POST per subject.

use rand::Rng;
use scraper::{Html, Selector};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::app::ports::{HttpClientPort, HttpResponse};
use crate::config::{CatalogConfig, CrawlConfig};
use crate::error::{Result, ScraperError};
use crate::metrics::CrawlMetrics;
use crate::pipeline::cancel::CancelToken;
use crate::text;

/// Bounded exponential backoff for transient request failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(crawl: &CrawlConfig) -> Self {
        Self {
            max_attempts: crawl.max_attempts.max(1),
            base_backoff: Duration::from_millis(crawl.base_backoff_ms),
            max_backoff: Duration::from_millis(crawl.max_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped, plus up to 25% jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_backoff);
        let jitter_ms = (exp.as_millis() / 4) as u64;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        exp + Duration::from_millis(jitter)
    }
}

/// Raw markup of a catalog response plus its status line.
#[derive(Debug, Clone)]
pub struct Page {
    pub body: String,
    pub status: String,
}

impl Page {
    /// Parses the body into a traversable tree. The tree is not `Send`; keep it
    /// out of any `.await`.
    pub fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }
}

/// The bootstrap page together with its title/year header text.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub page: Page,
    pub header: String,
}

/// Form fields for a POST, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields(Vec<(String, Vec<String>)>);

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any existing values of `name`.
    pub fn set(&mut self, name: &str, value: &str) -> &mut Self {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => *values = vec![value.to_string()],
            None => self.0.push((name.to_string(), vec![value.to_string()])),
        }
        self
    }

    pub fn append(&mut self, name: &str, value: &str) -> &mut Self {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value.to_string()),
            None => self.0.push((name.to_string(), vec![value.to_string()])),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_slice())
    }

    /// Flattened `name=value` pairs, one per value.
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.clone(), v.clone())))
            .collect()
    }

    /// The search submission for one subject code.
    pub fn for_subject(catalog: &CatalogConfig, subject: &str) -> Self {
        let mut fields = Self::new();
        fields.set(&catalog.subject_field, subject);
        for (name, value) in &catalog.extra_fields {
            fields.set(name, value);
        }
        fields
    }
}

pub struct PageClient {
    http: Arc<dyn HttpClientPort>,
    url: String,
    header_selector: Selector,
    header_selector_src: String,
    retry: RetryPolicy,
    last_status: Mutex<Option<String>>,
}

impl PageClient {
    pub fn new(http: Arc<dyn HttpClientPort>, catalog: &CatalogConfig, crawl: &CrawlConfig) -> Result<Self> {
        let header_selector = Selector::parse(&catalog.header_selector)
            .map_err(|_| ScraperError::Selector(catalog.header_selector.clone()))?;
        Ok(Self {
            http,
            url: catalog.url.clone(),
            header_selector,
            header_selector_src: catalog.header_selector.clone(),
            retry: RetryPolicy::from_config(crawl),
            last_status: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Status line of the most recent response, kept for diagnostics.
    pub fn last_status(&self) -> Option<String> {
        self.last_status.lock().ok().and_then(|s| s.clone())
    }

    /// GETs the catalog root and reads its header element.
    pub async fn fetch(&self, cancel: &CancelToken) -> Result<FetchedPage> {
        let resp = self
            .request_with_retry("bootstrap", cancel, || self.http.get(&self.url))
            .await?;
        let header = self.extract_header(&resp.body).ok_or_else(|| {
            ScraperError::MalformedMarkup(format!(
                "catalog header '{}' not found on {}",
                self.header_selector_src,
                self.url
            ))
        })?;
        debug!("Fetched bootstrap page: header='{}' status='{}'", header, resp.status_text);
        Ok(FetchedPage {
            page: Page { body: resp.body, status: resp.status_text },
            header,
        })
    }

    /// POSTs the search form and returns the results page.
    pub async fn submit(&self, form: &FormFields, cancel: &CancelToken) -> Result<Page> {
        let pairs = form.pairs();
        let resp = self
            .request_with_retry("submit", cancel, || self.http.post_form(&self.url, &pairs))
            .await?;
        Ok(Page { body: resp.body, status: resp.status_text })
    }

    fn extract_header(&self, body: &str) -> Option<String> {
        let document = Html::parse_document(body);
        let header = document.select(&self.header_selector).next()?;
        Some(text::element_text(&header))
    }

    async fn request_with_retry<F, Fut>(
        &self,
        kind: &'static str,
        cancel: &CancelToken,
        op: F,
    ) -> Result<HttpResponse>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<HttpResponse, String>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let outcome = cancel.guard(op()).await?;

            let err = match outcome {
                Ok(resp) => {
                    if let Ok(mut last) = self.last_status.lock() {
                        *last = Some(resp.status_text.clone());
                    }
                    if resp.is_success() {
                        CrawlMetrics::record_page_fetched(kind, started.elapsed().as_secs_f64(), resp.body.len());
                        return Ok(resp);
                    }
                    ScraperError::HttpStatus { url: self.url.clone(), status: resp.status }
                }
                Err(message) => ScraperError::Network {
                    url: self.url.clone(),
                    attempts: attempt,
                    message,
                },
            };

            if !err.is_retryable() || attempt >= self.retry.max_attempts {
                return Err(err);
            }

            let wait = self.retry.backoff(attempt - 1);
            warn!(
                "{} request failed (attempt {}/{}): {}; backing off {:.1}s",
                kind,
                attempt,
                self.retry.max_attempts,
                err,
                wait.as_secs_f64()
            );
            CrawlMetrics::record_retry(kind);
            cancel.sleep(wait).await?;
        }
    }
}
