//! One full run: bootstrap fetch, reference refresh, subject crawl, publish.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use super::cancel::CancelToken;
use super::handoff::{stage_link, Received, StageReceiver, StageSender};
use super::options::{self, OptionRefresh};
use super::writer::SectionWriter;
use crate::app::ports::HttpClientPort;
use crate::config::Config;
use crate::constants::{COURSES_COLLECTION, SUBJECTS_COLLECTION};
use crate::error::{Result, ScraperError};
use crate::metrics::{CrawlMetrics, PublishMetrics};
use crate::page::{FormFields, Page, PageClient};
use crate::parser::{self, PageExtraction};
use crate::storage::{DocumentStore, FindQuery};
use crate::types::{OptionData, OptionRecord, RecordTime, SourceInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    BootstrapFetch,
    OptionRefresh,
    AwaitBarrier,
    SubjectCrawl,
    AwaitDrain,
    Published,
    Failed,
}

/// A subject or page that was left out of the published snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectFailure {
    pub subject: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub source: SourceInfo,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub options: Vec<OptionRefresh>,
    pub subjects_total: usize,
    pub subjects_crawled: usize,
    pub failed_subjects: Vec<SubjectFailure>,
    pub failed_pages: Vec<SubjectFailure>,
    pub rows_scraped: usize,
    pub sections_published: usize,
    pub decode_warnings: usize,
    pub skipped_rows: usize,
}

/// A submitted subject's results page on its way to the merge consumer.
#[derive(Debug)]
struct SubjectPage {
    subject: String,
    page: Page,
}

#[derive(Debug, Default)]
struct DrainSummary {
    failed_pages: Vec<SubjectFailure>,
    rows_scraped: usize,
    decode_warnings: usize,
    skipped_rows: usize,
    sections_published: usize,
}

#[derive(Debug, Default)]
struct CrawlSummary {
    crawled: usize,
    failed: Vec<SubjectFailure>,
}

pub struct Worker {
    config: Config,
    store: Arc<dyn DocumentStore>,
    client: PageClient,
}

impl Worker {
    pub fn new(config: Config, store: Arc<dyn DocumentStore>, http: Arc<dyn HttpClientPort>) -> Result<Self> {
        let client = PageClient::new(http, &config.catalog, &config.crawl)?;
        Ok(Self { config, store, client })
    }

    /// Performs one complete run. On failure the published collections are
    /// left as they were before the run.
    pub async fn run(&self, cancel: CancelToken) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id);
        let started = Instant::now();

        let result = self.execute(run_id, cancel).instrument(span).await;
        PublishMetrics::record_run(result.is_ok(), started.elapsed().as_secs_f64());
        result
    }

    async fn execute(&self, run_id: Uuid, cancel: CancelToken) -> Result<RunReport> {
        let started_at = Utc::now();
        let mut state = RunState::Idle;

        let outcome = self.drive(run_id, started_at, &mut state, &cancel).await;
        if let Err(e) = &outcome {
            error!("run: failed during {:?}: {}", state, e);
            advance(&mut state, RunState::Failed);
        }
        outcome
    }

    async fn drive(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        state: &mut RunState,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        advance(state, RunState::BootstrapFetch);
        let fetched = self.client.fetch(cancel).await?;
        let source = SourceInfo::from_header(&fetched.header, self.client.url())?;
        let time = RecordTime::now();
        info!("run: catalog '{}' for {} ({})", source.title, source.year, fetched.page.status);

        advance(state, RunState::OptionRefresh);
        let batches = options::extract_all(
            &fetched.page,
            &self.config.catalog.form_selector,
            &self.config.options,
            &source,
            time,
        )?;
        drop(fetched);

        advance(state, RunState::AwaitBarrier);
        let refreshed = cancel
            .guard(options::refresh_all(Arc::clone(&self.store), batches))
            .await??;

        let subjects = self.read_subjects().await?;
        info!("run: {} subjects to crawl", subjects.len());

        let mut writer = SectionWriter::new(Arc::clone(&self.store), COURSES_COLLECTION);
        writer.reset().await?;

        let (mut tx, rx) = stage_link(self.config.crawl.handoff_capacity, cancel.clone());
        let consumer = tokio::spawn(
            drain(rx, writer, self.config.catalog.results_selector.clone(), source.clone()).in_current_span(),
        );

        advance(state, RunState::SubjectCrawl);
        let crawled = self.crawl(&subjects, &mut tx, cancel).await;
        let finished = match crawled {
            Ok(summary) => tx.finish().await.map(|_| summary),
            Err(e) => {
                drop(tx);
                Err(e)
            }
        };

        advance(state, RunState::AwaitDrain);
        let drained = consumer
            .await
            .map_err(|e| ScraperError::StageClosed(format!("merge consumer aborted: {e}")))?;

        let (crawl, drain) = match (finished, drained) {
            (Ok(crawl), Ok(drain)) => (crawl, drain),
            // the consumer's own failure is what closed the link
            (Err(ScraperError::StageClosed(_)), Err(e)) => return Err(e),
            (Err(e), _) | (Ok(_), Err(e)) => return Err(e),
        };

        advance(state, RunState::Published);
        let report = RunReport {
            run_id,
            source,
            started_at,
            finished_at: Utc::now(),
            options: refreshed,
            subjects_total: subjects.len(),
            subjects_crawled: crawl.crawled,
            failed_subjects: crawl.failed,
            failed_pages: drain.failed_pages,
            rows_scraped: drain.rows_scraped,
            sections_published: drain.sections_published,
            decode_warnings: drain.decode_warnings,
            skipped_rows: drain.skipped_rows,
        };
        info!(
            "run: published {} sections from {} rows ({} subjects failed, {} pages rejected)",
            report.sections_published,
            report.rows_scraped,
            report.failed_subjects.len(),
            report.failed_pages.len()
        );
        Ok(report)
    }

    /// Subjects with a non-empty value, in published order.
    async fn read_subjects(&self) -> Result<Vec<OptionData>> {
        let documents = self.store.find(SUBJECTS_COLLECTION, &FindQuery::default()).await?;
        let mut subjects = Vec::with_capacity(documents.len());
        for document in documents {
            let record: OptionRecord = serde_json::from_value(document)?;
            if !record.data.value.is_empty() {
                subjects.push(record.data);
            }
        }
        Ok(subjects)
    }

    /// Submits each subject in order with the courtesy delay before every request.
    ///
    /// A subject whose submission fails after retries is recorded and skipped.
    /// Returns `CrawlFailed` without finishing the link when the failures
    /// exceed the configured ratio, so the consumer discards staging.
    async fn crawl(
        &self,
        subjects: &[OptionData],
        tx: &mut StageSender<SubjectPage>,
        cancel: &CancelToken,
    ) -> Result<CrawlSummary> {
        let mut summary = CrawlSummary::default();
        let delay = self.config.crawl.subject_delay();

        for (index, subject) in subjects.iter().enumerate() {
            if tx.is_closed() {
                return Err(ScraperError::StageClosed("merge consumer stopped".into()));
            }
            cancel.sleep(delay).await?;

            let form = FormFields::for_subject(&self.config.catalog, &subject.value);
            match self.client.submit(&form, cancel).await {
                Ok(page) => {
                    info!(
                        "crawl: [{}/{}] {} ({}) -> {}",
                        index + 1,
                        subjects.len(),
                        subject.value,
                        subject.text,
                        page.status
                    );
                    tx.send(SubjectPage { subject: subject.value.clone(), page }).await?;
                    summary.crawled += 1;
                }
                Err(ScraperError::Cancelled) => return Err(ScraperError::Cancelled),
                Err(e) => {
                    warn!("crawl: skipping subject {}: {}", subject.value, e);
                    CrawlMetrics::record_subject_failure();
                    summary.failed.push(SubjectFailure { subject: subject.value.clone(), error: e.to_string() });
                }
            }
        }

        let failed = summary.failed.len();
        if crawl_abandoned(summary.crawled, failed, self.config.crawl.max_subject_failure_ratio) {
            return Err(ScraperError::CrawlFailed { failed, attempted: summary.crawled + failed });
        }
        Ok(summary)
    }
}

/// True when too many subjects failed for the snapshot to be worth publishing.
/// Losing every attempted subject is always fatal, whatever the ratio.
fn crawl_abandoned(crawled: usize, failed: usize, max_failure_ratio: f64) -> bool {
    if failed == 0 {
        return false;
    }
    crawled == 0 || failed as f64 / (crawled + failed) as f64 > max_failure_ratio
}

fn advance(state: &mut RunState, next: RunState) {
    info!("run: {:?} -> {:?}", state, next);
    *state = next;
}

/// Single consumer: extracts and merges each page in arrival order, publishes
/// on completion, and discards staging on any other outcome.
async fn drain(
    mut rx: StageReceiver<SubjectPage>,
    mut writer: SectionWriter,
    results_selector: String,
    source: SourceInfo,
) -> Result<DrainSummary> {
    let outcome = drain_pages(&mut rx, &mut writer, &results_selector, &source).await;
    if outcome.is_err() {
        if let Err(e) = writer.discard().await {
            warn!("merge: failed to discard staging after error: {}", e);
        }
    }
    outcome
}

async fn drain_pages(
    rx: &mut StageReceiver<SubjectPage>,
    writer: &mut SectionWriter,
    results_selector: &str,
    source: &SourceInfo,
) -> Result<DrainSummary> {
    let mut summary = DrainSummary::default();
    loop {
        let SubjectPage { subject, page } = match rx.recv().await? {
            Received::Item(item) => item,
            Received::Finished { sent } => {
                info!("merge: producer finished after {} pages; publishing", sent);
                summary.sections_published = writer.publish().await?;
                return Ok(summary);
            }
            Received::Closed => {
                return Err(ScraperError::StageClosed("crawl stopped before completion".into()));
            }
        };

        let extraction = match extract(&page, results_selector, source) {
            Ok(extraction) => extraction,
            Err(ScraperError::MalformedMarkup(reason)) => {
                warn!("merge: rejected results page for {}: {}", subject, reason);
                CrawlMetrics::record_page_rejected();
                summary.failed_pages.push(SubjectFailure { subject, error: reason });
                continue;
            }
            Err(e) => return Err(e),
        };

        for warning in &extraction.warnings {
            warn!("merge: {}: {}", subject, warning);
        }
        for skipped in &extraction.skipped {
            warn!("merge: {} skipped {}: {}", subject, skipped.location, skipped.reason);
        }
        CrawlMetrics::record_extraction(extraction.rows.len(), extraction.warnings.len(), extraction.skipped.len());

        summary.rows_scraped += extraction.rows.len();
        summary.decode_warnings += extraction.warnings.len();
        summary.skipped_rows += extraction.skipped.len();

        for row in &extraction.rows {
            writer.merge_row(row).await?;
        }
    }
}

/// Parses and extracts outside of any suspension point; the document tree is not `Send`.
fn extract(page: &Page, results_selector: &str, source: &SourceInfo) -> Result<PageExtraction> {
    let document = page.document();
    parser::extract_page(&document, results_selector, source)
}
