use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::constants::staging_name;
use crate::error::Result;
use crate::metrics::PublishMetrics;
use crate::storage::{DocumentStore, Filter};
use crate::types::{ScrapedRow, StoredSection};

const TIMES_PATH: &str = "sectionData.times";

/// Scalar parts of the identity key, indexed in staging so a merge only
/// decodes the few sections that can match.
const IDENTITY_INDEX: [&str; 3] = ["courseData.faculty", "courseData.number", "sectionData.number"];

/// Replaces `target` with the full contents of `staging` in one store-level step.
pub async fn snapshot_publish(store: &dyn DocumentStore, staging: &str, target: &str) -> Result<usize> {
    let started = Instant::now();
    let published = store.replace_collection(staging, target).await?;
    PublishMetrics::record_publish(target, published, started.elapsed().as_secs_f64());
    info!(staging, collection = target, published, "Published snapshot");
    Ok(published)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Times were appended to an existing section.
    Appended,
    /// No section with the row's identity existed yet.
    Inserted,
}

/// Groups scraped rows into sections in a staging collection and publishes them.
pub struct SectionWriter {
    store: Arc<dyn DocumentStore>,
    staging: String,
    target: String,
    inserted: usize,
    appended: usize,
}

impl SectionWriter {
    pub fn new(store: Arc<dyn DocumentStore>, target: &str) -> Self {
        Self {
            store,
            staging: staging_name(target),
            target: target.to_string(),
            inserted: 0,
            appended: 0,
        }
    }

    pub fn staging(&self) -> &str {
        &self.staging
    }

    /// Sections inserted so far; equals the number of distinct identity keys merged.
    pub fn sections(&self) -> usize {
        self.inserted
    }

    /// Clears stale staging data left by an interrupted run.
    pub async fn reset(&mut self) -> Result<()> {
        self.inserted = 0;
        self.appended = 0;
        self.store.clear(&self.staging).await?;
        self.store.create_index(&self.staging, &IDENTITY_INDEX).await
    }

    /// Appends the row's times to the section with the same identity key, or
    /// inserts a new section when none matches.
    ///
    /// Times are not deduplicated: merging the same row twice doubles its entries.
    pub async fn merge_row(&mut self, row: &ScrapedRow) -> Result<MergeOutcome> {
        let key = identity_filter(row)?;
        let times = match serde_json::to_value(&row.section.times)? {
            Value::Array(items) => items,
            other => vec![other],
        };

        let matched = self.store.push_each(&self.staging, &key, TIMES_PATH, times).await?;
        if matched > 0 {
            self.appended += 1;
            debug!(
                faculty = %row.course.faculty,
                number = row.course.number,
                section = row.section.number,
                "Appended times to existing section"
            );
            return Ok(MergeOutcome::Appended);
        }

        let document = serde_json::to_value(StoredSection::from(row))?;
        self.store.insert_many(&self.staging, vec![document]).await?;
        self.inserted += 1;
        Ok(MergeOutcome::Inserted)
    }

    /// Publishes staging into the canonical collection, then drops staging.
    pub async fn publish(&mut self) -> Result<usize> {
        let published = snapshot_publish(self.store.as_ref(), &self.staging, &self.target).await?;
        self.store.drop_collection(&self.staging).await?;
        info!(
            collection = %self.target,
            published,
            merged_rows = self.inserted + self.appended,
            "Section snapshot published"
        );
        Ok(published)
    }

    /// Drops staging without touching the canonical collection.
    pub async fn discard(&mut self) -> Result<()> {
        self.store.drop_collection(&self.staging).await
    }
}

/// (course, section number, section component). The faculty and course
/// number terms are implied by the whole-course term; they are spelled out so
/// an indexed store can narrow the lookup.
fn identity_filter(row: &ScrapedRow) -> Result<Filter> {
    Ok(Filter::And(vec![
        Filter::eq("courseData.faculty", row.course.faculty.clone()),
        Filter::eq("courseData.number", row.course.number),
        Filter::eq("courseData", serde_json::to_value(&row.course)?),
        Filter::eq("sectionData.number", row.section.number),
        Filter::eq("sectionData.component", row.section.component.clone()),
    ]))
}
