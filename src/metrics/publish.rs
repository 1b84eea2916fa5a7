//! Publish phase metrics: snapshot swaps and whole-run timings.

pub struct PublishMetrics;

impl PublishMetrics {
    /// Record a completed snapshot publish into a canonical collection
    pub fn record_publish(collection: &str, documents: usize, duration_secs: f64) {
        ::metrics::gauge!("tt_collection_documents", "collection" => collection.to_string())
            .set(documents as f64);
        ::metrics::histogram!("tt_publish_duration_seconds", "collection" => collection.to_string())
            .record(duration_secs);
    }

    pub fn record_run(success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "failure" };
        ::metrics::counter!("tt_runs_total", "outcome" => outcome).increment(1);
        ::metrics::histogram!("tt_run_duration_seconds").record(duration_secs);
    }
}
