//! Crawl phase metrics: page requests, retries, extraction output.

/// Metrics collection for fetching and extracting catalog pages
pub struct CrawlMetrics;

impl CrawlMetrics {
    pub fn record_page_fetched(kind: &'static str, duration_secs: f64, body_bytes: usize) {
        ::metrics::counter!("tt_pages_fetched_total", "kind" => kind).increment(1);
        ::metrics::histogram!("tt_page_fetch_duration_seconds", "kind" => kind).record(duration_secs);
        ::metrics::histogram!("tt_page_body_bytes", "kind" => kind).record(body_bytes as f64);
    }

    pub fn record_retry(kind: &'static str) {
        ::metrics::counter!("tt_fetch_retries_total", "kind" => kind).increment(1);
    }

    pub fn record_subject_failure() {
        ::metrics::counter!("tt_subject_failures_total").increment(1);
    }

    /// Record the outcome of extracting one results page
    pub fn record_extraction(rows: usize, warnings: usize, skipped_rows: usize) {
        ::metrics::counter!("tt_rows_scraped_total").increment(rows as u64);
        ::metrics::counter!("tt_decode_warnings_total").increment(warnings as u64);
        ::metrics::counter!("tt_rows_skipped_total").increment(skipped_rows as u64);
    }

    pub fn record_page_rejected() {
        ::metrics::counter!("tt_pages_rejected_total").increment(1);
    }
}
