// Ingestion pipeline: reference refresh, subject crawl, merge and publish

pub mod cancel;
pub mod handoff;
pub mod options;
pub mod orchestrator;
pub mod writer;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use options::OptionRefresh;
pub use orchestrator::{RunReport, RunState, SubjectFailure, Worker};
pub use writer::{snapshot_publish, MergeOutcome, SectionWriter};
