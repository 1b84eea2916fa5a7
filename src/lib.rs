pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod page;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod server;
pub mod storage;
pub mod text;
pub mod types;

// Ports and their adapters
pub mod app;
pub mod infra;
