use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network error for {url} after {attempts} attempt(s): {message}")]
    Network {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Unexpected HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Malformed markup: {0}")]
    MalformedMarkup(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid selector '{0}'")]
    Selector(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Crawl abandoned: {failed} of {attempted} subject(s) failed")]
    CrawlFailed { failed: usize, attempted: usize },

    #[error("Pipeline stage closed: {0}")]
    StageClosed(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl ScraperError {
    /// Transient failures worth another attempt: transport errors, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScraperError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ScraperError::Network { .. } => true,
            ScraperError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for ScraperError {
    fn from(err: rusqlite::Error) -> Self {
        ScraperError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScraperError>;
