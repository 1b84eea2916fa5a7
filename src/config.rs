use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    COMMAND_FIELD, DEFAULT_CATALOG_URL, DEFAULT_FORM_SELECTOR, DEFAULT_HEADER_SELECTOR,
    DEFAULT_OPTION_TARGETS, DEFAULT_RESULTS_SELECTOR, SEARCH_COMMAND, SUBJECTS_COLLECTION,
    SUBJECT_FIELD,
};
use crate::error::{Result, ScraperError};

pub const DEFAULT_CONFIG_PATH: &str = "timetable.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub crawl: CrawlConfig,
    pub options: Vec<OptionTarget>,
    pub store: StoreConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub url: String,
    pub form_selector: String,
    pub header_selector: String,
    pub results_selector: String,
    pub subject_field: String,
    /// Fixed fields sent with every subject search besides the subject itself.
    pub extra_fields: Vec<(String, String)>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CATALOG_URL.to_string(),
            form_selector: DEFAULT_FORM_SELECTOR.to_string(),
            header_selector: DEFAULT_HEADER_SELECTOR.to_string(),
            results_selector: DEFAULT_RESULTS_SELECTOR.to_string(),
            subject_field: SUBJECT_FIELD.to_string(),
            extra_fields: vec![(COMMAND_FIELD.to_string(), SEARCH_COMMAND.to_string())],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub subject_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub handoff_capacity: usize,
    /// Largest share of subjects allowed to fail before the run is abandoned.
    /// A run where every attempted subject failed never publishes.
    pub max_subject_failure_ratio: f64,
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            subject_delay_ms: 10_000,
            request_timeout_secs: 30,
            max_attempts: 3,
            base_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
            handoff_capacity: 1,
            max_subject_failure_ratio: 0.5,
            user_agent: concat!("timetable-scraper/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl CrawlConfig {
    pub fn subject_delay(&self) -> Duration {
        Duration::from_millis(self.subject_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// A reference list to refresh: the `<select>` matched by `selector` feeds `collection`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionTarget {
    pub collection: String,
    pub selector: String,
}

pub fn default_option_targets() -> Vec<OptionTarget> {
    DEFAULT_OPTION_TARGETS
        .iter()
        .map(|(collection, selector)| OptionTarget {
            collection: collection.to_string(),
            selector: selector.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: "data/timetable.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Config {
    /// Built-in configuration: the seven catalog reference lists and the production catalog URL.
    pub fn with_defaults() -> Self {
        Self {
            options: default_option_targets(),
            ..Default::default()
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&config_content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        if config.options.is_empty() {
            config.options = default_option_targets();
        }
        Ok(config)
    }

    /// Reads the file when present, otherwise starts from defaults; environment overrides win.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            Self::load(path)?
        } else {
            Self::with_defaults()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("TT_CATALOG_URL") {
            self.catalog.url = url;
        }
        if let Ok(path) = std::env::var("TT_DB_PATH") {
            self.store.path = path;
        }
        if let Ok(delay) = std::env::var("TT_SUBJECT_DELAY_MS") {
            self.crawl.subject_delay_ms = delay
                .parse()
                .map_err(|e| ScraperError::Config(format!("TT_SUBJECT_DELAY_MS: {e}")))?;
        }
        if let Ok(port) = std::env::var("TT_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| ScraperError::Config(format!("TT_SERVER_PORT: {e}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.options.is_empty() {
            return Err(ScraperError::Config("at least one option target is required".into()));
        }
        let mut seen = HashSet::new();
        for target in &self.options {
            if !seen.insert(target.collection.as_str()) {
                return Err(ScraperError::Config(format!(
                    "duplicate option collection '{}'",
                    target.collection
                )));
            }
        }
        if !seen.contains(SUBJECTS_COLLECTION) {
            return Err(ScraperError::Config(format!(
                "option targets must include '{SUBJECTS_COLLECTION}'"
            )));
        }
        if self.crawl.max_attempts == 0 {
            return Err(ScraperError::Config("crawl.max_attempts must be at least 1".into()));
        }
        if self.crawl.handoff_capacity == 0 {
            return Err(ScraperError::Config("crawl.handoff_capacity must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.crawl.max_subject_failure_ratio) {
            return Err(ScraperError::Config(format!(
                "crawl.max_subject_failure_ratio must be between 0 and 1, got {}",
                self.crawl.max_subject_failure_ratio
            )));
        }
        Ok(())
    }

    pub fn option_collections(&self) -> impl Iterator<Item = &str> {
        self.options.iter().map(|t| t.collection.as_str())
    }
}
