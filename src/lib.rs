//! Fundcrawl: an adaptive funding-program crawler
//!
//! This crate discovers, fetches, and extracts structured funding-program data
//! from a fixed set of institutional websites. It resumes interrupted crawls
//! from durable per-institution discovery state, selects an extraction
//! strategy from historical accuracy, and periodically rechecks its own
//! low-confidence exclusions to reverse false positives.

pub mod config;
pub mod discovery;
pub mod exclusion;
pub mod extract;
pub mod metrics;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod strategy;
pub mod url;
pub mod worker;

use thiserror::Error;

/// Main error type for fundcrawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Login failed for institution {institution}: {message}")]
    Login {
        institution: String,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Discovery state error: {0}")]
    State(#[from] StateError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Unknown institution: {0}")]
    UnknownInstitution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Discovery-state persistence errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to serialize discovery state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error writing discovery state: {0}")]
    Io(#[from] std::io::Error),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for fundcrawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{Config, InstitutionConfig};
pub use discovery::{DiscoveryState, DiscoveryStateStore, ExploredSection};
pub use scheduler::{CycleOptions, CycleRunner, CycleScope, CycleSummary, DiscoveryMode};
pub use strategy::{ConfidenceLevel, ExtractionStrategy};
