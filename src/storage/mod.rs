//! Storage module for persisting crawl results
//!
//! This module handles all database operations for the crawler:
//! - SQLite database initialization and schema management
//! - Extracted program pages (upserted by URL)
//! - Exclusion entries and their confidence
//! - Append-only quality metrics driving strategy selection
//!
//! Discovery state deliberately lives outside the database, as JSON files
//! under the state directory; see [`crate::discovery`].

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::strategy::{ConfidenceLevel, ExtractionStrategy};
use crate::CrawlError;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(CrawlError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, CrawlError> {
    Ok(SqliteStorage::new(path)?)
}

/// An extracted funding-program page
///
/// Immutable once written; a re-fetch of the same URL supersedes the previous
/// row via upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub url: String,
    pub institution: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Requirement sentences grouped by category, stored as JSON
    pub categorized_requirements: BTreeMap<String, Vec<String>>,
    pub funding_amount_min: Option<f64>,
    pub funding_amount_max: Option<f64>,
    pub currency: Option<String>,
    pub deadline: Option<String>,
    pub open_deadline: bool,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub confidence: f64,
    pub extraction_method: ExtractionStrategy,
    pub fetched_at: DateTime<Utc>,
}

/// A URL excluded from future crawling, with how sure we are about it
#[derive(Debug, Clone, PartialEq)]
pub struct ExclusionEntry {
    pub url: String,
    pub host: String,
    pub reason: String,
    /// In `[0, 1]`; entries below the recheck ceiling get revisited
    pub confidence: f64,
    pub excluded_at: DateTime<Utc>,
}

/// One observation of extraction quality, append-only
#[derive(Debug, Clone, PartialEq)]
pub struct QualityMetric {
    pub institution: String,
    pub page_type: PageType,
    pub extraction_method: ExtractionStrategy,
    /// Accuracy estimate in `[0, 1]` for this extraction
    pub accuracy: f64,
    pub confidence: ConfidenceLevel,
    /// Identifier of the dominant pattern or backend detail, when known
    pub extraction_pattern: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// What kind of outcome a metric describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Program,
    Exclusion,
    Failure,
}

impl PageType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Program => "program",
            Self::Exclusion => "exclusion",
            Self::Failure => "failure",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "program" => Some(Self::Program),
            "exclusion" => Some(Self::Exclusion),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}
