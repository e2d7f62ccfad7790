//! Storage trait and error types

use thiserror::Error;

use crate::storage::{ExclusionEntry, Page, QualityMetric};
use crate::strategy::ExtractionStrategy;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// All durable crawl results go through this interface; the scheduler,
/// metrics recorder, and exclusion manager never touch SQL directly.
pub trait Storage: Send {
    // ===== Pages =====

    /// Inserts a page, replacing any previous row for the same URL
    fn upsert_page(&mut self, page: &Page) -> StorageResult<()>;

    /// Gets a page by its normalized URL
    fn get_page(&self, url: &str) -> StorageResult<Option<Page>>;

    /// Counts stored pages for one institution
    fn count_pages(&self, institution: &str) -> StorageResult<u64>;

    // ===== Exclusions =====

    /// Inserts or replaces an exclusion entry
    fn upsert_exclusion(&mut self, entry: &ExclusionEntry) -> StorageResult<()>;

    /// Gets an exclusion entry by URL
    fn get_exclusion(&self, url: &str) -> StorageResult<Option<ExclusionEntry>>;

    /// Lists exclusions at or below a confidence ceiling, oldest first
    ///
    /// # Arguments
    ///
    /// * `max_confidence` - Only entries with confidence <= this value
    /// * `host` - When set, only entries for this host
    /// * `limit` - Maximum number of entries returned
    fn list_low_confidence_exclusions(
        &self,
        max_confidence: f64,
        host: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ExclusionEntry>>;

    /// Removes an exclusion entry; returns true if a row was deleted
    fn remove_exclusion(&mut self, url: &str) -> StorageResult<bool>;

    /// Returns true if the URL is currently excluded
    fn is_excluded(&self, url: &str) -> StorageResult<bool>;

    // ===== Quality metrics =====

    /// Appends a quality metric
    fn insert_metric(&mut self, metric: &QualityMetric) -> StorageResult<()>;

    /// Returns the accuracies of the most recent metrics for an
    /// institution/method pair, newest first, up to `window` entries
    fn recent_accuracies(
        &self,
        institution: &str,
        method: ExtractionStrategy,
        window: usize,
    ) -> StorageResult<Vec<f64>>;

    /// Returns the accuracies of the most recent metrics for an institution
    /// across all methods, newest first, up to `window` entries
    fn recent_accuracies_any_method(
        &self,
        institution: &str,
        window: usize,
    ) -> StorageResult<Vec<f64>>;
}
