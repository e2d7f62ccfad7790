//! SQLite storage implementation

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{ExclusionEntry, Page, PageType, QualityMetric};
use crate::strategy::ExtractionStrategy;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

/// Row image of a page before type conversion
struct RawPage {
    url: String,
    institution: String,
    title: Option<String>,
    description: Option<String>,
    categorized_requirements: String,
    funding_amount_min: Option<f64>,
    funding_amount_max: Option<f64>,
    currency: Option<String>,
    deadline: Option<String>,
    open_deadline: bool,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    confidence: f64,
    extraction_method: String,
    fetched_at: String,
}

const PAGE_COLUMNS: &str = "url, institution, title, description, categorized_requirements, \
     funding_amount_min, funding_amount_max, currency, deadline, open_deadline, \
     contact_email, contact_phone, confidence, extraction_method, fetched_at";

fn read_raw_page(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawPage> {
    Ok(RawPage {
        url: row.get(0)?,
        institution: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        categorized_requirements: row.get(4)?,
        funding_amount_min: row.get(5)?,
        funding_amount_max: row.get(6)?,
        currency: row.get(7)?,
        deadline: row.get(8)?,
        open_deadline: row.get(9)?,
        contact_email: row.get(10)?,
        contact_phone: row.get(11)?,
        confidence: row.get(12)?,
        extraction_method: row.get(13)?,
        fetched_at: row.get(14)?,
    })
}

impl RawPage {
    fn into_page(self) -> StorageResult<Page> {
        let categorized_requirements: BTreeMap<String, Vec<String>> =
            serde_json::from_str(&self.categorized_requirements)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let extraction_method = ExtractionStrategy::from_db_string(&self.extraction_method)
            .ok_or_else(|| {
                StorageError::Serialization(format!(
                    "unknown extraction method: {}",
                    self.extraction_method
                ))
            })?;
        let fetched_at = parse_timestamp(&self.fetched_at)?;

        Ok(Page {
            url: self.url,
            institution: self.institution,
            title: self.title,
            description: self.description,
            categorized_requirements,
            funding_amount_min: self.funding_amount_min,
            funding_amount_max: self.funding_amount_max,
            currency: self.currency,
            deadline: self.deadline,
            open_deadline: self.open_deadline,
            contact_email: self.contact_email,
            contact_phone: self.contact_phone,
            confidence: self.confidence,
            extraction_method,
            fetched_at,
        })
    }
}

fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("bad timestamp {s}: {e}")))
}

fn read_exclusion(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ExclusionEntry, String)> {
    let entry = ExclusionEntry {
        url: row.get(0)?,
        host: row.get(1)?,
        reason: row.get(2)?,
        confidence: row.get(3)?,
        excluded_at: Utc::now(), // replaced from the raw string below
    };
    let excluded_at: String = row.get(4)?;
    Ok((entry, excluded_at))
}

impl Storage for SqliteStorage {
    fn upsert_page(&mut self, page: &Page) -> StorageResult<()> {
        let requirements = serde_json::to_string(&page.categorized_requirements)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        self.conn.execute(
            "INSERT INTO pages (url, institution, title, description, categorized_requirements, \
             funding_amount_min, funding_amount_max, currency, deadline, open_deadline, \
             contact_email, contact_phone, confidence, extraction_method, fetched_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
             ON CONFLICT(url) DO UPDATE SET \
             institution = excluded.institution, \
             title = excluded.title, \
             description = excluded.description, \
             categorized_requirements = excluded.categorized_requirements, \
             funding_amount_min = excluded.funding_amount_min, \
             funding_amount_max = excluded.funding_amount_max, \
             currency = excluded.currency, \
             deadline = excluded.deadline, \
             open_deadline = excluded.open_deadline, \
             contact_email = excluded.contact_email, \
             contact_phone = excluded.contact_phone, \
             confidence = excluded.confidence, \
             extraction_method = excluded.extraction_method, \
             fetched_at = excluded.fetched_at",
            params![
                page.url,
                page.institution,
                page.title,
                page.description,
                requirements,
                page.funding_amount_min,
                page.funding_amount_max,
                page.currency,
                page.deadline,
                page.open_deadline,
                page.contact_email,
                page.contact_phone,
                page.confidence,
                page.extraction_method.to_db_string(),
                page.fetched_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_page(&self, url: &str) -> StorageResult<Option<Page>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM pages WHERE url = ?1", PAGE_COLUMNS))?;

        let raw = stmt.query_row(params![url], read_raw_page).optional()?;
        raw.map(RawPage::into_page).transpose()
    }

    fn count_pages(&self, institution: &str) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pages WHERE institution = ?1",
            params![institution],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn upsert_exclusion(&mut self, entry: &ExclusionEntry) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO exclusions (url, host, reason, confidence, excluded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(url) DO UPDATE SET \
             host = excluded.host, \
             reason = excluded.reason, \
             confidence = excluded.confidence, \
             excluded_at = excluded.excluded_at",
            params![
                entry.url,
                entry.host,
                entry.reason,
                entry.confidence,
                entry.excluded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_exclusion(&self, url: &str) -> StorageResult<Option<ExclusionEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, host, reason, confidence, excluded_at FROM exclusions WHERE url = ?1",
        )?;

        let raw = stmt.query_row(params![url], read_exclusion).optional()?;
        raw.map(|(mut entry, ts)| {
            entry.excluded_at = parse_timestamp(&ts)?;
            Ok(entry)
        })
        .transpose()
    }

    fn list_low_confidence_exclusions(
        &self,
        max_confidence: f64,
        host: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<ExclusionEntry>> {
        let (sql, params_vec): (String, Vec<Box<dyn rusqlite::ToSql>>) = match host {
            Some(host) => (
                "SELECT url, host, reason, confidence, excluded_at FROM exclusions \
                 WHERE confidence <= ?1 AND host = ?2 \
                 ORDER BY excluded_at ASC LIMIT ?3"
                    .to_string(),
                vec![
                    Box::new(max_confidence),
                    Box::new(host.to_string()),
                    Box::new(limit as i64),
                ],
            ),
            None => (
                "SELECT url, host, reason, confidence, excluded_at FROM exclusions \
                 WHERE confidence <= ?1 \
                 ORDER BY excluded_at ASC LIMIT ?2"
                    .to_string(),
                vec![Box::new(max_confidence), Box::new(limit as i64)],
            ),
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
            read_exclusion,
        )?;

        let mut entries = Vec::new();
        for row in rows {
            let (mut entry, ts) = row?;
            entry.excluded_at = parse_timestamp(&ts)?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn remove_exclusion(&mut self, url: &str) -> StorageResult<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM exclusions WHERE url = ?1", params![url])?;
        Ok(deleted > 0)
    }

    fn is_excluded(&self, url: &str) -> StorageResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM exclusions WHERE url = ?1",
            params![url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn insert_metric(&mut self, metric: &QualityMetric) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO quality_metrics (institution, page_type, extraction_method, accuracy, \
             confidence, extraction_pattern, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                metric.institution,
                metric.page_type.to_db_string(),
                metric.extraction_method.to_db_string(),
                metric.accuracy,
                metric.confidence.to_db_string(),
                metric.extraction_pattern,
                metric.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn recent_accuracies(
        &self,
        institution: &str,
        method: ExtractionStrategy,
        window: usize,
    ) -> StorageResult<Vec<f64>> {
        let mut stmt = self.conn.prepare(
            "SELECT accuracy FROM quality_metrics \
             WHERE institution = ?1 AND extraction_method = ?2 \
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![institution, method.to_db_string(), window as i64],
            |row| row.get(0),
        )?;
        rows.collect::<rusqlite::Result<Vec<f64>>>()
            .map_err(StorageError::from)
    }

    fn recent_accuracies_any_method(
        &self,
        institution: &str,
        window: usize,
    ) -> StorageResult<Vec<f64>> {
        let mut stmt = self.conn.prepare(
            "SELECT accuracy FROM quality_metrics \
             WHERE institution = ?1 \
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![institution, window as i64], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<f64>>>()
            .map_err(StorageError::from)
    }
}
