//! Database schema definitions
//!
//! All SQL schema for the fundcrawl database. Statements are idempotent so
//! opening an existing database is safe.

use rusqlite::Connection;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Extracted funding-program pages, one row per URL
CREATE TABLE IF NOT EXISTS pages (
    url TEXT PRIMARY KEY,
    institution TEXT NOT NULL,
    title TEXT,
    description TEXT,
    categorized_requirements TEXT NOT NULL DEFAULT '{}',
    funding_amount_min REAL,
    funding_amount_max REAL,
    currency TEXT,
    deadline TEXT,
    open_deadline INTEGER NOT NULL DEFAULT 0,
    contact_email TEXT,
    contact_phone TEXT,
    confidence REAL NOT NULL,
    extraction_method TEXT NOT NULL,
    fetched_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pages_institution ON pages(institution);

-- URLs excluded from future crawling
CREATE TABLE IF NOT EXISTS exclusions (
    url TEXT PRIMARY KEY,
    host TEXT NOT NULL,
    reason TEXT NOT NULL,
    confidence REAL NOT NULL,
    excluded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_exclusions_host ON exclusions(host);
CREATE INDEX IF NOT EXISTS idx_exclusions_confidence ON exclusions(confidence);

-- Append-only extraction quality observations
CREATE TABLE IF NOT EXISTS quality_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    institution TEXT NOT NULL,
    page_type TEXT NOT NULL,
    extraction_method TEXT NOT NULL,
    accuracy REAL NOT NULL,
    confidence TEXT NOT NULL,
    extraction_pattern TEXT,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metrics_institution_method
    ON quality_metrics(institution, extraction_method, id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
