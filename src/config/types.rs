use serde::Deserialize;

/// Main configuration structure for fundcrawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(rename = "institution", default)]
    pub institutions: Vec<InstitutionConfig>,
}

/// Crawler behavior configuration shared by all institutions
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Directory holding per-institution discovery state files
    #[serde(rename = "state-dir")]
    pub state_dir: String,

    /// Path to the SQLite database file (pages, exclusions, metrics)
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Maximum number of concurrent fetches against one institution's host
    #[serde(rename = "max-concurrent-fetches", default = "default_concurrency")]
    pub max_concurrent_fetches: u32,

    /// Per-request timeout in seconds
    #[serde(rename = "fetch-timeout-secs", default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Extraction confidence below which a page becomes an exclusion
    #[serde(rename = "confidence-threshold", default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Sections explored within this many days are skipped in incremental mode
    #[serde(rename = "freshness-window-days", default = "default_freshness_window")]
    pub freshness_window_days: i64,

    /// Explored-section records older than this many days are pruned on save
    #[serde(rename = "section-max-age-days", default = "default_section_max_age")]
    pub section_max_age_days: i64,

    /// Wall-clock budget for one institution's cycle, in seconds
    #[serde(rename = "cycle-deadline-secs", default = "default_cycle_deadline")]
    pub cycle_deadline_secs: u64,

    /// Session cache TTL in minutes (one crawl cycle by default)
    #[serde(rename = "session-ttl-minutes", default = "default_session_ttl")]
    pub session_ttl_minutes: i64,

    /// Exclusions at or below this confidence are eligible for recheck
    #[serde(rename = "recheck-confidence-ceiling", default = "default_recheck_ceiling")]
    pub recheck_confidence_ceiling: f64,

    /// User agent string sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

fn default_concurrency() -> u32 {
    4
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_confidence_threshold() -> f64 {
    0.35
}

fn default_freshness_window() -> i64 {
    7
}

fn default_section_max_age() -> i64 {
    90
}

fn default_cycle_deadline() -> u64 {
    300
}

fn default_session_ttl() -> i64 {
    30
}

fn default_recheck_ceiling() -> f64 {
    0.6
}

fn default_user_agent() -> String {
    format!("fundcrawl/{}", env!("CARGO_PKG_VERSION"))
}

/// One funding-program-publishing institution
///
/// Immutable configuration, loaded once per run.
#[derive(Debug, Clone, Deserialize)]
pub struct InstitutionConfig {
    /// Stable identifier, used as the discovery-state key
    pub id: String,

    /// Display name
    pub name: String,

    /// Seed URLs where program discovery starts
    #[serde(rename = "base-urls")]
    pub base_urls: Vec<String>,

    /// Maximum link-following depth from a seed
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum number of pages fetched per crawl cycle
    #[serde(rename = "max-pages-per-cycle", default = "default_page_budget")]
    pub max_pages_per_cycle: u32,

    /// Whether fetches against this institution need an authenticated session
    #[serde(rename = "requires-session", default)]
    pub requires_session: bool,

    /// Login configuration for gated institutions
    #[serde(default)]
    pub login: Option<LoginConfig>,

    /// Institution-specific URL keywords that mark likely program pages
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_max_depth() -> u32 {
    2
}

fn default_page_budget() -> u32 {
    20
}

/// Login form configuration for a gated institution
#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    /// Login form URL
    pub url: String,

    /// Account email/username
    pub email: String,

    /// Account password
    pub password: String,

    /// Form field name for the email, when the site uses a non-standard name
    #[serde(rename = "email-field", default = "default_email_field")]
    pub email_field: String,

    /// Form field name for the password
    #[serde(rename = "password-field", default = "default_password_field")]
    pub password_field: String,
}

fn default_email_field() -> String {
    "email".to_string()
}

fn default_password_field() -> String {
    "password".to_string()
}

impl Config {
    /// Looks up an institution by id
    pub fn institution(&self, id: &str) -> Option<&InstitutionConfig> {
        self.institutions.iter().find(|i| i.id == id)
    }

    /// Finds the institution owning a host, by matching against base URLs
    pub fn institution_for_host(&self, host: &str) -> Option<&InstitutionConfig> {
        self.institutions.iter().find(|inst| {
            inst.base_urls.iter().any(|base| {
                ::url::Url::parse(base)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.") == host))
                    .unwrap_or(false)
            })
        })
    }
}
