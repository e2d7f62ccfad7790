//! Configuration loading and validation
//!
//! Institutions and crawler behavior are configured in a single TOML file.
//! A SHA-256 hash of the file is logged per run so state can be correlated
//! with the configuration that produced it.

mod parser;
mod types;
mod validation;

pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use types::{Config, CrawlerConfig, InstitutionConfig, LoginConfig};
pub use validation::validate;

/// Construction helpers shared by unit and integration tests.
#[doc(hidden)]
pub mod test_support {
    use super::{Config, CrawlerConfig, InstitutionConfig};

    pub fn test_crawler_config() -> CrawlerConfig {
        CrawlerConfig {
            state_dir: "./state".to_string(),
            database_path: "./fundcrawl.db".to_string(),
            max_concurrent_fetches: 4,
            fetch_timeout_secs: 5,
            confidence_threshold: 0.35,
            freshness_window_days: 7,
            section_max_age_days: 90,
            cycle_deadline_secs: 60,
            session_ttl_minutes: 30,
            recheck_confidence_ceiling: 0.6,
            user_agent: "fundcrawl-test/0.0".to_string(),
        }
    }

    pub fn test_institution(id: &str, base_url: &str) -> InstitutionConfig {
        InstitutionConfig {
            id: id.to_string(),
            name: id.to_uppercase(),
            base_urls: vec![base_url.to_string()],
            max_depth: 2,
            max_pages_per_cycle: 20,
            requires_session: false,
            login: None,
            keywords: vec![],
        }
    }

    pub fn test_config(institutions: Vec<InstitutionConfig>) -> Config {
        Config {
            crawler: test_crawler_config(),
            institutions,
        }
    }
}
