use crate::config::types::{Config, CrawlerConfig, InstitutionConfig};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;

    if config.institutions.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[institution]] must be configured".to_string(),
        ));
    }

    let mut ids = HashSet::new();
    for institution in &config.institutions {
        if !ids.insert(institution.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate institution id '{}'",
                institution.id
            )));
        }
        validate_institution(institution)?;
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.state_dir.is_empty() {
        return Err(ConfigError::Validation(
            "state_dir cannot be empty".to_string(),
        ));
    }

    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.max_concurrent_fetches < 1 || config.max_concurrent_fetches > 32 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_fetches must be between 1 and 32, got {}",
            config.max_concurrent_fetches
        )));
    }

    if !(0.0..=1.0).contains(&config.confidence_threshold) {
        return Err(ConfigError::Validation(format!(
            "confidence_threshold must be within [0, 1], got {}",
            config.confidence_threshold
        )));
    }

    if !(0.0..=1.0).contains(&config.recheck_confidence_ceiling) {
        return Err(ConfigError::Validation(format!(
            "recheck_confidence_ceiling must be within [0, 1], got {}",
            config.recheck_confidence_ceiling
        )));
    }

    if config.freshness_window_days < 1 {
        return Err(ConfigError::Validation(format!(
            "freshness_window_days must be >= 1, got {}",
            config.freshness_window_days
        )));
    }

    Ok(())
}

/// Validates a single institution entry
fn validate_institution(institution: &InstitutionConfig) -> Result<(), ConfigError> {
    if institution.id.is_empty() {
        return Err(ConfigError::Validation(
            "institution id cannot be empty".to_string(),
        ));
    }

    if !institution
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "institution id '{}' must contain only alphanumerics, hyphens, and underscores",
            institution.id
        )));
    }

    if institution.base_urls.is_empty() {
        return Err(ConfigError::Validation(format!(
            "institution '{}' must have at least one base URL",
            institution.id
        )));
    }

    for base in &institution.base_urls {
        let url = Url::parse(base)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", base, e)))?;
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(format!(
                "base URL '{}' has no host",
                base
            )));
        }
    }

    if institution.max_pages_per_cycle < 1 {
        return Err(ConfigError::Validation(format!(
            "institution '{}': max_pages_per_cycle must be >= 1",
            institution.id
        )));
    }

    if institution.requires_session && institution.login.is_none() {
        return Err(ConfigError::Validation(format!(
            "institution '{}' requires a session but has no [institution.login] block",
            institution.id
        )));
    }

    if let Some(login) = &institution.login {
        Url::parse(&login.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("login url for '{}': {}", institution.id, e)))?;
        if login.email.is_empty() || login.password.is_empty() {
            return Err(ConfigError::Validation(format!(
                "institution '{}': login email and password cannot be empty",
                institution.id
            )));
        }
    }

    Ok(())
}
