//! Form-based login
//!
//! Some institutions gate program detail pages behind a simple form login.
//! The flow is a single POST of credentials; the session is whatever cookies
//! the server sets in response.

use reqwest::Client;
use tracing::{debug, info};

use crate::config::LoginConfig;
use crate::{CrawlError, Result};

/// Performs a form login and harvests the resulting session cookies
///
/// Every `Set-Cookie` header on the response is reduced to its `name=value`
/// pair and joined into a single `Cookie` header value, ready to attach to
/// subsequent requests.
///
/// # Arguments
///
/// * `client` - HTTP client to use (shared with page fetches)
/// * `institution_id` - Institution the login belongs to, for errors and logs
/// * `login` - Login endpoint and credentials
///
/// # Returns
///
/// * `Ok(String)` - Cookie header value for authenticated requests
/// * `Err(CrawlError::Login)` - The POST failed, was rejected, or set no cookies
pub async fn form_login(
    client: &Client,
    institution_id: &str,
    login: &LoginConfig,
) -> Result<String> {
    debug!(institution = institution_id, url = %login.url, "logging in");

    let form = [
        (login.email_field.as_str(), login.email.as_str()),
        (login.password_field.as_str(), login.password.as_str()),
    ];

    let response = client
        .post(&login.url)
        .form(&form)
        .send()
        .await
        .map_err(|e| CrawlError::Login {
            institution: institution_id.to_string(),
            message: format!("login request failed: {}", e),
        })?;

    let status = response.status();
    if !status.is_success() && !status.is_redirection() {
        return Err(CrawlError::Login {
            institution: institution_id.to_string(),
            message: format!("login rejected with status {}", status),
        });
    }

    let cookies: Vec<String> = response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .map(|pair| pair.trim().to_string())
        .filter(|pair| !pair.is_empty())
        .collect();

    if cookies.is_empty() {
        return Err(CrawlError::Login {
            institution: institution_id.to_string(),
            message: "login succeeded but set no session cookie".to_string(),
        });
    }

    info!(
        institution = institution_id,
        cookies = cookies.len(),
        "login established session"
    );
    Ok(cookies.join("; "))
}
