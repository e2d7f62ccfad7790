//! HTTP fetcher
//!
//! Handles all page requests: client construction, session cookie injection,
//! retry with exponential backoff for transient failures, and error
//! classification into retry / defer / exclude decisions.

use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::config::CrawlerConfig;

/// Attempts per URL before the fetch is deferred to the next cycle
pub const MAX_FETCH_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between attempts
const BACKOFF_BASE_MS: u64 = 500;

/// Result of a fetch operation, after retries
#[derive(Debug)]
pub enum FetchResult {
    /// Successfully fetched the page
    Success {
        /// Final URL after redirects
        final_url: String,
        /// HTTP status code
        status_code: u16,
        /// Page body
        body: String,
    },

    /// The server rejected our session (401/403)
    Unauthorized { status_code: u16 },

    /// The page is confirmed gone (404/410); safe to exclude permanently
    Gone { status_code: u16 },

    /// Non-retryable client error other than auth/gone
    ClientError { status_code: u16 },

    /// Transient failures exhausted all attempts; retry next cycle
    TransientExhausted { error: String },
}

/// Builds the shared HTTP client
///
/// # Arguments
///
/// * `config` - Crawler configuration (user agent, timeout)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.fetch_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a URL, retrying transient failures with exponential backoff
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | HTTP 2xx/3xx | Success |
/// | HTTP 401/403 | Immediate → Unauthorized (session handling upstream) |
/// | HTTP 404/410 | Immediate → Gone |
/// | Other 4xx | Immediate → ClientError |
/// | HTTP 429/5xx | Retry up to 3 times, backoff 500ms/1s/2s |
/// | Timeout/connect | Retry up to 3 times, same backoff |
///
/// # Arguments
///
/// * `client` - The shared HTTP client
/// * `url` - URL to fetch
/// * `cookie` - Session cookie header to attach, if any
/// * `no_cache` - Send cache-bypass headers (used by the exclusion rechecker)
pub async fn fetch_with_retry(
    client: &Client,
    url: &Url,
    cookie: Option<&str>,
    no_cache: bool,
) -> FetchResult {
    let mut last_error = String::new();

    for attempt in 1..=MAX_FETCH_ATTEMPTS {
        if attempt > 1 {
            let delay = BACKOFF_BASE_MS * 2u64.pow(attempt - 2);
            debug!(url = %url, attempt, delay_ms = delay, "retrying fetch");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut request = client.get(url.clone());
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        if no_cache {
            request = request
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::PRAGMA, "no-cache");
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                // Timeouts and connection failures are transient
                last_error = e.to_string();
                continue;
            }
        };

        let status = response.status();
        match classify_status(status) {
            StatusClass::Ok => {
                let final_url = response.url().to_string();
                return match response.text().await {
                    Ok(body) => FetchResult::Success {
                        final_url,
                        status_code: status.as_u16(),
                        body,
                    },
                    Err(e) => {
                        last_error = format!("failed to read body: {e}");
                        continue;
                    }
                };
            }
            StatusClass::Unauthorized => {
                return FetchResult::Unauthorized {
                    status_code: status.as_u16(),
                }
            }
            StatusClass::Gone => {
                return FetchResult::Gone {
                    status_code: status.as_u16(),
                }
            }
            StatusClass::ClientError => {
                return FetchResult::ClientError {
                    status_code: status.as_u16(),
                }
            }
            StatusClass::Transient => {
                last_error = format!("HTTP {}", status.as_u16());
                continue;
            }
        }
    }

    warn!(url = %url, error = %last_error, "fetch attempts exhausted");
    FetchResult::TransientExhausted { error: last_error }
}

enum StatusClass {
    Ok,
    Unauthorized,
    Gone,
    ClientError,
    Transient,
}

fn classify_status(status: StatusCode) -> StatusClass {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StatusClass::Unauthorized,
        StatusCode::NOT_FOUND | StatusCode::GONE => StatusClass::Gone,
        StatusCode::TOO_MANY_REQUESTS => StatusClass::Transient,
        s if s.is_server_error() => StatusClass::Transient,
        s if s.is_client_error() => StatusClass::ClientError,
        _ => StatusClass::Ok,
    }
}
