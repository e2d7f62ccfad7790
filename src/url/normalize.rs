use crate::UrlError;
use url::Url;

/// Tracking query parameters removed during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
];

/// Normalizes a URL so that membership tests in the discovery state are stable
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or non-HTTP(S)
/// 2. Lowercase the host and strip a `www.` prefix
/// 3. Remove trailing slash (except for the root path)
/// 4. Remove the fragment
/// 5. Remove tracking query parameters; drop the query if it becomes empty
///
/// # Arguments
///
/// * `url_str` - The URL string to normalize
///
/// # Returns
///
/// * `Ok(Url)` - Normalized URL
/// * `Err(UrlError)` - Failed to parse or normalize the URL
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url.host_str().ok_or(UrlError::MissingHost)?;
    let mut normalized_host = host.to_lowercase();
    if let Some(stripped) = normalized_host.strip_prefix("www.") {
        normalized_host = stripped.to_string();
    }
    url.set_host(Some(&normalized_host))
        .map_err(|e| UrlError::Parse(e.to_string()))?;

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            let query = kept
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query));
        }
    }

    Ok(url)
}

/// Resolves an href found on `base` into an absolute normalized URL
///
/// Returns None for fragments, javascript links, email-protection stubs, and
/// anything that fails to parse. Link discovery should never fail a page over
/// one bad href.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    if href.contains("email-protection") || href.contains("cdn-cgi") {
        return None;
    }

    let absolute = base.join(href).ok()?;
    normalize_url(absolute.as_str()).ok()
}

/// Extracts the normalized host of a URL (lowercase, `www.` stripped)
pub fn host_of(url: &Url) -> Option<String> {
    url.host_str()
        .map(|h| h.to_lowercase().trim_start_matches("www.").to_string())
}

/// Returns true when both URLs point at the same host
pub fn same_host(a: &Url, b: &Url) -> bool {
    match (host_of(a), host_of(b)) {
        (Some(ha), Some(hb)) => ha == hb,
        _ => false,
    }
}
