//! Link discovery from fetched pages

use scraper::{Html, Selector};
use url::Url;

use crate::config::InstitutionConfig;
use crate::url::{is_queueable, normalize_url, resolve_link, same_host};

/// Extracts queueable program links from a page
///
/// Hrefs are resolved against `base`, normalized, and kept only when they
/// stay on one of the institution's hosts and pass the program/exclusion
/// keyword filters. Order of first appearance is preserved; duplicates are
/// dropped.
///
/// # Arguments
///
/// * `html` - The page body
/// * `base` - URL the page was fetched from
/// * `institution` - Institution whose hosts and keywords bound the crawl
pub fn discover_links(html: &str, base: &Url, institution: &InstitutionConfig) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    let allowed_bases: Vec<Url> = institution
        .base_urls
        .iter()
        .filter_map(|u| normalize_url(u).ok())
        .collect();

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let href = match element.value().attr("href") {
            Some(href) => href,
            None => continue,
        };
        let url = match resolve_link(base, href) {
            Some(url) => url,
            None => continue,
        };

        if !allowed_bases.iter().any(|base| same_host(base, &url)) {
            continue;
        }
        if !is_queueable(&url, &institution.keywords) {
            continue;
        }

        let url = url.to_string();
        if seen.insert(url.clone()) {
            links.push(url);
        }
    }

    links
}
