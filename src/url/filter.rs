//! URL heuristics for frontier filtering
//!
//! These keyword tables decide which discovered links are worth queueing at
//! all. They are deliberately coarse: the extraction confidence threshold and
//! the exclusion rechecker correct the mistakes they make.

use url::Url;

/// URL keywords that mark a page as likely funding-program content
const PROGRAM_KEYWORDS: &[&str] = &[
    "foerderung",
    "förderung",
    "funding",
    "grant",
    "program",
    "programme",
    "finanzierung",
    "kredit",
    "darlehen",
    "subvention",
    "beihilfe",
    "innovation",
    "forschung",
    "research",
    "startup",
    "investment",
    "call",
    "ausschreibung",
];

/// URL keywords that mark a page as definitely not program content
const EXCLUSION_KEYWORDS: &[&str] = &[
    // Jobs / careers
    "karriere",
    "career",
    "jobs",
    "stellenangebot",
    // Legal / meta
    "impressum",
    "imprint",
    "datenschutz",
    "privacy",
    "data-protection",
    "newsletter",
    "sitemap",
    "barrierefreiheit",
    "accessibility",
    // News / events
    "presse",
    "press",
    "news",
    "event",
    "veranstaltung",
    // Info pages
    "kontakt",
    "contact",
    "about",
    "ueber-uns",
    "faq",
    "hilfe",
    "help",
    // Auth
    "login",
    "register",
    "signup",
    // Out-of-domain funding
    "wohnbau",
    "wohnbeihilfe",
    "immobilie",
    "landwirtschaft",
    "forstwirtschaft",
    "privatkunden",
];

/// Returns true if the URL points at a binary download rather than a page
pub fn is_download(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    path.ends_with(".pdf")
        || path.ends_with(".doc")
        || path.ends_with(".docx")
        || path.ends_with(".xls")
        || path.ends_with(".xlsx")
        || path.ends_with(".ppt")
        || path.ends_with(".pptx")
        || path.ends_with(".zip")
        || path.contains("/download")
}

/// Returns true if the URL is a filtered/paginated listing query
///
/// Listing queries (`?filter=`, `?page=`, facet parameters) enumerate the
/// same content under many URLs; queueing them explodes the frontier.
pub fn is_query_listing(url: &Url) -> bool {
    let query = match url.query() {
        Some(q) => q.to_lowercase(),
        None => return false,
    };
    ["filter", "field_", "search", "suche", "sort=", "page=", "offset=", "year=", "type=", "category=", "combine"]
        .iter()
        .any(|marker| query.contains(marker))
}

/// Returns true if the URL matches an exclusion keyword
pub fn has_exclusion_keyword(url: &Url) -> bool {
    let haystack = url.as_str().to_lowercase();
    EXCLUSION_KEYWORDS.iter().any(|k| haystack.contains(k))
}

/// Returns true if the URL matches a program keyword, either from the global
/// table or the institution-specific keyword list
pub fn has_program_keyword(url: &Url, institution_keywords: &[String]) -> bool {
    let haystack = url.as_str().to_lowercase();
    institution_keywords
        .iter()
        .any(|k| haystack.contains(&k.to_lowercase()))
        || PROGRAM_KEYWORDS.iter().any(|k| haystack.contains(k))
}

/// Decides whether a discovered link should enter the frontier
///
/// A link is queueable when it is not a download, not a listing query, not
/// excluded by keyword, and carries at least one program signal. Seeds bypass
/// this check; it applies only to links found during exploration.
pub fn is_queueable(url: &Url, institution_keywords: &[String]) -> bool {
    !is_download(url)
        && !is_query_listing(url)
        && !has_exclusion_keyword(url)
        && has_program_keyword(url, institution_keywords)
}
