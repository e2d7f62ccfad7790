//! Extraction types and page classification

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use url::Url;

use crate::storage::{ExclusionEntry, Page};
use crate::strategy::ExtractionStrategy;
use crate::url::host_of;

/// Structured fields pulled out of a page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Requirement sentences grouped by category (eligibility, documents, ...)
    pub categorized_requirements: BTreeMap<String, Vec<String>>,
    pub funding_amount_min: Option<f64>,
    pub funding_amount_max: Option<f64>,
    pub currency: Option<String>,
    /// Submission deadline as `dd.mm.yyyy`, when one was found
    pub deadline: Option<String>,
    /// True when the page advertises a rolling/open deadline
    pub open_deadline: bool,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
}

/// Result of running an extractor over a page
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub fields: ExtractedFields,
    /// How much program signal the page carried, in `[0, 1]`
    pub confidence: f64,
    /// True when the document yielded no usable text at all
    pub unparseable: bool,
}

/// Pluggable extraction capability
///
/// The crate ships [`PatternExtractor`](crate::extract::PatternExtractor);
/// model-backed implementations plug in behind the same trait. Extraction is
/// synchronous and CPU-bound; workers call it between awaits.
pub trait Extractor: Send + Sync {
    /// Extracts structured fields from a fetched page
    ///
    /// # Arguments
    ///
    /// * `url` - The page URL, available for URL-derived hints
    /// * `html` - Raw response body
    /// * `strategy` - The selected extraction strategy
    fn extract(&self, url: &Url, html: &str, strategy: ExtractionStrategy) -> Extraction;
}

/// What a fetched page turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// A funding-program page worth persisting
    Program(Box<Page>),
    /// Not program content; recorded so the URL is not fetched again
    Excluded(ExclusionEntry),
}

/// Exclusion confidence for pages that parsed but carried no program signal.
/// Below the default recheck ceiling, so these stay recheck-eligible.
pub const NO_SIGNAL_EXCLUSION_CONFIDENCE: f64 = 0.5;

/// Exclusion confidence for documents that yielded no usable text
pub const UNPARSEABLE_EXCLUSION_CONFIDENCE: f64 = 0.4;

/// Classifies an extraction as a program page or an exclusion
///
/// A page whose extraction confidence reaches `threshold` becomes a
/// [`Page`]; anything below it becomes an [`ExclusionEntry`] with reason
/// `"no program signals"`, or `"unparseable"` when the document produced no
/// text at all. Exclusions from classification carry low confidence so the
/// rechecker revisits them.
pub fn classify(
    url: &Url,
    institution_id: &str,
    extraction: Extraction,
    strategy: ExtractionStrategy,
    threshold: f64,
    now: DateTime<Utc>,
) -> Classification {
    let host = host_of(url).unwrap_or_default();

    if extraction.unparseable {
        return Classification::Excluded(ExclusionEntry {
            url: url.to_string(),
            host,
            reason: "unparseable".to_string(),
            confidence: UNPARSEABLE_EXCLUSION_CONFIDENCE,
            excluded_at: now,
        });
    }

    if extraction.confidence < threshold {
        return Classification::Excluded(ExclusionEntry {
            url: url.to_string(),
            host,
            reason: "no program signals".to_string(),
            confidence: NO_SIGNAL_EXCLUSION_CONFIDENCE,
            excluded_at: now,
        });
    }

    let fields = extraction.fields;
    Classification::Program(Box::new(Page {
        url: url.to_string(),
        institution: institution_id.to_string(),
        title: fields.title,
        description: fields.description,
        categorized_requirements: fields.categorized_requirements,
        funding_amount_min: fields.funding_amount_min,
        funding_amount_max: fields.funding_amount_max,
        currency: fields.currency,
        deadline: fields.deadline,
        open_deadline: fields.open_deadline,
        contact_email: fields.contact_email,
        contact_phone: fields.contact_phone,
        confidence: extraction.confidence,
        extraction_method: strategy,
        fetched_at: now,
    }))
}
