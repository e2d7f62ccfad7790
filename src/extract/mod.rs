//! Structured extraction from fetched pages
//!
//! The [`Extractor`] trait is the seam for extraction backends; the shipped
//! [`PatternExtractor`] works from regexes and keyword tables alone.
//! [`classify`] turns an extraction into either a program [`Page`] or an
//! [`ExclusionEntry`], depending on the configured confidence threshold.
//!
//! [`Page`]: crate::storage::Page
//! [`ExclusionEntry`]: crate::storage::ExclusionEntry

mod pattern;
mod types;

pub use pattern::PatternExtractor;
pub use types::{
    classify, Classification, ExtractedFields, Extraction, Extractor,
    NO_SIGNAL_EXCLUSION_CONFIDENCE, UNPARSEABLE_EXCLUSION_CONFIDENCE,
};
