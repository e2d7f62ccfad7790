//! URL handling for fundcrawl
//!
//! Normalization keeps frontier membership tests stable; the filter
//! heuristics keep obvious non-program links out of the frontier.

mod filter;
mod normalize;

pub use filter::{
    has_exclusion_keyword, has_program_keyword, is_download, is_query_listing, is_queueable,
};
pub use normalize::{host_of, normalize_url, resolve_link, same_host};
