//! Page fetch and extract workers
//!
//! The fetcher handles HTTP mechanics (retries, backoff, status
//! classification), link discovery filters what a page contributes to the
//! frontier, and [`PageWorker`] ties both to extraction and classification.

mod fetcher;
mod links;
mod page_worker;

pub use fetcher::{build_http_client, fetch_with_retry, FetchResult, MAX_FETCH_ATTEMPTS};
pub use links::discover_links;
pub use page_worker::{PageTask, PageWorker, WorkerOutcome, HTTP_CONFIRMED_EXCLUSION_CONFIDENCE};
