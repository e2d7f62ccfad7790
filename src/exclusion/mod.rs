//! Exclusion management and false-positive rechecking
//!
//! Exclusions keep known non-program URLs out of the frontier, but the
//! keyword heuristics that produce them make mistakes. The [`Rechecker`]
//! periodically re-fetches low-confidence exclusions with cache-bypass
//! headers and runs the exact same classification the worker uses. A page
//! that now classifies as program content is a confirmed false positive: the
//! exclusion is removed and the URL goes back into the owning institution's
//! queue, exactly once.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery::DiscoveryStateStore;
use crate::extract::{classify, Classification, Extractor};
use crate::storage::{ExclusionEntry, Storage};
use crate::strategy::ExtractionStrategy;
use crate::url::normalize_url;
use crate::worker::{fetch_with_retry, FetchResult, HTTP_CONFIRMED_EXCLUSION_CONFIDENCE};
use crate::Result;

/// Confidence added to an exclusion each time a recheck confirms it, so
/// repeatedly confirmed entries age out of the recheck pool
const CONFIRMATION_CONFIDENCE_STEP: f64 = 0.15;

/// What a recheck pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecheckReport {
    /// Entries fetched and reclassified
    pub rechecked: usize,
    /// False positives reversed (removed + requeued)
    pub reversed: usize,
    /// Exclusions confirmed and kept
    pub confirmed: usize,
    /// Entries skipped over transient fetch trouble
    pub skipped: usize,
}

/// What a single recheck concluded
#[derive(Debug)]
enum RecheckVerdict {
    /// The page now classifies as program content
    FalsePositive,
    /// Still not program content
    Confirmed,
    /// Could not be fetched right now; leave the entry untouched
    Undecided,
}

/// Re-evaluates low-confidence exclusions
pub struct Rechecker {
    client: Client,
    extractor: Arc<dyn Extractor>,
    confidence_threshold: f64,
    recheck_ceiling: f64,
}

impl Rechecker {
    pub fn new(client: Client, extractor: Arc<dyn Extractor>, config: &Config) -> Self {
        Self {
            client,
            extractor,
            confidence_threshold: config.crawler.confidence_threshold,
            recheck_ceiling: config.crawler.recheck_confidence_ceiling,
        }
    }

    /// Rechecks up to `max_rechecks` low-confidence exclusions
    ///
    /// Without `auto_remove` this is a dry run: entries are fetched and
    /// reclassified, the report says what would be reversed, and nothing is
    /// mutated. With `auto_remove`, a false positive is removed from the
    /// exclusion table and reinstated into the owning institution's discovery
    /// queue. Both steps are idempotent, so an interrupted pass can simply be
    /// re-run.
    ///
    /// # Arguments
    ///
    /// * `storage` - Exclusion and page storage; locked only around storage
    ///   calls, never across a fetch
    /// * `state_store` - Per-institution discovery state files
    /// * `config` - Used to map an exclusion's host back to its institution
    /// * `host` - When set, restrict the pass to one host
    /// * `max_rechecks` - Upper bound on fetches this pass
    /// * `auto_remove` - Actually reverse false positives
    pub async fn run_recheck_cycle<S: Storage>(
        &self,
        storage: &Mutex<S>,
        state_store: &DiscoveryStateStore,
        config: &Config,
        host: Option<&str>,
        max_rechecks: usize,
        auto_remove: bool,
    ) -> Result<RecheckReport> {
        let candidates = lock(storage).list_low_confidence_exclusions(
            self.recheck_ceiling,
            host,
            max_rechecks,
        )?;
        info!(
            candidates = candidates.len(),
            ceiling = self.recheck_ceiling,
            auto_remove,
            "starting exclusion recheck"
        );

        let mut report = RecheckReport::default();
        for entry in candidates {
            report.rechecked += 1;
            match self.recheck(&entry).await {
                RecheckVerdict::FalsePositive => {
                    report.reversed += 1;
                    if auto_remove {
                        self.reverse(storage, state_store, config, &entry)?;
                    } else {
                        info!(url = %entry.url, "false positive (dry run, not removed)");
                    }
                }
                RecheckVerdict::Confirmed => {
                    report.confirmed += 1;
                    if auto_remove {
                        let mut confirmed = entry.clone();
                        confirmed.confidence = (confirmed.confidence
                            + CONFIRMATION_CONFIDENCE_STEP)
                            .min(HTTP_CONFIRMED_EXCLUSION_CONFIDENCE);
                        confirmed.excluded_at = Utc::now();
                        lock(storage).upsert_exclusion(&confirmed)?;
                    }
                }
                RecheckVerdict::Undecided => {
                    report.skipped += 1;
                }
            }
        }

        info!(
            rechecked = report.rechecked,
            reversed = report.reversed,
            confirmed = report.confirmed,
            skipped = report.skipped,
            "exclusion recheck finished"
        );
        Ok(report)
    }

    /// Fetches one excluded URL fresh and reclassifies it
    async fn recheck(&self, entry: &ExclusionEntry) -> RecheckVerdict {
        let url = match normalize_url(&entry.url) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %entry.url, error = %e, "excluded URL no longer parses");
                return RecheckVerdict::Confirmed;
            }
        };

        match fetch_with_retry(&self.client, &url, None, true).await {
            FetchResult::Success { body, .. } => {
                // Same classification path the worker takes
                let extraction = self.extractor.extract(&url, &body, ExtractionStrategy::Regex);
                let classification = classify(
                    &url,
                    "",
                    extraction,
                    ExtractionStrategy::Regex,
                    self.confidence_threshold,
                    Utc::now(),
                );
                match classification {
                    Classification::Program(_) => RecheckVerdict::FalsePositive,
                    Classification::Excluded(_) => RecheckVerdict::Confirmed,
                }
            }
            FetchResult::Gone { .. }
            | FetchResult::Unauthorized { .. }
            | FetchResult::ClientError { .. } => RecheckVerdict::Confirmed,
            FetchResult::TransientExhausted { error } => {
                debug!(url = %entry.url, error = %error, "recheck fetch failed, keeping entry");
                RecheckVerdict::Undecided
            }
        }
    }

    /// Reverses a confirmed false positive
    fn reverse<S: Storage>(
        &self,
        storage: &Mutex<S>,
        state_store: &DiscoveryStateStore,
        config: &Config,
        entry: &ExclusionEntry,
    ) -> Result<()> {
        let removed = lock(storage).remove_exclusion(&entry.url)?;

        match config.institution_for_host(&entry.host) {
            Some(institution) => {
                let mut state = state_store.load(&institution.id);
                state.reinstate(&entry.url);
                state_store.save(&institution.id, &state)?;
                info!(
                    url = %entry.url,
                    institution = %institution.id,
                    removed,
                    "reversed false-positive exclusion"
                );
            }
            None => {
                warn!(
                    url = %entry.url,
                    host = %entry.host,
                    "reversed exclusion but no institution owns its host"
                );
            }
        }
        Ok(())
    }
}

fn lock<S>(storage: &Mutex<S>) -> std::sync::MutexGuard<'_, S> {
    storage.lock().unwrap_or_else(|p| p.into_inner())
}
