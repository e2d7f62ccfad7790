//! Cycle runner
//!
//! Drives one crawl cycle: pick institutions, refresh their frontiers via
//! link discovery, fan queued URLs out to workers under a concurrency bound,
//! collect every outcome, then persist state and results in one pass at the
//! end. Outcomes are applied to an in-memory copy of the discovery state and
//! saved once per institution, so a crash mid-cycle leaves the previous
//! snapshot intact and the cycle simply reruns.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Client;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use url::Url;

use crate::config::{Config, InstitutionConfig};
use crate::discovery::{DiscoveryState, DiscoveryStateStore};
use crate::exclusion::Rechecker;
use crate::extract::{Extractor, PatternExtractor};
use crate::metrics::{self, MetricsRecorder, DEFAULT_ACCURACY_WINDOW};
use crate::session::SessionCache;
use crate::storage::Storage;
use crate::url::normalize_url;
use crate::worker::{
    build_http_client, discover_links, fetch_with_retry, FetchResult, PageTask, PageWorker,
    WorkerOutcome,
};
use crate::{CrawlError, Result};

/// How thoroughly link discovery revisits known sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryMode {
    /// Skip sections explored within the freshness window
    #[default]
    Incremental,
    /// Re-explore every section regardless of freshness
    Deep,
}

/// How many institutions one run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleScope {
    /// One institution: the requested one, or the least recently crawled
    #[default]
    Cycle,
    /// Every configured institution
    Full,
}

/// Options for one cycle run
#[derive(Debug, Clone, Default)]
pub struct CycleOptions {
    pub mode: DiscoveryMode,
    pub scope: CycleScope,
    /// Pin the cycle to this institution id
    pub institution: Option<String>,
    /// Run the exclusion recheck phase with this fetch budget
    pub max_rechecks: Option<usize>,
    /// Let the recheck phase actually reverse false positives
    pub auto_remove: bool,
}

/// Outcome counts for one institution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstitutionSummary {
    pub pages_fetched: usize,
    pub pages_excluded: usize,
    pub pages_failed: usize,
    pub pages_deferred: usize,
}

/// What one cycle accomplished
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub pages_fetched: usize,
    pub pages_excluded: usize,
    pub pages_failed: usize,
    pub pages_deferred: usize,
    pub exclusions_reversed: usize,
    pub per_institution: BTreeMap<String, InstitutionSummary>,
}

impl CycleSummary {
    fn absorb(&mut self, institution: &str, summary: InstitutionSummary) {
        self.pages_fetched += summary.pages_fetched;
        self.pages_excluded += summary.pages_excluded;
        self.pages_failed += summary.pages_failed;
        self.pages_deferred += summary.pages_deferred;
        self.per_institution.insert(institution.to_string(), summary);
    }
}

/// Runs crawl cycles against a storage backend
pub struct CycleRunner<S: Storage + 'static> {
    config: Config,
    storage: Arc<StdMutex<S>>,
    state_store: DiscoveryStateStore,
    client: Client,
    extractor: Arc<dyn Extractor>,
    sessions: Arc<Mutex<SessionCache>>,
}

impl<S: Storage + 'static> CycleRunner<S> {
    /// Creates a runner with the default pattern extractor
    pub fn new(config: Config, storage: S) -> Result<Self> {
        Self::with_extractor(config, storage, Arc::new(PatternExtractor::new()))
    }

    /// Creates a runner with a custom extraction backend
    pub fn with_extractor(
        config: Config,
        storage: S,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self> {
        let client = build_http_client(&config.crawler)?;
        let state_store = DiscoveryStateStore::new(config.crawler.state_dir.clone());
        let sessions = Arc::new(Mutex::new(SessionCache::new(
            config.crawler.session_ttl_minutes,
        )));
        Ok(Self {
            config,
            storage: Arc::new(StdMutex::new(storage)),
            state_store,
            client,
            extractor,
            sessions,
        })
    }

    /// Runs one cycle and returns its summary
    ///
    /// Institutions are isolated from each other: one failing aborts only its
    /// own crawl. The recheck phase runs after crawling when a recheck budget
    /// is set.
    pub async fn run_cycle(&self, options: &CycleOptions) -> Result<CycleSummary> {
        let institutions = self.select_institutions(options)?;
        info!(
            institutions = institutions.len(),
            mode = ?options.mode,
            scope = ?options.scope,
            "starting cycle"
        );

        let (recorder, drain) = MetricsRecorder::spawn(Arc::clone(&self.storage));
        let worker = Arc::new(PageWorker::new(
            self.client.clone(),
            Arc::clone(&self.extractor),
            Arc::clone(&self.sessions),
            recorder.clone(),
            self.config.crawler.confidence_threshold,
        ));

        let mut summary = CycleSummary::default();
        for institution in &institutions {
            match self
                .crawl_institution(institution, Arc::clone(&worker), options)
                .await
            {
                Ok(inst_summary) => summary.absorb(&institution.id, inst_summary),
                Err(e) => {
                    error!(institution = %institution.id, error = %e, "institution crawl aborted");
                    summary.absorb(
                        &institution.id,
                        InstitutionSummary {
                            pages_failed: 1,
                            ..Default::default()
                        },
                    );
                }
            }
        }

        if let Some(max_rechecks) = options.max_rechecks {
            summary.exclusions_reversed = self
                .run_recheck_phase(options, max_rechecks)
                .await
                .unwrap_or_else(|e| {
                    error!(error = %e, "recheck phase failed");
                    0
                });
        }

        drop(worker);
        drop(recorder);
        let metrics_written = drain.close().await;

        info!(
            pages_fetched = summary.pages_fetched,
            pages_excluded = summary.pages_excluded,
            pages_failed = summary.pages_failed,
            pages_deferred = summary.pages_deferred,
            exclusions_reversed = summary.exclusions_reversed,
            metrics_written,
            "cycle finished"
        );
        Ok(summary)
    }

    /// Picks the institutions this cycle covers
    fn select_institutions(&self, options: &CycleOptions) -> Result<Vec<InstitutionConfig>> {
        if let Some(id) = &options.institution {
            let institution = self
                .config
                .institution(id)
                .ok_or_else(|| CrawlError::UnknownInstitution(id.clone()))?;
            return Ok(vec![institution.clone()]);
        }

        match options.scope {
            CycleScope::Full => Ok(self.config.institutions.clone()),
            CycleScope::Cycle => {
                // Least recently crawled first; never-crawled wins outright
                let oldest = self
                    .config
                    .institutions
                    .iter()
                    .min_by_key(|inst| self.state_store.load(&inst.id).last_cycle)
                    .cloned();
                Ok(oldest.into_iter().collect())
            }
        }
    }

    async fn crawl_institution(
        &self,
        institution: &InstitutionConfig,
        worker: Arc<PageWorker>,
        options: &CycleOptions,
    ) -> Result<InstitutionSummary> {
        // Each institution gets its own wall-clock budget, so one slow site
        // cannot starve the rest of a full-scope cycle
        let deadline = Instant::now() + Duration::from_secs(self.config.crawler.cycle_deadline_secs);
        let mut state = self.state_store.load(&institution.id);
        let historical_accuracy = {
            let storage = self.storage.lock().unwrap_or_else(|p| p.into_inner());
            metrics::moving_accuracy(&*storage, &institution.id, None, DEFAULT_ACCURACY_WINDOW)?
        };

        self.discover(institution, &worker, &mut state, options.mode)
            .await;

        let batch = state.dequeue_batch(institution.max_pages_per_cycle as usize);
        info!(
            institution = %institution.id,
            batch = batch.len(),
            queued_after = state.unscraped_urls.len(),
            accuracy = ?historical_accuracy,
            "dispatching batch"
        );

        let outcomes = self
            .dispatch(institution, worker, batch, historical_accuracy, deadline)
            .await;

        // Collect-then-persist: all outcomes apply to the in-memory state,
        // then storage and the state file are written once.
        let mut summary = InstitutionSummary::default();
        {
            let mut storage = self.storage.lock().unwrap_or_else(|p| p.into_inner());
            for outcome in outcomes {
                match outcome {
                    WorkerOutcome::Extracted { page, depth, links } => {
                        state.resolve(&page.url);
                        if !links.is_empty() {
                            state.advance(&links, &page.url, depth, links.clone(), Utc::now());
                        }
                        storage.upsert_page(&page)?;
                        summary.pages_fetched += 1;
                    }
                    WorkerOutcome::Excluded { entry, depth, links } => {
                        state.resolve(&entry.url);
                        if !links.is_empty() {
                            state.advance(&links, &entry.url, depth, links.clone(), Utc::now());
                        }
                        storage.upsert_exclusion(&entry)?;
                        summary.pages_excluded += 1;
                    }
                    WorkerOutcome::Deferred { url, .. } => {
                        state.defer(&url);
                        summary.pages_deferred += 1;
                    }
                    WorkerOutcome::Failed { url, .. } => {
                        state.resolve(&url);
                        summary.pages_failed += 1;
                    }
                }
            }
        }

        state.last_cycle = Some(Utc::now());
        state.compact(self.config.crawler.section_max_age_days, Utc::now());
        self.state_store.save(&institution.id, &state)?;

        Ok(summary)
    }

    /// Explores the institution's seed sections and refreshes the frontier
    ///
    /// Incremental mode skips seeds explored within the freshness window;
    /// deep mode re-explores everything. Discovery failures are logged and
    /// skipped, never fatal.
    async fn discover(
        &self,
        institution: &InstitutionConfig,
        worker: &PageWorker,
        state: &mut DiscoveryState,
        mode: DiscoveryMode,
    ) {
        let now = Utc::now();
        let window = self.config.crawler.freshness_window_days;

        for base_url in &institution.base_urls {
            let seed = match normalize_url(base_url) {
                Ok(seed) => seed,
                Err(e) => {
                    warn!(institution = %institution.id, url = base_url, error = %e, "bad seed URL");
                    continue;
                }
            };

            if mode == DiscoveryMode::Incremental
                && state.is_section_fresh(seed.as_str(), window, now)
            {
                info!(institution = %institution.id, seed = %seed, "section fresh, skipping");
                continue;
            }

            let cookie = match worker.session_cookie(institution).await {
                Ok(cookie) => cookie,
                Err(reason) => {
                    warn!(institution = %institution.id, reason = %reason, "discovery login failed");
                    continue;
                }
            };

            match fetch_with_retry(&self.client, &seed, cookie.as_deref(), false).await {
                FetchResult::Success { body, .. } => {
                    let links = discover_links(&body, &seed, institution);
                    info!(
                        institution = %institution.id,
                        seed = %seed,
                        discovered = links.len(),
                        "explored section"
                    );
                    state.advance(&links, seed.as_str(), 0, links.clone(), now);
                }
                other => {
                    warn!(institution = %institution.id, seed = %seed, result = ?other, "seed fetch failed");
                }
            }
        }
    }

    /// Fans the batch out to workers and collects every outcome
    ///
    /// Hitting the cycle deadline stops further dispatch; URLs never
    /// dispatched come back as deferred outcomes so they are counted and
    /// requeued, and already running fetches are still collected.
    async fn dispatch(
        &self,
        institution: &InstitutionConfig,
        worker: Arc<PageWorker>,
        batch: Vec<(String, u32)>,
        historical_accuracy: Option<f64>,
        deadline: Instant,
    ) -> Vec<WorkerOutcome> {
        let semaphore = Arc::new(Semaphore::new(
            self.config.crawler.max_concurrent_fetches as usize,
        ));
        let institution = Arc::new(institution.clone());
        let mut join_set = JoinSet::new();
        let mut outcomes = Vec::new();

        let mut batch_iter = batch.into_iter();
        for (url_str, depth) in batch_iter.by_ref() {
            if Instant::now() >= deadline {
                warn!(institution = %institution.id, "cycle deadline hit, stopping dispatch");
                outcomes.push(WorkerOutcome::Deferred {
                    url: url_str,
                    reason: "cycle deadline reached".to_string(),
                });
                break;
            }

            let url = match Url::parse(&url_str) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = url_str, error = %e, "queued URL no longer parses, dropping");
                    outcomes.push(WorkerOutcome::Failed {
                        url: url_str,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let worker = Arc::clone(&worker);
            let institution = Arc::clone(&institution);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return WorkerOutcome::Deferred {
                            url: url.to_string(),
                            reason: "worker pool shut down".to_string(),
                        }
                    }
                };
                worker
                    .process(&institution, PageTask { url, depth }, historical_accuracy)
                    .await
            });
        }

        // Anything not dispatched because of the deadline goes back unharmed
        for (url_str, _) in batch_iter {
            outcomes.push(WorkerOutcome::Deferred {
                url: url_str,
                reason: "cycle deadline reached".to_string(),
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(institution = %institution.id, error = %e, "worker task panicked");
                }
            }
        }

        outcomes
    }

    async fn run_recheck_phase(
        &self,
        options: &CycleOptions,
        max_rechecks: usize,
    ) -> Result<usize> {
        let rechecker = Rechecker::new(
            self.client.clone(),
            Arc::clone(&self.extractor),
            &self.config,
        );

        // Narrow to the pinned institution's hosts when one was requested;
        // an institution can publish on several hosts and every one of them
        // may hold exclusions worth rechecking
        let mut reversed = 0;
        match self.recheck_hosts(options) {
            Some(hosts) => {
                let mut budget = max_rechecks;
                for host in hosts {
                    if budget == 0 {
                        break;
                    }
                    let report = rechecker
                        .run_recheck_cycle(
                            &self.storage,
                            &self.state_store,
                            &self.config,
                            Some(&host),
                            budget,
                            options.auto_remove,
                        )
                        .await?;
                    budget = budget.saturating_sub(report.rechecked);
                    reversed += report.reversed;
                }
            }
            None => {
                let report = rechecker
                    .run_recheck_cycle(
                        &self.storage,
                        &self.state_store,
                        &self.config,
                        None,
                        max_rechecks,
                        options.auto_remove,
                    )
                    .await?;
                reversed = report.reversed;
            }
        }

        Ok(if options.auto_remove { reversed } else { 0 })
    }

    /// Hosts the recheck phase is restricted to: every distinct base-URL host
    /// of the pinned institution, or `None` when no institution is pinned
    fn recheck_hosts(&self, options: &CycleOptions) -> Option<Vec<String>> {
        let institution = options
            .institution
            .as_ref()
            .and_then(|id| self.config.institution(id))?;

        let mut hosts: Vec<String> = institution
            .base_urls
            .iter()
            .filter_map(|u| normalize_url(u).ok())
            .filter_map(|u| crate::url::host_of(&u))
            .collect();
        hosts.sort();
        hosts.dedup();
        Some(hosts)
    }
}

/// Runs a single cycle against a fresh SQLite storage handle
///
/// The operator-facing entry point used by the CLI.
pub async fn run_cycle(config: Config, options: CycleOptions) -> Result<CycleSummary> {
    let storage = crate::storage::open_storage(std::path::Path::new(
        &config.crawler.database_path,
    ))?;
    let runner = CycleRunner::new(config, storage)?;
    runner.run_cycle(&options).await
}
