//! Fetch-and-extract worker
//!
//! One worker invocation handles one queued URL end to end: session
//! acquisition, fetch with retries, strategy selection, extraction,
//! classification, and link discovery. Workers never touch storage; they
//! return outcomes for the scheduler to persist and push metrics through the
//! recorder.

use std::sync::Arc;

use chrono::Utc;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::InstitutionConfig;
use crate::extract::{classify, Classification, Extractor};
use crate::metrics::MetricsRecorder;
use crate::session::{form_login, SessionCache};
use crate::storage::{ExclusionEntry, Page, PageType, QualityMetric};
use crate::strategy::{self, ConfidenceLevel};
use crate::url::host_of;
use crate::worker::fetcher::{fetch_with_retry, FetchResult};
use crate::worker::links::discover_links;

/// Exclusion confidence when the server itself confirmed the URL is dead or
/// forbidden; high enough that the rechecker leaves it alone
pub const HTTP_CONFIRMED_EXCLUSION_CONFIDENCE: f64 = 0.9;

/// A unit of work: one queued URL at a known exploration depth
#[derive(Debug, Clone)]
pub struct PageTask {
    pub url: Url,
    pub depth: u32,
}

/// What became of one processed task
#[derive(Debug)]
pub enum WorkerOutcome {
    /// The page is program content; persist it and queue its links
    Extracted {
        page: Box<Page>,
        depth: u32,
        links: Vec<String>,
    },
    /// The page is not program content; record the exclusion
    Excluded {
        entry: ExclusionEntry,
        depth: u32,
        links: Vec<String>,
    },
    /// Transient trouble; put the URL back for the next cycle
    Deferred { url: String, reason: String },
    /// Non-retryable failure with nothing to record beyond a metric
    Failed { url: String, reason: String },
}

/// Processes queued URLs for one cycle
pub struct PageWorker {
    client: Client,
    extractor: Arc<dyn Extractor>,
    sessions: Arc<Mutex<SessionCache>>,
    metrics: MetricsRecorder,
    confidence_threshold: f64,
}

impl PageWorker {
    pub fn new(
        client: Client,
        extractor: Arc<dyn Extractor>,
        sessions: Arc<Mutex<SessionCache>>,
        metrics: MetricsRecorder,
        confidence_threshold: f64,
    ) -> Self {
        Self {
            client,
            extractor,
            sessions,
            metrics,
            confidence_threshold,
        }
    }

    /// Handles one task end to end
    ///
    /// # Arguments
    ///
    /// * `institution` - The institution the URL belongs to
    /// * `task` - The URL and its exploration depth
    /// * `historical_accuracy` - Moving extraction accuracy for the
    ///   institution, as computed at the start of the cycle
    pub async fn process(
        &self,
        institution: &InstitutionConfig,
        task: PageTask,
        historical_accuracy: Option<f64>,
    ) -> WorkerOutcome {
        let mut cookie = match self.session_cookie(institution).await {
            Ok(cookie) => cookie,
            Err(reason) => {
                return self.defer(institution, task.url.as_str(), reason);
            }
        };

        let mut result = fetch_with_retry(&self.client, &task.url, cookie.as_deref(), false).await;

        // A rejected session gets exactly one fresh login and one retry
        if matches!(result, FetchResult::Unauthorized { .. }) && institution.requires_session {
            debug!(url = %task.url, "session rejected, re-authenticating");
            self.sessions.lock().await.invalidate(&institution.id);
            match self.fresh_login(institution).await {
                Ok(new_cookie) => {
                    cookie = Some(new_cookie);
                    result =
                        fetch_with_retry(&self.client, &task.url, cookie.as_deref(), false).await;
                }
                Err(reason) => return self.defer(institution, task.url.as_str(), reason),
            }
        }

        match result {
            FetchResult::Success { body, .. } => {
                self.extract_and_classify(institution, &task, &body, historical_accuracy)
            }
            FetchResult::Unauthorized { status_code } => {
                if institution.requires_session {
                    self.defer(
                        institution,
                        task.url.as_str(),
                        format!("session rejected twice (HTTP {status_code})"),
                    )
                } else {
                    // A public URL the server refuses is confirmed non-content
                    self.exclude_confirmed(institution, &task, status_code)
                }
            }
            FetchResult::Gone { status_code } => {
                self.exclude_confirmed(institution, &task, status_code)
            }
            FetchResult::ClientError { status_code } => self.fail(
                institution,
                task.url.as_str(),
                format!("HTTP {status_code}"),
            ),
            FetchResult::TransientExhausted { error } => {
                self.defer(institution, task.url.as_str(), error)
            }
        }
    }

    fn extract_and_classify(
        &self,
        institution: &InstitutionConfig,
        task: &PageTask,
        body: &str,
        historical_accuracy: Option<f64>,
    ) -> WorkerOutcome {
        let selection = strategy::select(task.url.as_str(), historical_accuracy);
        debug!(
            url = %task.url,
            strategy = %selection.strategy,
            rationale = ?selection.rationale,
            "selected extraction strategy"
        );

        let extraction = self
            .extractor
            .extract(&task.url, body, selection.strategy);
        let accuracy = if extraction.unparseable {
            0.0
        } else {
            extraction.confidence
        };

        let links = if task.depth < institution.max_depth {
            discover_links(body, &task.url, institution)
        } else {
            Vec::new()
        };

        let classification = classify(
            &task.url,
            &institution.id,
            extraction,
            selection.strategy,
            self.confidence_threshold,
            Utc::now(),
        );

        match classification {
            Classification::Program(page) => {
                info!(
                    url = %task.url,
                    institution = %institution.id,
                    confidence = page.confidence,
                    links = links.len(),
                    "extracted program page"
                );
                self.metrics.record(QualityMetric {
                    institution: institution.id.clone(),
                    page_type: PageType::Program,
                    extraction_method: selection.strategy,
                    accuracy,
                    confidence: selection.confidence,
                    extraction_pattern: None,
                    recorded_at: Utc::now(),
                });
                WorkerOutcome::Extracted {
                    page,
                    depth: task.depth,
                    links,
                }
            }
            Classification::Excluded(entry) => {
                debug!(url = %task.url, reason = %entry.reason, "excluding page");
                self.metrics.record(QualityMetric {
                    institution: institution.id.clone(),
                    page_type: PageType::Exclusion,
                    extraction_method: selection.strategy,
                    accuracy,
                    confidence: selection.confidence,
                    extraction_pattern: Some(entry.reason.clone()),
                    recorded_at: Utc::now(),
                });
                WorkerOutcome::Excluded {
                    entry,
                    depth: task.depth,
                    links,
                }
            }
        }
    }

    /// Returns the session cookie for an institution, logging in if needed
    ///
    /// `Ok(None)` for institutions that need no session. The error string is
    /// a defer reason; login trouble is treated as transient.
    pub async fn session_cookie(
        &self,
        institution: &InstitutionConfig,
    ) -> Result<Option<String>, String> {
        if !institution.requires_session {
            return Ok(None);
        }

        if let Some(session) = self.sessions.lock().await.get(&institution.id) {
            return Ok(Some(session.cookie_header));
        }
        self.fresh_login(institution).await.map(Some)
    }

    async fn fresh_login(&self, institution: &InstitutionConfig) -> Result<String, String> {
        let login = institution
            .login
            .as_ref()
            .ok_or_else(|| "session required but no login configured".to_string())?;

        match form_login(&self.client, &institution.id, login).await {
            Ok(cookie) => {
                self.sessions
                    .lock()
                    .await
                    .put(&institution.id, cookie.clone());
                Ok(cookie)
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn exclude_confirmed(
        &self,
        institution: &InstitutionConfig,
        task: &PageTask,
        status_code: u16,
    ) -> WorkerOutcome {
        let entry = ExclusionEntry {
            url: task.url.to_string(),
            host: host_of(&task.url).unwrap_or_default(),
            reason: format!("http {status_code}"),
            confidence: HTTP_CONFIRMED_EXCLUSION_CONFIDENCE,
            excluded_at: Utc::now(),
        };
        self.metrics.record(QualityMetric {
            institution: institution.id.clone(),
            page_type: PageType::Exclusion,
            extraction_method: crate::strategy::ExtractionStrategy::Regex,
            accuracy: 0.0,
            confidence: ConfidenceLevel::Low,
            extraction_pattern: Some(entry.reason.clone()),
            recorded_at: Utc::now(),
        });
        WorkerOutcome::Excluded {
            entry,
            depth: task.depth,
            links: Vec::new(),
        }
    }

    fn defer(
        &self,
        institution: &InstitutionConfig,
        url: &str,
        reason: String,
    ) -> WorkerOutcome {
        warn!(url, reason = %reason, "deferring URL to next cycle");
        self.metrics.record(QualityMetric {
            institution: institution.id.clone(),
            page_type: PageType::Failure,
            extraction_method: crate::strategy::ExtractionStrategy::Regex,
            accuracy: 0.0,
            confidence: ConfidenceLevel::Low,
            extraction_pattern: Some("deferred".to_string()),
            recorded_at: Utc::now(),
        });
        WorkerOutcome::Deferred {
            url: url.to_string(),
            reason,
        }
    }

    fn fail(&self, institution: &InstitutionConfig, url: &str, reason: String) -> WorkerOutcome {
        warn!(url, reason = %reason, "page failed");
        self.metrics.record(QualityMetric {
            institution: institution.id.clone(),
            page_type: PageType::Failure,
            extraction_method: crate::strategy::ExtractionStrategy::Regex,
            accuracy: 0.0,
            confidence: ConfidenceLevel::Low,
            extraction_pattern: None,
            recorded_at: Utc::now(),
        });
        WorkerOutcome::Failed {
            url: url.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::{test_crawler_config, test_institution};
    use crate::extract::PatternExtractor;
    use crate::storage::{SqliteStorage, Storage};
    use crate::worker::fetcher::build_http_client;
    use std::sync::Mutex as StdMutex;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PROGRAM_BODY: &str = r#"<html>
        <head><title>Digitalisierungsförderung</title></head>
        <body>
            <p>Förderhöhe: bis zu € 150.000.</p>
            <p>Einreichfrist: 30.06.2027</p>
            <p>Antragsberechtigt sind Unternehmen mit Sitz in Österreich, die mindestens ein Jahr bestehen.</p>
            <p>Folgende Unterlagen müssen eingereicht werden: Projektbeschreibung und Kostenplan.</p>
            <p>Kontakt: digital@example.at</p>
        </body>
    </html>"#;

    struct Harness {
        worker: PageWorker,
        storage: Arc<StdMutex<SqliteStorage>>,
        drain: crate::metrics::MetricsDrain,
    }

    fn harness() -> Harness {
        let storage = Arc::new(StdMutex::new(SqliteStorage::new_in_memory().unwrap()));
        let (metrics, drain) = MetricsRecorder::spawn(Arc::clone(&storage));
        let client = build_http_client(&test_crawler_config()).unwrap();
        let worker = PageWorker::new(
            client,
            Arc::new(PatternExtractor::new()),
            Arc::new(Mutex::new(SessionCache::new(30))),
            metrics,
            0.35,
        );
        Harness {
            worker,
            storage,
            drain,
        }
    }

    fn task(server: &MockServer, p: &str) -> PageTask {
        PageTask {
            url: Url::parse(&format!("{}{}", server.uri(), p)).unwrap(),
            depth: 1,
        }
    }

    #[tokio::test]
    async fn test_program_page_is_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/foerderung/digital"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PROGRAM_BODY))
            .mount(&server)
            .await;

        let h = harness();
        let institution = test_institution("ffg", &server.uri());
        let outcome = h
            .worker
            .process(&institution, task(&server, "/foerderung/digital"), None)
            .await;

        match outcome {
            WorkerOutcome::Extracted { page, .. } => {
                assert_eq!(page.institution, "ffg");
                assert_eq!(page.funding_amount_max, Some(150_000.0));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_links_are_harvested_only_below_max_depth() {
        let server = MockServer::start().await;
        let body = format!(
            r#"<html>
            <head><title>Digitalisierungsförderung</title></head>
            <body>
                <p>Förderhöhe: bis zu € 150.000.</p>
                <p>Einreichfrist: 30.06.2027</p>
                <p>Antragsberechtigt sind Unternehmen mit Sitz in Österreich, die mindestens ein Jahr bestehen.</p>
                <p>Folgende Unterlagen müssen eingereicht werden: Projektbeschreibung und Kostenplan.</p>
                <a href="{}/foerderung/naechste">Nächste Förderung</a>
            </body>
        </html>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/foerderung/digital"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let h = harness();
        let institution = test_institution("ffg", &server.uri());
        assert_eq!(institution.max_depth, 2);

        let mut below = task(&server, "/foerderung/digital");
        below.depth = 1;
        match h.worker.process(&institution, below, None).await {
            WorkerOutcome::Extracted { links, .. } => assert_eq!(links.len(), 1),
            other => panic!("unexpected outcome: {other:?}"),
        }

        // At the depth limit the page is still extracted, but contributes
        // nothing to the frontier
        let mut at_limit = task(&server, "/foerderung/digital");
        at_limit.depth = 2;
        match h.worker.process(&institution, at_limit, None).await {
            WorkerOutcome::Extracted { links, .. } => assert!(links.is_empty()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plain_page_is_excluded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/team"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><p>Unser Team stellt sich vor.</p></body></html>"),
            )
            .mount(&server)
            .await;

        let h = harness();
        let institution = test_institution("ffg", &server.uri());
        let outcome = h.worker.process(&institution, task(&server, "/team"), None).await;

        match outcome {
            WorkerOutcome::Excluded { entry, .. } => {
                assert_eq!(entry.reason, "no program signals");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_defers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let h = harness();
        let institution = test_institution("ffg", &server.uri());
        let outcome = h.worker.process(&institution, task(&server, "/down"), None).await;

        assert!(matches!(outcome, WorkerOutcome::Deferred { .. }));
    }

    #[tokio::test]
    async fn test_gone_page_is_confirmed_exclusion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let h = harness();
        let institution = test_institution("ffg", &server.uri());
        let outcome = h.worker.process(&institution, task(&server, "/old"), None).await;

        match outcome {
            WorkerOutcome::Excluded { entry, .. } => {
                assert_eq!(entry.reason, "http 404");
                assert_eq!(entry.confidence, HTTP_CONFIRMED_EXCLUSION_CONFIDENCE);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_session_triggers_one_relogin_and_retry() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "sid=fresh; Path=/"),
            )
            .mount(&server)
            .await;

        // Stale cookie gets 401; the fresh one succeeds
        Mock::given(method("GET"))
            .and(path("/portal/foerderung"))
            .and(header("cookie", "sid=stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/portal/foerderung"))
            .and(header("cookie", "sid=fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PROGRAM_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness();
        let mut institution = test_institution("ffg", &server.uri());
        institution.requires_session = true;
        institution.login = Some(crate::config::LoginConfig {
            url: format!("{}/login", server.uri()),
            email: "bot@example.com".to_string(),
            password: "secret".to_string(),
            email_field: "email".to_string(),
            password_field: "password".to_string(),
        });

        // Seed the cache with a stale session
        h.worker
            .sessions
            .lock()
            .await
            .put("ffg", "sid=stale".to_string());

        let outcome = h
            .worker
            .process(&institution, task(&server, "/portal/foerderung"), None)
            .await;

        assert!(matches!(outcome, WorkerOutcome::Extracted { .. }));
        // The fresh session is cached for the next task
        let cached = h.worker.sessions.lock().await.get("ffg").unwrap();
        assert_eq!(cached.cookie_header, "sid=fresh");
    }

    #[tokio::test]
    async fn test_session_rejected_twice_defers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "sid=fresh; Path=/"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/portal/p"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let h = harness();
        let mut institution = test_institution("ffg", &server.uri());
        institution.requires_session = true;
        institution.login = Some(crate::config::LoginConfig {
            url: format!("{}/login", server.uri()),
            email: "bot@example.com".to_string(),
            password: "secret".to_string(),
            email_field: "email".to_string(),
            password_field: "password".to_string(),
        });
        h.worker
            .sessions
            .lock()
            .await
            .put("ffg", "sid=stale".to_string());

        let outcome = h
            .worker
            .process(&institution, task(&server, "/portal/p"), None)
            .await;

        match outcome {
            WorkerOutcome::Deferred { reason, .. } => {
                assert!(reason.contains("session rejected twice"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outcomes_produce_metrics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/foerderung/digital"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PROGRAM_BODY))
            .mount(&server)
            .await;

        let h = harness();
        let institution = test_institution("ffg", &server.uri());
        h.worker
            .process(&institution, task(&server, "/foerderung/digital"), None)
            .await;

        drop(h.worker);
        assert_eq!(h.drain.close().await, 1);
        let guard = h.storage.lock().unwrap();
        let accuracies = guard.recent_accuracies_any_method("ffg", 10).unwrap();
        assert_eq!(accuracies.len(), 1);
        assert!(accuracies[0] > 0.0);
    }
}
