//! Integration tests for the cycle runner
//!
//! These tests use wiremock to stand in for institution websites and run
//! full cycles end-to-end: discovery, dispatch, persistence, and the
//! exclusion recheck phase.

use std::fs;
use std::time::Duration;

use chrono::Utc;
use fundcrawl::config::test_support::{test_config, test_institution};
use fundcrawl::config::{Config, LoginConfig};
use fundcrawl::scheduler::{CycleOptions, CycleRunner};
use fundcrawl::storage::{ExclusionEntry, SqliteStorage, Storage};
use fundcrawl::{DiscoveryStateStore, InstitutionConfig};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROGRAM_BODY: &str = r#"<html>
    <head><title>Technologieförderung</title></head>
    <body>
        <p>Förderhöhe: bis zu € 300.000.</p>
        <p>Einreichfrist: 31.12.2027</p>
        <p>Antragsberechtigt sind Unternehmen mit Sitz in Österreich, die mindestens ein Jahr bestehen.</p>
        <p>Folgende Unterlagen müssen eingereicht werden: Projektbeschreibung und Kostenplan.</p>
        <p>Kontakt: technologie@example.at</p>
    </body>
</html>"#;

fn seed_body(base: &str) -> String {
    format!(
        r#"<html><head><title>Förderungen</title></head><body>
        <a href="{base}/foerderung/alpha">Alpha</a>
        <a href="{base}/foerderung/beta">Beta</a>
        <a href="{base}/foerderung/gamma">Gamma</a>
        <a href="{base}/karriere">Jobs</a>
        </body></html>"#
    )
}

fn program_body_with_link(next: &str) -> String {
    format!(
        r#"<html>
    <head><title>Technologieförderung</title></head>
    <body>
        <p>Förderhöhe: bis zu € 300.000.</p>
        <p>Einreichfrist: 31.12.2027</p>
        <p>Antragsberechtigt sind Unternehmen mit Sitz in Österreich, die mindestens ein Jahr bestehen.</p>
        <p>Folgende Unterlagen müssen eingereicht werden: Projektbeschreibung und Kostenplan.</p>
        <p>Kontakt: technologie@example.at</p>
        <a href="{next}">Weiterführende Förderung</a>
    </body>
</html>"#
    )
}

fn cycle_config(state_dir: &TempDir, institutions: Vec<InstitutionConfig>) -> Config {
    let mut config = test_config(institutions);
    config.crawler.state_dir = state_dir.path().to_string_lossy().into_owned();
    config
}

async fn mount_program_pages(server: &MockServer, paths: &[&str]) {
    for p in paths {
        Mock::given(method("GET"))
            .and(path(*p))
            .respond_with(ResponseTemplate::new(200).set_body_string(PROGRAM_BODY))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_first_cycle_respects_page_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(seed_body(&server.uri())))
        .mount(&server)
        .await;
    mount_program_pages(
        &server,
        &["/foerderung/alpha", "/foerderung/beta", "/foerderung/gamma"],
    )
    .await;

    let state_dir = TempDir::new().unwrap();
    let mut institution = test_institution("ffg", &server.uri());
    institution.max_pages_per_cycle = 2;
    let config = cycle_config(&state_dir, vec![institution]);

    let runner = CycleRunner::new(config, SqliteStorage::new_in_memory().unwrap()).unwrap();
    let summary = runner.run_cycle(&CycleOptions::default()).await.unwrap();

    // Three discovered, budget two: two fetched, one still queued
    assert_eq!(summary.pages_fetched, 2);
    assert_eq!(summary.pages_failed, 0);

    let state = DiscoveryStateStore::new(state_dir.path()).load("ffg");
    assert_eq!(state.unscraped_urls.len(), 1);
    assert_eq!(state.explored_sections.len(), 1);
    assert_eq!(state.explored_sections[0].discovered_urls.len(), 3);
    assert!(state.invariants_hold());
    assert!(state.last_cycle.is_some());
}

#[tokio::test]
async fn test_second_cycle_drains_queue_and_skips_fresh_section() {
    let server = MockServer::start().await;
    // The seed is served once; the second cycle must not hit it again
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(seed_body(&server.uri())))
        .expect(1)
        .mount(&server)
        .await;
    mount_program_pages(
        &server,
        &["/foerderung/alpha", "/foerderung/beta", "/foerderung/gamma"],
    )
    .await;

    let state_dir = TempDir::new().unwrap();
    let mut institution = test_institution("ffg", &server.uri());
    institution.max_pages_per_cycle = 2;
    let config = cycle_config(&state_dir, vec![institution]);

    let runner = CycleRunner::new(config, SqliteStorage::new_in_memory().unwrap()).unwrap();
    let first = runner.run_cycle(&CycleOptions::default()).await.unwrap();
    let second = runner.run_cycle(&CycleOptions::default()).await.unwrap();

    assert_eq!(first.pages_fetched, 2);
    assert_eq!(second.pages_fetched, 1);

    let state = DiscoveryStateStore::new(state_dir.path()).load("ffg");
    assert!(state.unscraped_urls.is_empty());
    assert_eq!(state.seen.len(), 3);
    assert!(state.invariants_hold());
}

#[tokio::test]
async fn test_max_depth_stops_harvesting_at_the_configured_hop() {
    let server = MockServer::start().await;
    let base = server.uri();

    // A chain: seed -> alpha -> beta -> gamma. With max-depth 2, alpha sits
    // at depth 1 and may harvest, beta sits at depth 2 and may not, so gamma
    // must never be discovered.
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><body><a href="{base}/foerderung/alpha">Alpha</a></body></html>"#
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/foerderung/alpha"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(program_body_with_link(&format!("{base}/foerderung/beta"))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/foerderung/beta"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(program_body_with_link(&format!("{base}/foerderung/gamma"))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/foerderung/gamma"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PROGRAM_BODY))
        .expect(0)
        .mount(&server)
        .await;

    let state_dir = TempDir::new().unwrap();
    let mut institution = test_institution("ffg", &base);
    institution.max_depth = 2;
    let config = cycle_config(&state_dir, vec![institution]);

    let runner = CycleRunner::new(config, SqliteStorage::new_in_memory().unwrap()).unwrap();
    let first = runner.run_cycle(&CycleOptions::default()).await.unwrap();
    let second = runner.run_cycle(&CycleOptions::default()).await.unwrap();
    let third = runner.run_cycle(&CycleOptions::default()).await.unwrap();

    // Cycle one fetches alpha and queues beta; cycle two fetches beta but
    // harvests nothing; cycle three has an empty queue
    assert_eq!(first.pages_fetched, 1);
    assert_eq!(second.pages_fetched, 1);
    assert_eq!(third.pages_fetched, 0);

    let state = DiscoveryStateStore::new(state_dir.path()).load("ffg");
    assert!(!state
        .known_urls
        .contains(&format!("{base}/foerderung/gamma")));
    assert!(state.invariants_hold());
}

#[tokio::test]
async fn test_expired_deadline_defers_the_batch_and_keeps_the_queue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(seed_body(&server.uri())))
        .mount(&server)
        .await;
    // None of the discovered pages may be fetched once the deadline is gone
    for p in ["/foerderung/alpha", "/foerderung/beta", "/foerderung/gamma"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_string(PROGRAM_BODY))
            .expect(0)
            .mount(&server)
            .await;
    }

    let state_dir = TempDir::new().unwrap();
    let mut config = cycle_config(&state_dir, vec![test_institution("ffg", &server.uri())]);
    config.crawler.cycle_deadline_secs = 0;

    let runner = CycleRunner::new(config, SqliteStorage::new_in_memory().unwrap()).unwrap();
    let summary = runner.run_cycle(&CycleOptions::default()).await.unwrap();

    assert_eq!(summary.pages_fetched, 0);
    assert_eq!(summary.pages_deferred, 3);

    // The whole batch is back in the queue for the next cycle
    let state = DiscoveryStateStore::new(state_dir.path()).load("ffg");
    assert_eq!(state.unscraped_urls.len(), 3);
    assert!(state.invariants_hold());
}

#[tokio::test]
async fn test_deadline_budget_is_per_institution() {
    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(seed_body(&slow.uri()))
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&slow)
        .await;

    let fast = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(seed_body(&fast.uri())))
        .mount(&fast)
        .await;
    mount_program_pages(
        &fast,
        &["/foerderung/alpha", "/foerderung/beta", "/foerderung/gamma"],
    )
    .await;

    let state_dir = TempDir::new().unwrap();
    // The slow institution eats its whole one-second budget on discovery;
    // the fast one, crawled after it, must still get a full budget
    let mut config = cycle_config(
        &state_dir,
        vec![
            test_institution("slow", &slow.uri()),
            test_institution("fast", &fast.uri()),
        ],
    );
    config.crawler.cycle_deadline_secs = 1;

    let runner = CycleRunner::new(config, SqliteStorage::new_in_memory().unwrap()).unwrap();
    let options = CycleOptions {
        scope: fundcrawl::CycleScope::Full,
        ..Default::default()
    };
    let summary = runner.run_cycle(&options).await.unwrap();

    let slow_summary = &summary.per_institution["slow"];
    assert_eq!(slow_summary.pages_fetched, 0);
    assert_eq!(slow_summary.pages_deferred, 3);

    let fast_summary = &summary.per_institution["fast"];
    assert_eq!(fast_summary.pages_fetched, 3);
    assert_eq!(fast_summary.pages_deferred, 0);
}

#[tokio::test]
async fn test_session_institution_logs_in_once_per_cycle() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "sid=s1; Path=/"))
        .expect(1)
        .mount(&server)
        .await;

    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("cookie", "sid=s1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><body><a href="{base}/foerderung/alpha">Alpha</a></body></html>"#
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/foerderung/alpha"))
        .and(header("cookie", "sid=s1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PROGRAM_BODY))
        .mount(&server)
        .await;

    let state_dir = TempDir::new().unwrap();
    let mut institution = test_institution("ffg", &server.uri());
    institution.requires_session = true;
    institution.login = Some(LoginConfig {
        url: format!("{}/login", server.uri()),
        email: "bot@example.com".to_string(),
        password: "secret".to_string(),
        email_field: "email".to_string(),
        password_field: "password".to_string(),
    });
    let config = cycle_config(&state_dir, vec![institution]);

    let runner = CycleRunner::new(config, SqliteStorage::new_in_memory().unwrap()).unwrap();
    let summary = runner.run_cycle(&CycleOptions::default()).await.unwrap();

    assert_eq!(summary.pages_fetched, 1);
}

#[tokio::test]
async fn test_recheck_phase_reverses_false_positive() {
    let server = MockServer::start().await;
    // Seed without links; nothing new to crawl
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
        .mount(&server)
        .await;
    // The once-excluded page now serves real program content
    Mock::given(method("GET"))
        .and(path("/foerderung/umwelt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PROGRAM_BODY))
        .mount(&server)
        .await;

    let state_dir = TempDir::new().unwrap();
    let config = cycle_config(&state_dir, vec![test_institution("ffg", &server.uri())]);

    let host = url::Url::parse(&server.uri())
        .unwrap()
        .host_str()
        .unwrap()
        .to_string();
    let excluded_url = format!("{}/foerderung/umwelt", server.uri());
    let mut storage = SqliteStorage::new_in_memory().unwrap();
    storage
        .upsert_exclusion(&ExclusionEntry {
            url: excluded_url.clone(),
            host,
            reason: "no program signals".to_string(),
            confidence: 0.5,
            excluded_at: Utc::now(),
        })
        .unwrap();

    let runner = CycleRunner::new(config, storage).unwrap();
    let options = CycleOptions {
        max_rechecks: Some(10),
        auto_remove: true,
        ..Default::default()
    };
    let summary = runner.run_cycle(&options).await.unwrap();

    assert_eq!(summary.exclusions_reversed, 1);

    // The reversed URL is queued for the next cycle and gets crawled then
    let state = DiscoveryStateStore::new(state_dir.path()).load("ffg");
    assert_eq!(state.unscraped_urls.len(), 1);
    assert!(state.unscraped_urls.contains(&excluded_url));

    let next = runner.run_cycle(&CycleOptions::default()).await.unwrap();
    assert_eq!(next.pages_fetched, 1);
}

#[tokio::test]
async fn test_recheck_covers_every_host_of_a_pinned_institution() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/foerderung/umwelt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PROGRAM_BODY))
        .mount(&server)
        .await;

    // The institution publishes on two hosts that resolve to the same mock
    // server; the exclusion to reverse sits on the second one
    let port = url::Url::parse(&server.uri()).unwrap().port().unwrap();
    let second_base = format!("http://localhost:{port}/");
    let excluded_url = format!("http://localhost:{port}/foerderung/umwelt");

    let state_dir = TempDir::new().unwrap();
    let mut institution = test_institution("ffg", &server.uri());
    institution.base_urls.push(second_base);
    let config = cycle_config(&state_dir, vec![institution]);

    let mut storage = SqliteStorage::new_in_memory().unwrap();
    storage
        .upsert_exclusion(&ExclusionEntry {
            url: excluded_url.clone(),
            host: "localhost".to_string(),
            reason: "no program signals".to_string(),
            confidence: 0.5,
            excluded_at: Utc::now(),
        })
        .unwrap();

    let runner = CycleRunner::new(config, storage).unwrap();
    let options = CycleOptions {
        institution: Some("ffg".to_string()),
        max_rechecks: Some(10),
        auto_remove: true,
        ..Default::default()
    };
    let summary = runner.run_cycle(&options).await.unwrap();

    assert_eq!(summary.exclusions_reversed, 1);
    let state = DiscoveryStateStore::new(state_dir.path()).load("ffg");
    assert!(state.unscraped_urls.contains(&excluded_url));
}

#[tokio::test]
async fn test_corrupt_state_file_does_not_abort_the_cycle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(seed_body(&server.uri())))
        .mount(&server)
        .await;
    mount_program_pages(
        &server,
        &["/foerderung/alpha", "/foerderung/beta", "/foerderung/gamma"],
    )
    .await;

    let state_dir = TempDir::new().unwrap();
    fs::write(state_dir.path().join("ffg.json"), b"{broken").unwrap();

    let config = cycle_config(&state_dir, vec![test_institution("ffg", &server.uri())]);
    let runner = CycleRunner::new(config, SqliteStorage::new_in_memory().unwrap()).unwrap();
    let summary = runner.run_cycle(&CycleOptions::default()).await.unwrap();

    // Started from an empty state and overwrote the corrupt file
    assert_eq!(summary.pages_fetched, 3);
    let state = DiscoveryStateStore::new(state_dir.path()).load("ffg");
    assert_eq!(state.seen.len(), 3);
}

#[tokio::test]
async fn test_institution_failures_do_not_stop_others() {
    let good = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(seed_body(&good.uri())))
        .mount(&good)
        .await;
    mount_program_pages(
        &good,
        &["/foerderung/alpha", "/foerderung/beta", "/foerderung/gamma"],
    )
    .await;

    let state_dir = TempDir::new().unwrap();
    // The bad institution points at a closed port; its seed fetch exhausts
    // retries and it contributes nothing
    let bad = test_institution("down", "http://127.0.0.1:9");
    let config = cycle_config(
        &state_dir,
        vec![bad, test_institution("ffg", &good.uri())],
    );

    let runner = CycleRunner::new(config, SqliteStorage::new_in_memory().unwrap()).unwrap();
    let options = CycleOptions {
        scope: fundcrawl::CycleScope::Full,
        ..Default::default()
    };
    let summary = runner.run_cycle(&options).await.unwrap();

    assert_eq!(summary.pages_fetched, 3);
    assert!(summary.per_institution.contains_key("down"));
    assert!(summary.per_institution.contains_key("ffg"));
}
