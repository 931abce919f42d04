//! End-to-end export cycle tests
//!
//! A `wiremock` server plays both the PostHog API and the webhook. The
//! watermark lives in a `MemoryWatermarkStore` so the test can inspect it
//! while the session is alive.

mod common;

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{export_config, page, signup_event, START};
use gclid_export::commands::build_session;
use gclid_export::conversion::parse_timestamp;
use gclid_export::error::ExportError;
use gclid_export::storage::{MemoryWatermarkStore, WatermarkStore};

fn start_store() -> Arc<MemoryWatermarkStore> {
    Arc::new(MemoryWatermarkStore::with_value(START))
}

fn record(gclid: &str) -> serde_json::Value {
    json!({
        "action_id": 12,
        "gclid": gclid,
        "conversion_name": "Signup",
        "timestamp": "2021-11-09T21:58:36+0000"
    })
}

#[tokio::test]
async fn test_two_pages_are_delivered_together_and_watermark_advances() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let next = format!("{}/api/event/next?cursor=2", server.uri());

    Mock::given(method("GET"))
        .and(path("/api/event"))
        .and(query_param("action_id", "12"))
        .and(query_param("after", START))
        .and(header("authorization", "Bearer phx_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![signup_event("v1", json!({"gclid": "g-1"}))],
            Some(next),
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/event/next"))
        .and(query_param("cursor", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![signup_event("v2", json!({"$set": {"$initial_gclid": "g-2"}}))],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_json(json!([record("g-1"), record("g-2")])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = start_store();
    let config = export_config(&server.uri(), &dir);
    let mut session = build_session(&config, store.clone()).await.unwrap();

    let report = session.run_cycle().await.unwrap();
    assert_eq!(report.events_fetched, 2);
    assert_eq!(report.delivered, 2);
    assert!(report.advanced());

    let stored = store.get().unwrap().unwrap();
    assert!(parse_timestamp(&stored).unwrap() > parse_timestamp(START).unwrap());
}

#[tokio::test]
async fn test_second_page_failure_holds_watermark() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let next = format!("{}/api/event/next?cursor=2", server.uri());

    Mock::given(method("GET"))
        .and(path("/api/event"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![signup_event("v1", json!({"gclid": "g-1"}))],
            Some(next),
        )))
        .expect(1)
        .mount(&server)
        .await;

    // One attempt plus three retries
    Mock::given(method("GET"))
        .and(path("/api/event/next"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream timeout"))
        .expect(4)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = start_store();
    let config = export_config(&server.uri(), &dir);
    let mut session = build_session(&config, store.clone()).await.unwrap();

    let report = session.run_cycle().await.unwrap();
    assert_eq!(report.failed, vec![12]);
    assert_eq!(report.delivered, 0);
    assert!(!report.advanced());
    assert_eq!(store.get().unwrap().as_deref(), Some(START));
}

#[tokio::test]
async fn test_rerun_after_failed_cycle_refetches_from_same_watermark() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // Missing `next` makes the page malformed
    Mock::given(method("GET"))
        .and(path("/api/event"))
        .and(query_param("after", START))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .up_to_n_times(4)
        .expect(4)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/event"))
        .and(query_param("after", START))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![signup_event("v1", json!({"gclid": "g-1"}))],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_json(json!([record("g-1")])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = start_store();
    let config = export_config(&server.uri(), &dir);
    let mut session = build_session(&config, store.clone()).await.unwrap();

    let first = session.run_cycle().await.unwrap();
    assert_eq!(first.failed, vec![12]);
    assert_eq!(store.get().unwrap().as_deref(), Some(START));

    let second = session.run_cycle().await.unwrap();
    assert!(second.failed.is_empty());
    assert_eq!(second.delivered, 1);
    assert!(second.advanced());
}

#[tokio::test]
async fn test_person_lookup_supplies_missing_gclid() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/event"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![signup_event("v1", json!({"plan": "pro"}))],
            None,
        )))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/person"))
        .and(query_param("distinct_id", "v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"distinct_ids": ["v1"], "properties": {"$initial_gclid": "g-person"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_json(json!([record("g-person")])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = export_config(&server.uri(), &dir);
    let mut session = build_session(&config, start_store()).await.unwrap();

    let report = session.run_cycle().await.unwrap();
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn test_person_lookup_failure_drops_event_without_failing_cycle() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/event"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![signup_event("v1", json!({}))],
            None,
        )))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/person"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let store = start_store();
    let config = export_config(&server.uri(), &dir);
    let mut session = build_session(&config, store.clone()).await.unwrap();

    let report = session.run_cycle().await.unwrap();
    assert_eq!(report.events_fetched, 1);
    assert_eq!(report.delivered, 0);
    assert!(report.advanced());
}

#[tokio::test]
async fn test_webhook_failure_fails_cycle_and_holds_watermark() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/event"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![signup_event("v1", json!({"gclid": "g-1"}))],
            None,
        )))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let store = start_store();
    let config = export_config(&server.uri(), &dir);
    let mut session = build_session(&config, store.clone()).await.unwrap();

    let err = session.run_cycle().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ExportError>(),
        Some(ExportError::Delivery(_))
    ));
    assert!(session.is_idle());
    assert_eq!(store.get().unwrap().as_deref(), Some(START));
}

#[tokio::test]
async fn test_definitions_fetched_from_actions_api() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/projects/@current/actions/12/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 12,
            "name": "Signed up via docs",
            "steps": [{
                "event": "signed_up",
                "url": "/docs",
                "url_matching": "contains",
                "properties": [{"key": "plan", "operator": "exact", "type": "event", "value": "pro"}]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/event"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![
                signup_event(
                    "v1",
                    json!({"gclid": "g-1", "plan": "pro", "$current_url": "https://x.io/docs/a"}),
                ),
                signup_event(
                    "v2",
                    json!({"gclid": "g-2", "plan": "free", "$current_url": "https://x.io/docs/b"}),
                ),
            ],
            None,
        )))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_json(json!([record("g-1")])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = export_config(&server.uri(), &dir);
    config.export.definitions_file = None;
    let mut session = build_session(&config, start_store()).await.unwrap();

    let report = session.run_cycle().await.unwrap();
    assert_eq!(report.events_fetched, 2);
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn test_person_scoped_filter_fails_cycle() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/projects/@current/actions/12/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 12,
            "steps": [{
                "event": "signed_up",
                "properties": [{"key": "email", "operator": "is_set", "type": "person"}]
            }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/event"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![signup_event("v1", json!({"gclid": "g-1"}))],
            None,
        )))
        .mount(&server)
        .await;

    let store = start_store();
    let mut config = export_config(&server.uri(), &dir);
    config.export.definitions_file = None;
    let mut session = build_session(&config, store.clone()).await.unwrap();

    let err = session.run_cycle().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ExportError>(),
        Some(ExportError::UnsupportedFilterType(_))
    ));
    assert_eq!(store.get().unwrap().as_deref(), Some(START));
}

#[tokio::test]
async fn test_missing_action_definition_is_fatal_at_setup() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/projects/@current/actions/12/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut config = export_config(&server.uri(), &dir);
    config.export.definitions_file = None;
    let err = build_session(&config, start_store()).await.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<ExportError>(),
        Some(ExportError::Definition(_))
    ));
}
