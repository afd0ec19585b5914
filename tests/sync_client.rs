//! Vendor sync and login against an in-process mock of the GP51 API

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use fleet_backup_server::constants::LOCK_DEVICE_LIST_SYNC;
use fleet_backup_server::db::{FleetStore, MemoryStore};
use fleet_backup_server::gp51::{Authenticator, RetryPolicy, SyncService, VendorClient};
use fleet_backup_server::lock::LockRegistry;
use fleet_backup_server::models::{RecordIssue, VendorSession};
use fleet_backup_server::rate_limiter::RateLimiter;

const TOKEN: &str = "tok-1";
// md5("secret")
const SECRET_DIGEST: &str = "5ebe2294ecd0e0f08eab7690d2a6ee69";

// =============================================================================
// Mock vendor
// =============================================================================

#[derive(Default)]
struct MockVendor {
    calls: AtomicUsize,
    /// Requests still to be answered with status -1
    transient_failures: AtomicUsize,
    fail_positions: AtomicBool,
    empty_roster: AtomicBool,
}

async fn vendor(
    State(mock): State<Arc<MockVendor>>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    mock.calls.fetch_add(1, Ordering::SeqCst);

    if mock
        .transient_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return Json(json!({ "status": -1, "cause": "server busy" }));
    }

    let authorised = query.get("token").map(String::as_str) == Some(TOKEN);
    let reply = match query.get("action").map(String::as_str) {
        Some("login") => {
            if body["password"] == SECRET_DIGEST && body["from"] == "WEB" && body["type"] == "USER" {
                json!({ "status": 0, "token": TOKEN })
            } else {
                json!({ "status": 1, "cause": "wrong password" })
            }
        }
        Some(_) if !authorised => json!({ "status": 9903, "cause": "token invalid" }),
        Some("querymonitorlist") if mock.empty_roster.load(Ordering::SeqCst) => {
            json!({ "status": 0, "groups": [] })
        }
        Some("querymonitorlist") => json!({
            "status": 0,
            "groups": [
                { "groupid": 1, "devices": [
                    { "deviceid": "d1", "devicename": "Truck 1" },
                    { "deviceid": 2, "devicename": "Van 2" }
                ]},
                { "groupid": 2, "devices": [
                    { "deviceid": "d3", "devicename": "Bus 3" },
                    { "devicename": "no id" }
                ]}
            ]
        }),
        Some("lastposition") if mock.fail_positions.load(Ordering::SeqCst) => {
            json!({ "status": 2, "cause": "position service down" })
        }
        Some("lastposition") => json!({
            "status": 0,
            "records": [
                { "deviceid": "d1", "callat": "22.5", "callon": 114.1, "speed": 40 },
                { "deviceid": "x", "speed": "fast" }
            ]
        }),
        _ => json!({ "status": 1, "cause": "unknown action" }),
    };
    Json(reply)
}

/// Serve the mock on an ephemeral port and return its base URL
async fn spawn_vendor(mock: Arc<MockVendor>) -> String {
    let app = Router::new().route("/webapi", post(vendor)).with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/webapi", addr)
}

// =============================================================================
// Test Helpers
// =============================================================================

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(1),
    }
}

async fn client_for(mock: &Arc<MockVendor>) -> VendorClient {
    let url = spawn_vendor(mock.clone()).await;
    VendorClient::new(url, fast_retry()).unwrap()
}

async fn store_with_session() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    store
        .save_session(&VendorSession {
            username: "fleet".to_string(),
            token: TOKEN.to_string(),
            expires_at: now + chrono::Duration::hours(1),
            created_at: now,
        })
        .await
        .unwrap();
    store
}

async fn sync_service(mock: &Arc<MockVendor>, store: Arc<MemoryStore>) -> SyncService {
    SyncService::new(client_for(mock).await, store, Arc::new(LockRegistry::new()))
}

// =============================================================================
// Retry wrapper
// =============================================================================

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let mock = Arc::new(MockVendor::default());
    mock.transient_failures.store(2, Ordering::SeqCst);
    let client = client_for(&mock).await;

    let response = client
        .call("login", None, &json!({ "username": "fleet", "password": SECRET_DIGEST, "from": "WEB", "type": "USER" }))
        .await
        .unwrap();

    assert_eq!(response["token"], TOKEN);
    assert_eq!(mock.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retries_report_last_error() {
    let mock = Arc::new(MockVendor::default());
    mock.transient_failures.store(10, Ordering::SeqCst);
    let client = client_for(&mock).await;

    let err = client.call("querymonitorlist", Some(TOKEN), &json!({})).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("after 3 attempts"), "{}", message);
    assert!(message.contains("server busy"), "{}", message);
    assert_eq!(mock.calls.load(Ordering::SeqCst), 3);
}

// =============================================================================
// Login
// =============================================================================

#[tokio::test]
async fn test_login_stores_session_and_resets_limiter() {
    let mock = Arc::new(MockVendor::default());
    let store = Arc::new(MemoryStore::new());
    let limiter = Arc::new(RateLimiter::new(5, 60_000));
    let auth = Authenticator::new(
        client_for(&mock).await,
        store.clone(),
        limiter.clone(),
        chrono::Duration::hours(24),
    );

    let result = auth.authenticate("fleet", "secret").await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.remaining_attempts, Some(5));
    let session = store.latest_valid_session(Utc::now()).await.unwrap().unwrap();
    assert_eq!(session.token, TOKEN);
    assert_eq!(Some(session.expires_at), result.token_expires_at);
    assert!(limiter.tracking("fleet").is_none());
}

#[tokio::test]
async fn test_wrong_password_counts_against_limit() {
    let mock = Arc::new(MockVendor::default());
    let store = Arc::new(MemoryStore::new());
    let limiter = Arc::new(RateLimiter::new(2, 60_000));
    let auth = Authenticator::new(
        client_for(&mock).await,
        store.clone(),
        limiter.clone(),
        chrono::Duration::hours(24),
    );

    let first = auth.authenticate("fleet", "guess").await;
    assert!(!first.success);
    assert_eq!(first.remaining_attempts, Some(1));
    assert!(first.error.unwrap().contains("wrong password"));

    let second = auth.authenticate("fleet", "guess").await;
    assert_eq!(second.remaining_attempts, Some(0));

    // locked out now, even with the right password
    let calls_before = mock.calls.load(Ordering::SeqCst);
    let third = auth.authenticate("fleet", "secret").await;
    assert!(third.is_rate_limited());
    assert_eq!(mock.calls.load(Ordering::SeqCst), calls_before);

    let stats = limiter.stats();
    assert_eq!(stats.recent_failures, 2);
    assert_eq!(stats.locked_identifiers, 1);
    assert!(store.latest_valid_session(Utc::now()).await.unwrap().is_none());
}

// =============================================================================
// Sync
// =============================================================================

#[tokio::test]
async fn test_full_sync_tolerates_record_failures() {
    let mock = Arc::new(MockVendor::default());
    let store = store_with_session().await;
    store.reject_device("d3").await;
    let sync = sync_service(&mock, store.clone()).await;

    let report = sync.perform_full_sync().await;

    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.devices_fetched, 3);
    assert_eq!(report.positions_fetched, 1);

    let stats = report.stats.unwrap();
    assert_eq!(stats.devices_processed, 3);
    assert_eq!(stats.devices_updated, 2);
    assert_eq!(stats.devices_failed, 1);
    assert_eq!(stats.positions_matched, 1);
    assert!(matches!(
        &stats.errors[..],
        [RecordIssue::Upsert { device_id, .. }] if device_id == "d3"
    ));

    let rows = store.rows("vehicles").await.unwrap();
    let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "d1"]);
    let truck = &rows[1].data;
    assert_eq!(truck["device_name"], "Truck 1");
    assert_eq!(truck["data"]["position"]["callat"], 22.5);
    assert_eq!(rows[0].data["data"]["position"], json!({}));
}

#[tokio::test]
async fn test_position_failure_still_syncs_devices() {
    let mock = Arc::new(MockVendor::default());
    mock.fail_positions.store(true, Ordering::SeqCst);
    let store = store_with_session().await;
    let sync = sync_service(&mock, store.clone()).await;

    let report = sync.perform_full_sync().await;

    assert!(report.success);
    assert_eq!(report.positions_fetched, 0);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("position service down"));
    assert_eq!(report.stats.unwrap().devices_updated, 3);
}

#[tokio::test]
async fn test_empty_roster_aborts_sync() {
    let mock = Arc::new(MockVendor::default());
    mock.empty_roster.store(true, Ordering::SeqCst);
    let store = store_with_session().await;
    let sync = sync_service(&mock, store.clone()).await;

    let report = sync.perform_full_sync().await;

    assert!(!report.success);
    assert_eq!(report.error.as_deref(), Some("Vendor returned no devices"));
    assert!(report.stats.is_none());
    assert!(store.rows("vehicles").await.is_err());
}

#[tokio::test]
async fn test_held_lock_skips_without_calling_vendor() {
    let mock = Arc::new(MockVendor::default());
    let store = store_with_session().await;
    let sync = sync_service(&mock, store).await;

    assert!(sync.locks().acquire(LOCK_DEVICE_LIST_SYNC));
    let report = sync.perform_full_sync().await;

    assert!(report.is_skipped());
    assert_eq!(report.skipped_by.as_deref(), Some(LOCK_DEVICE_LIST_SYNC));
    assert_eq!(mock.calls.load(Ordering::SeqCst), 0);

    sync.locks().release(LOCK_DEVICE_LIST_SYNC);
    assert!(sync.perform_full_sync().await.success);
}

#[tokio::test]
async fn test_concurrent_syncs_never_overlap() {
    let mock = Arc::new(MockVendor::default());
    let store = store_with_session().await;
    let sync = sync_service(&mock, store).await;

    let (a, b) = tokio::join!(sync.fetch_device_list(), sync.fetch_device_list());
    // Both may run back to back, but a skip must leave the other call intact
    let ran: Vec<_> = [a, b].into_iter().filter_map(|r| r.ran()).collect();
    assert!(!ran.is_empty());
    for result in ran {
        assert_eq!(result.unwrap().len(), 3);
    }
}
