//! Integration tests: guard, single jobs, batches, outcomes, simulation, config lifecycle.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use janus_admission::AdmissionController;
use janus_api::guard::PAUSED_MESSAGE;
use janus_api::server::{self, AppState};
use janus_recorder::{BatchLedger, DecisionRecorder, InMemoryDecisionLog};
use janus_store::{ConfigCache, InMemoryAccountStore, InMemoryStateStore};
use janus_types::{AccountStore, AccountStoreError, ActiveConfig, DecisionLog, ServiceStatus};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

fn test_app() -> axum::Router {
    app_with_accounts(Arc::new(InMemoryAccountStore::new()))
}

fn app_with_accounts(accounts: Arc<dyn AccountStore + Send + Sync>) -> axum::Router {
    let decision_log: Arc<dyn DecisionLog + Send + Sync> = Arc::new(InMemoryDecisionLog::new());
    let ledger = Arc::new(BatchLedger::new());
    let recorder = Arc::new(DecisionRecorder::start(
        Arc::clone(&decision_log),
        Arc::clone(&ledger),
        1,
        64,
    ));
    let state = Arc::new(AppState {
        controller: Arc::new(AdmissionController::new(Arc::new(InMemoryStateStore::new()))),
        configs: Arc::new(ConfigCache::new(accounts)),
        recorder,
        decision_log,
        ledger,
    });
    server::router(state)
}

/// Three jobs per minute globally; `db` allows one job in flight.
fn policy() -> Value {
    json!({
        "version": 1,
        "global_execution_limit": { "max_jobs": 3, "window_ms": 60000, "min_priority": 2 },
        "dependencies": {
            "db": { "type": "database", "concurrent": { "max_inflight": 1 } }
        },
        "default_job_policy": {
            "idempotency_window_ms": 60000,
            "quarantine": {
                "failure_threshold": 2,
                "quarantine_duration_ms": 60000,
                "monitoring_window_ms": 60000
            }
        }
    })
}

fn job(id: &str) -> Value {
    json!({ "job_id": id, "tenant_id": "acme", "priority": 5 })
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("X-User-ID", user);
    }
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let j = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, j)
}

async fn activate(app: &axum::Router, user: &str, config: Value) {
    let (status, _) = send(
        app,
        "PUT",
        &format!("/users/{}/config", user),
        None,
        Some(json!({ "config_id": format!("{}-cfg", user), "config": config })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(
        app,
        "PUT",
        &format!("/users/{}/service", user),
        None,
        Some(json!({ "status": "running" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_is_open() {
    let app = test_app();
    let (status, j) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j["status"], "ok");
}

#[tokio::test]
async fn guard_rejects_missing_user_paused_service_and_missing_config() {
    let app = test_app();

    let (status, j) = send(&app, "POST", "/system/jobs", None, Some(job("a"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(j["error"].as_str().unwrap().contains("X-User-ID"));

    let (status, j) = send(&app, "POST", "/system/jobs", Some("ghost"), Some(job("a"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(j["error"], PAUSED_MESSAGE);

    let (status, _) = send(
        &app,
        "PUT",
        "/users/u1/service",
        None,
        Some(json!({ "status": "running" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, j) = send(&app, "POST", "/system/jobs", Some("u1"), Some(job("a"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(j["error"].as_str().unwrap().contains("No active config"));
}

struct UnavailableAccounts;

#[async_trait::async_trait]
impl AccountStore for UnavailableAccounts {
    async fn is_service_running(&self, _: &str) -> Result<bool, AccountStoreError> {
        Err(AccountStoreError::Unavailable("timed out".into()))
    }
    async fn service_status(&self, _: &str) -> Result<ServiceStatus, AccountStoreError> {
        Err(AccountStoreError::Unavailable("timed out".into()))
    }
    async fn set_service_status(&self, _: &str, _: ServiceStatus) -> Result<(), AccountStoreError> {
        Err(AccountStoreError::Unavailable("timed out".into()))
    }
    async fn active_config(&self, _: &str) -> Result<Option<ActiveConfig>, AccountStoreError> {
        Err(AccountStoreError::Unavailable("timed out".into()))
    }
    async fn activate_config(&self, _: &str, _: ActiveConfig) -> Result<(), AccountStoreError> {
        Err(AccountStoreError::Unavailable("timed out".into()))
    }
    async fn deactivate_config(&self, _: &str) -> Result<bool, AccountStoreError> {
        Err(AccountStoreError::Unavailable("timed out".into()))
    }
}

#[tokio::test]
async fn account_store_outage_is_internal_error() {
    let app = app_with_accounts(Arc::new(UnavailableAccounts));
    let (status, j) = send(&app, "POST", "/system/jobs", Some("u1"), Some(job("a"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(j["error"].as_str().unwrap().contains("account store unavailable"));
    let (status, _) = send(&app, "GET", "/users/u1/service", None, None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn single_jobs_accept_duplicate_and_rate_limit() {
    let app = test_app();
    activate(&app, "u1", policy()).await;

    let (status, d) = send(&app, "POST", "/system/jobs", Some("u1"), Some(job("j1"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(d["status"], "accepted");
    assert_eq!(d["reason"], "admitted");
    assert_eq!(d["batch_name"], "system_batch");
    assert_eq!(d["batch_id"], "11111111-1111-1111-1111-111111111111");
    assert_eq!(d["owner_id"], "u1");
    assert_eq!(d["config_id"], "u1-cfg");

    let (status, d) = send(&app, "POST", "/dashboard/jobs", Some("u1"), Some(job("j1"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(d["reason"], "duplicate_request");
    assert_eq!(d["batch_id"], "22222222-2222-2222-2222-222222222222");

    let low = json!({ "job_id": "low", "tenant_id": "acme", "priority": 1 });
    let (status, d) = send(&app, "POST", "/system/jobs", Some("u1"), Some(low)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(d["reason"], "priority_too_low");

    for id in ["j2", "j3"] {
        let (status, _) = send(&app, "POST", "/system/jobs", Some("u1"), Some(job(id))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
    let (status, d) = send(&app, "POST", "/system/jobs", Some("u1"), Some(job("j4"))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(d["reason"], "rate_limit_exceeded");

    let (_, stats) = send(&app, "GET", "/stats", None, None).await;
    assert_eq!(stats["total_requests"], 6);
    assert_eq!(stats["admitted_requests"], 3);
    assert_eq!(stats["rejection_reasons"]["rate_limit_exceeded"], 1);
    assert_eq!(stats["acceptance_rate"], 50.0);
}

#[tokio::test]
async fn invalid_job_is_bad_request() {
    let app = test_app();
    activate(&app, "u1", policy()).await;

    let bad = json!({ "job_id": "x", "tenant_id": "", "priority": 5 });
    let (status, j) = send(&app, "POST", "/system/jobs", Some("u1"), Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(j["error"].is_string());

    let (status, _) = send(&app, "POST", "/system/jobs", Some("u1"), Some(json!([1, 2]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn partial_batch_stops_at_first_invalid_job() {
    let app = test_app();
    activate(&app, "u1", policy()).await;

    let (status, _) = send(
        &app,
        "POST",
        "/system/jobs/batch",
        Some("u1"),
        Some(json!({ "jobs": [job("a")] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/system/jobs/batch",
        Some("u1"),
        Some(json!({ "batch_name": "empty", "jobs": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let too_many: Vec<Value> = (0..1001).map(|i| job(&format!("j{}", i))).collect();
    let (status, _) = send(
        &app,
        "POST",
        "/system/jobs/batch",
        Some("u1"),
        Some(json!({ "batch_name": "huge", "jobs": too_many })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let body = json!({
        "batch_name": "nightly",
        "jobs": [job("a"), { "job_id": "", "tenant_id": "acme", "priority": 5 }, job("c")]
    });
    let (status, r) = send(&app, "POST", "/dashboard/jobs/batch", Some("u1"), Some(body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(r["batch_name"], "nightly");
    assert!(r["batch_id"].as_str().unwrap().starts_with("dashboard_batch_"));
    assert_eq!(r["admitted"], 1);
    assert_eq!(r["rejected"], 2);
    assert_eq!(r["status"], "partial");
    assert_eq!(r["decisions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn atomic_batch_is_all_or_nothing() {
    let app = test_app();
    activate(&app, "u1", policy()).await;

    let invalid = json!({ "batch_name": "b", "jobs": [job("a"), { "tenant_id": "acme", "priority": 5 }] });
    let (status, _) = send(&app, "POST", "/system/jobs/batch/atomic", Some("u1"), Some(invalid)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let over = json!({ "batch_name": "b", "jobs": [job("a"), job("b"), job("c"), job("d")] });
    let (status, ds) = send(&app, "POST", "/system/jobs/batch/atomic", Some("u1"), Some(over)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let ds = ds.as_array().unwrap();
    assert_eq!(ds.len(), 4);
    assert!(ds.iter().all(|d| d["reason"] == "rate_limit_exceeded"));

    // Marks were cleared, so the same ids fit once the batch is small enough.
    let fits = json!({ "batch_name": "b", "jobs": [job("a"), job("b")] });
    let (status, ds) = send(&app, "POST", "/system/jobs/batch/atomic", Some("u1"), Some(fits)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let ds = ds.as_array().unwrap();
    assert!(ds.iter().all(|d| d["status"] == "accepted"));
    assert_eq!(ds[0]["batch_id"], ds[1]["batch_id"]);

    let dup = json!({ "batch_name": "b", "jobs": [job("c"), job("a")] });
    let (status, ds) = send(&app, "POST", "/system/jobs/batch/atomic", Some("u1"), Some(dup)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(ds[0]["reason"], "batch_rejected");
    assert_eq!(ds[1]["reason"], "duplicate_request");
}

#[tokio::test]
async fn oversized_dependency_cost_is_bad_request() {
    let app = test_app();
    let mut p = policy();
    p["dependencies"]["api"] = json!({
        "type": "external_api", "rate_limit": { "max_requests": 10, "window_ms": 60000 }
    });
    activate(&app, "u1", p).await;

    let mut heavy = job("a");
    heavy["dependencies"] = json!({ "api": i64::MAX });
    let mut twin = heavy.clone();
    twin["job_id"] = json!("b");
    let body = json!({ "batch_name": "b", "jobs": [heavy, twin] });
    let (status, j) = send(&app, "POST", "/system/jobs/batch/atomic", Some("u1"), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(j["error"].as_str().unwrap().contains("api"));

    // Nothing was charged.
    let mut light = job("c");
    light["dependencies"] = json!({ "api": 10 });
    let (status, _) = send(&app, "POST", "/system/jobs", Some("u1"), Some(light)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn outcomes_release_slots_and_quarantine() {
    let app = test_app();
    let mut p = policy();
    p["global_execution_limit"]["max_jobs"] = json!(100);
    activate(&app, "u1", p).await;

    let with_db = |id: &str| json!({ "job_id": id, "tenant_id": "acme", "priority": 5, "dependencies": { "db": 1 } });

    let (status, _) = send(&app, "POST", "/system/jobs", Some("u1"), Some(with_db("a"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = send(&app, "POST", "/system/jobs", Some("u1"), Some(with_db("b"))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, r) = send(
        &app,
        "POST",
        "/outcomes",
        Some("u1"),
        Some(json!({ "job_id": "a", "status": "SUCCESS" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(r["released"], 1);
    assert_eq!(r["quarantined"], false);

    let (status, _) = send(&app, "POST", "/system/jobs", Some("u1"), Some(with_db("b"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // Two failures inside the window quarantine the job.
    for expect_quarantine in [false, true] {
        let (_, r) = send(
            &app,
            "POST",
            "/outcomes",
            Some("u1"),
            Some(json!({ "job_id": "b", "status": "FAILURE" })),
        )
        .await;
        assert_eq!(r["quarantined"], expect_quarantine);
        if !expect_quarantine {
            let (status, _) = send(&app, "POST", "/system/jobs", Some("u1"), Some(with_db("b"))).await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }
    }
    let (status, d) = send(&app, "POST", "/system/jobs", Some("u1"), Some(with_db("b"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(d["reason"], "quarantined");

    let (status, _) = send(
        &app,
        "POST",
        "/outcomes",
        Some("u1"),
        Some(json!({ "job_id": "never-seen", "status": "SUCCESS" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn simulate_previews_without_consuming() {
    let app = test_app();
    activate(&app, "u1", policy()).await;

    let (status, r) = send(
        &app,
        "POST",
        "/simulate",
        Some("u1"),
        Some(json!({ "tenant_id": "acme", "priority": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(r["job_id"].as_str().unwrap().starts_with("sim_"));
    assert_eq!(r["admitted"], true);
    assert_eq!(r["reason"], "admitted");
    assert_eq!(r["steps"].as_array().unwrap().len(), 4);

    for _ in 0..5 {
        let (_, r) = send(&app, "POST", "/simulate", Some("u1"), Some(job("same"))).await;
        assert_eq!(r["admitted"], true);
    }
    let (_, stats) = send(&app, "GET", "/stats", None, None).await;
    assert_eq!(stats["total_requests"], 0);
}

#[tokio::test]
async fn config_lifecycle_resets_quota() {
    let app = test_app();

    let (status, _) = send(
        &app,
        "PUT",
        "/users/u1/config",
        None,
        Some(json!({ "config": { "version": 2 } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, "GET", "/users/u1/config", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    activate(&app, "u1", policy()).await;
    let (status, cfg) = send(&app, "GET", "/users/u1/config", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cfg["config_id"], "u1-cfg");
    assert_eq!(cfg["config"]["global_execution_limit"]["max_jobs"], 3);

    for id in ["a", "b", "c"] {
        send(&app, "POST", "/system/jobs", Some("u1"), Some(job(id))).await;
    }
    let (status, _) = send(&app, "POST", "/system/jobs", Some("u1"), Some(job("d"))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Re-activation flushes the owner's buckets and marks.
    let (status, cfg) = send(
        &app,
        "PUT",
        "/users/u1/config",
        None,
        Some(json!({ "config": policy() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!cfg["config_id"].as_str().unwrap().is_empty());
    let (status, d) = send(&app, "POST", "/system/jobs", Some("u1"), Some(job("a"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(d["config_id"], cfg["config_id"]);

    let (status, _) = send(&app, "DELETE", "/users/u1/config", None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "DELETE", "/users/u1/config", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "POST", "/system/jobs", Some("u1"), Some(job("z"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn config_reset_spares_users_whose_id_extends_another() {
    let app = test_app();
    activate(&app, "u1", policy()).await;
    activate(&app, "u1:x", policy()).await;

    for id in ["a", "b", "c"] {
        let (status, _) = send(&app, "POST", "/system/jobs", Some("u1:x"), Some(job(id))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
    let (status, _) = send(&app, "PUT", "/users/u1/config", None, Some(json!({ "config": policy() }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, d) = send(&app, "POST", "/system/jobs", Some("u1:x"), Some(job("a"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(d["reason"], "duplicate_request");
    let (status, _) = send(&app, "POST", "/system/jobs", Some("u1:x"), Some(job("d"))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn service_switch_round_trips() {
    let app = test_app();
    let (_, s) = send(&app, "GET", "/users/u9/service", None, None).await;
    assert_eq!(s["status"], "paused");
    send(&app, "PUT", "/users/u9/service", None, Some(json!({ "status": "running" }))).await;
    let (_, s) = send(&app, "GET", "/users/u9/service", None, None).await;
    assert_eq!(s["status"], "running");
    let (status, _) = send(&app, "PUT", "/users/u9/service", None, Some(json!({ "status": "off" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn decisions_feed_and_batch_rollup_fill_in_asynchronously() {
    let app = test_app();
    activate(&app, "u1", policy()).await;
    activate(&app, "u2", policy()).await;

    let body = json!({ "batch_name": "nightly", "jobs": [job("a"), job("b"), job("c"), job("d")] });
    let (_, r) = send(&app, "POST", "/system/jobs/batch", Some("u1"), Some(body)).await;
    assert_eq!(r["status"], "partial");
    let batch_id = r["batch_id"].as_str().unwrap().to_string();
    send(&app, "POST", "/system/jobs", Some("u2"), Some(job("other"))).await;

    let mut summary = Value::Null;
    for _ in 0..50 {
        let (status, j) = send(&app, "GET", &format!("/batches/{}", batch_id), None, None).await;
        if status == StatusCode::OK && j["total_jobs"] == 4 {
            summary = j;
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
    }
    assert_eq!(summary["batch_name"], "nightly");
    assert_eq!(summary["owner_id"], "u1");
    assert_eq!(summary["admitted_jobs"], 3);

    let (_, page) = send(&app, "GET", "/decisions?owner=u1&page=1&page_size=3", None, None).await;
    assert_eq!(page["total_items"], 4);
    assert_eq!(page["total_pages"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 3);
    assert_eq!(page["items"][0]["job_id"], "d");

    let (_, page) = send(&app, "GET", "/decisions?owner=u1&status=rejected", None, None).await;
    assert_eq!(page["total_items"], 1);
    assert_eq!(page["page_size"], 7);

    let (status, _) = send(&app, "GET", "/decisions?status=maybe", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, page) = send(&app, "GET", "/decisions?owner=u1&since=2000-01-01T00:00:00Z", None, None).await;
    assert_eq!(page["total_items"], 4);
    let (_, page) = send(&app, "GET", "/decisions?owner=u1&since=2999-01-01T00:00:00Z", None, None).await;
    assert_eq!(page["total_items"], 0);
    let (status, _) = send(&app, "GET", "/decisions?since=yesterday", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, batches) = send(&app, "GET", "/users/u1/batches", None, None).await;
    assert_eq!(batches.as_array().unwrap().len(), 1);

    let (status, assoc) = send(&app, "GET", "/users/u1/config/association", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(assoc["total_jobs"], 4);
    assert_eq!(assoc["succeeded_jobs"], 3);
    assert_eq!(assoc["no_of_batches"], 1);

    let (status, j) = send(&app, "GET", "/batches/missing", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(j["error"].is_string());
}
