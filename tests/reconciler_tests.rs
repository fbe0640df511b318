use std::sync::Arc;
use std::time::Duration;

use contentos_sync::backend::BackendClient;
use contentos_sync::config::{AppConfig, BackendConfig, ReconcilerConfig};
use contentos_sync::engine::Engine;
use contentos_sync::jobs::JobMetadata;
use contentos_sync::notify::{MemorySink, NotificationKind};
use contentos_sync::providers::Provider;
use contentos_sync::records::{ListReconciler, Platform, Record, RecordStatus};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn reconciler_for(server: &MockServer) -> (ListReconciler, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let config = BackendConfig {
        base_url: server.uri(),
        auth_token: None,
        request_timeout_ms: 2_000,
    };
    let backend = Arc::new(BackendClient::new(&config).expect("backend client"));
    let reconciler = ListReconciler::new(
        backend,
        sink.clone(),
        ReconcilerConfig {
            interval_seconds: 900,
            jitter_pct_max: 0.0,
        },
    );
    (reconciler, sink)
}

fn record_json(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "workspaceId": "ws-1",
        "status": status,
        "content": "hello world",
        "platforms": ["twitter"],
        "createdAt": "2026-01-01T00:00:00Z",
        "updatedAt": "2026-01-01T00:00:00Z"
    })
}

async fn mount_connection_status(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/connection-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workspaceId": "ws-1",
            "platforms": [{"platform": "twitter", "connected": true, "username": "contentos"}]
        })))
        .mount(server)
        .await;
}

async fn mount_record_list(server: &MockServer, records: Vec<serde_json::Value>, times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path("/records"))
        .and(query_param("workspaceId", "ws-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::Value::Array(records)));
    match times {
        Some(n) => mock.up_to_n_times(n).mount(server).await,
        None => mock.mount(server).await,
    }
}

fn cached_ids(reconciler: &ListReconciler) -> Vec<String> {
    reconciler.records().into_iter().map(|r| r.id).collect()
}

#[tokio::test]
async fn load_is_idempotent_until_forced() {
    let server = MockServer::start().await;
    mount_connection_status(&server).await;
    Mock::given(method("GET"))
        .and(path("/records"))
        .and(query_param("workspaceId", "ws-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::Value::Array(vec![record_json("p1", "draft")])),
        )
        .expect(2)
        .mount(&server)
        .await;

    let (reconciler, _sink) = reconciler_for(&server);
    reconciler.load("ws-1", false).await.unwrap();
    // Warm cache: no second fetch.
    reconciler.load("ws-1", false).await.unwrap();
    assert_eq!(cached_ids(&reconciler), vec!["p1"]);
    assert!(reconciler.is_loaded());

    // Forcing bypasses the guard.
    reconciler.load("ws-1", true).await.unwrap();
}

#[tokio::test]
async fn load_exposes_the_connection_summary() {
    let server = MockServer::start().await;
    mount_connection_status(&server).await;
    mount_record_list(&server, vec![], None).await;

    let (reconciler, _sink) = reconciler_for(&server);
    reconciler.load("ws-1", false).await.unwrap();

    let summary = reconciler.connection_status().expect("summary cached");
    assert_eq!(summary.workspace_id, "ws-1");
    assert!(summary.platforms[0].connected);
}

#[tokio::test]
async fn failed_create_rolls_back_the_optimistic_entry() {
    let server = MockServer::start().await;
    mount_connection_status(&server).await;
    mount_record_list(&server, vec![record_json("p1", "draft")], None).await;
    Mock::given(method("POST"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (reconciler, sink) = reconciler_for(&server);
    reconciler.load("ws-1", false).await.unwrap();
    let before = cached_ids(&reconciler);

    reconciler
        .add_record(Record::draft("ws-1", "new post", vec![Platform::Twitter]))
        .await;

    assert_eq!(cached_ids(&reconciler), before, "cache restored");
    assert!(
        sink.snapshot()
            .iter()
            .any(|n| n.kind == NotificationKind::Error && n.title == "Post creation failed")
    );
}

#[tokio::test]
async fn successful_create_keeps_the_server_echo() {
    let server = MockServer::start().await;
    mount_connection_status(&server).await;
    mount_record_list(&server, vec![record_json("p1", "draft")], None).await;
    Mock::given(method("POST"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(201).set_body_json(record_json("srv-9", "draft")))
        .mount(&server)
        .await;

    let (reconciler, sink) = reconciler_for(&server);
    reconciler.load("ws-1", false).await.unwrap();

    reconciler
        .add_record(Record::draft("ws-1", "new post", vec![Platform::Twitter]))
        .await;

    // Optimistic prepend, then replaced by the backend's canonical row.
    assert_eq!(cached_ids(&reconciler), vec!["srv-9", "p1"]);
    assert!(sink.snapshot().is_empty(), "success is silent");
}

#[tokio::test]
async fn update_and_delete_failures_do_not_roll_back() {
    let server = MockServer::start().await;
    mount_connection_status(&server).await;
    mount_record_list(&server, vec![record_json("p1", "draft")], None).await;
    Mock::given(method("PATCH"))
        .and(path("/records/p1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/records/p1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (reconciler, sink) = reconciler_for(&server);
    reconciler.load("ws-1", false).await.unwrap();

    let mut edited = reconciler.records().remove(0);
    edited.content = "edited content".to_string();
    reconciler.update_record(edited).await;

    // The optimistic edit survives the failed update.
    assert_eq!(reconciler.records()[0].content, "edited content");
    assert!(
        sink.snapshot()
            .iter()
            .any(|n| n.title == "Post update failed")
    );

    reconciler.delete_record("p1").await;
    // The optimistic removal also survives.
    assert!(reconciler.records().is_empty());
    assert!(
        sink.snapshot()
            .iter()
            .any(|n| n.title == "Post deletion failed")
    );
}

#[tokio::test]
async fn batched_creates_tolerate_partial_failure() {
    let server = MockServer::start().await;
    mount_connection_status(&server).await;
    mount_record_list(&server, vec![], None).await;
    // The "beta" post is the one the backend rejects.
    Mock::given(method("POST"))
        .and(path("/records"))
        .and(body_string_contains("beta"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/records"))
        .respond_with(ResponseTemplate::new(201).set_body_json(record_json("srv-ok", "draft")))
        .mount(&server)
        .await;

    let (reconciler, sink) = reconciler_for(&server);
    reconciler.load("ws-1", false).await.unwrap();

    let batch = vec![
        Record::draft("ws-1", "alpha post", vec![Platform::Twitter]),
        Record::draft("ws-1", "beta post", vec![Platform::Twitter]),
        Record::draft("ws-1", "gamma post", vec![Platform::Twitter]),
    ];
    reconciler.add_records(batch).await;

    assert_eq!(reconciler.records().len(), 2, "failed entry rolled back");
    let warning = sink
        .snapshot()
        .into_iter()
        .find(|n| n.kind == NotificationKind::Warning)
        .expect("aggregate warning");
    assert!(warning.message.contains("2 of 3"));
}

#[tokio::test]
async fn disappearing_scheduled_record_notifies_published_once() {
    let server = MockServer::start().await;
    mount_connection_status(&server).await;
    // First list backs the initial load; every later refresh is empty.
    mount_record_list(&server, vec![record_json("p1", "scheduled")], Some(1)).await;
    mount_record_list(&server, vec![], None).await;

    let (reconciler, sink) = reconciler_for(&server);
    reconciler.load("ws-1", false).await.unwrap();

    reconciler.reconcile().await.unwrap();
    reconciler.reconcile().await.unwrap();

    let published: Vec<_> = sink
        .snapshot()
        .into_iter()
        .filter(|n| n.title == "Post published" && n.related_id.as_deref() == Some("p1"))
        .collect();
    assert_eq!(published.len(), 1, "published fires exactly once");
    assert!(reconciler.records().is_empty(), "cache replaced by fresh list");
}

#[tokio::test]
async fn failed_scheduled_record_carries_the_backend_detail() {
    let server = MockServer::start().await;
    mount_connection_status(&server).await;
    mount_record_list(&server, vec![record_json("p1", "scheduled")], Some(1)).await;
    let mut failed = record_json("p1", "failed");
    failed["error"] = json!("rate limited by platform");
    mount_record_list(&server, vec![failed], None).await;

    let (reconciler, sink) = reconciler_for(&server);
    reconciler.load("ws-1", false).await.unwrap();

    reconciler.reconcile().await.unwrap();
    reconciler.reconcile().await.unwrap();

    let failures: Vec<_> = sink
        .snapshot()
        .into_iter()
        .filter(|n| n.title == "Scheduled post failed")
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].message, "rate limited by platform");
    assert_eq!(reconciler.records()[0].status, RecordStatus::Failed);
}

#[tokio::test]
async fn notified_ids_stay_silent_when_the_record_reappears() {
    let server = MockServer::start().await;
    mount_connection_status(&server).await;
    mount_record_list(&server, vec![record_json("p1", "scheduled")], Some(1)).await; // load
    mount_record_list(&server, vec![], Some(1)).await; // pass 1: disappeared
    mount_record_list(&server, vec![record_json("p1", "scheduled")], Some(1)).await; // pass 2: reappears
    mount_record_list(&server, vec![], None).await; // pass 3: disappears again

    let (reconciler, sink) = reconciler_for(&server);
    reconciler.load("ws-1", false).await.unwrap();
    for _ in 0..3 {
        reconciler.reconcile().await.unwrap();
    }

    let published: Vec<_> = sink
        .snapshot()
        .into_iter()
        .filter(|n| n.title == "Post published")
        .collect();
    assert_eq!(published.len(), 1, "a reappearing id must not re-alert");
}

#[tokio::test]
async fn publish_partial_success_deletes_locally_and_reports_both_sides() {
    let server = MockServer::start().await;
    mount_connection_status(&server).await;
    mount_record_list(&server, vec![record_json("p1", "scheduled")], Some(1)).await;
    mount_record_list(&server, vec![], None).await; // post-publish force reload
    Mock::given(method("POST"))
        .and(path("/records/p1/publish"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "perPlatformResults": [
                {"platform": "twitter", "success": true},
                {"platform": "facebook", "success": false, "error": "expired token"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (reconciler, sink) = reconciler_for(&server);
    reconciler.load("ws-1", false).await.unwrap();
    let record = reconciler.records().remove(0);

    reconciler.publish(&record).await;

    assert!(reconciler.records().is_empty(), "record deleted locally");
    let notifications = sink.snapshot();
    let success = notifications
        .iter()
        .find(|n| n.kind == NotificationKind::Success)
        .expect("success notification");
    assert!(success.message.contains("1/2"));
    let per_platform = notifications
        .iter()
        .find(|n| n.kind == NotificationKind::Warning)
        .expect("per-platform failure detail");
    assert!(per_platform.title.contains("facebook"));
    assert_eq!(per_platform.message, "expired token");
}

#[tokio::test]
async fn publish_with_zero_successes_leaves_the_record_untouched() {
    let server = MockServer::start().await;
    mount_connection_status(&server).await;
    // Only the initial load may hit the list endpoint: no reload on total failure.
    Mock::given(method("GET"))
        .and(path("/records"))
        .and(query_param("workspaceId", "ws-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::Value::Array(vec![record_json("p1", "scheduled")])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/records/p1/publish"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "perPlatformResults": [
                {"platform": "twitter", "success": false, "error": "expired token"},
                {"platform": "facebook", "success": false, "error": "expired token"}
            ]
        })))
        .mount(&server)
        .await;

    let (reconciler, sink) = reconciler_for(&server);
    reconciler.load("ws-1", false).await.unwrap();
    let record = reconciler.records().remove(0);

    reconciler.publish(&record).await;

    assert_eq!(cached_ids(&reconciler), vec!["p1"]);
    assert!(
        sink.snapshot()
            .iter()
            .any(|n| n.kind == NotificationKind::Error && n.title == "Publishing failed")
    );
}

#[tokio::test]
async fn publish_validation_rejects_before_any_remote_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/records/bad/publish"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (reconciler, sink) = reconciler_for(&server);
    let mut record = Record::draft("ws-1", "   ", vec![Platform::Twitter]);
    record.id = "bad".to_string();

    reconciler.publish(&record).await;

    let notifications = sink.snapshot();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::Error);
    assert_eq!(notifications[0].title, "Cannot publish");
}

#[tokio::test]
async fn completed_generation_attaches_media_to_its_record() {
    let server = MockServer::start().await;
    mount_connection_status(&server).await;
    mount_record_list(&server, vec![record_json("p1", "draft")], None).await;
    Mock::given(method("GET"))
        .and(path("/jobs/avatar/v9/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "completed"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jobs/avatar/v9/fetch-result"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"resultUrl": "https://cdn/clip.mp4"})),
        )
        .mount(&server)
        .await;

    let mut config = AppConfig::default();
    config.backend.base_url = server.uri();
    config.workspace_id = Some("ws-1".to_string());
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(&config, sink).expect("engine builds");

    engine.reconciler.load("ws-1", false).await.unwrap();
    engine
        .tracker
        .start_tracking(
            "v9",
            Provider::Avatar,
            JobMetadata {
                record_id: Some("p1".to_string()),
                title: Some("launch teaser".to_string()),
            },
        )
        .expect("tracking starts");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let attached = engine
            .reconciler
            .records()
            .first()
            .and_then(|r| r.media_url.clone());
        if attached.as_deref() == Some("https://cdn/clip.mp4") {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "hand-off never reached the record cache"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    engine.tracker.shutdown();
}
