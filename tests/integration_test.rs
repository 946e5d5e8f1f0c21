use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use cardioscan_client::{
    AssetResolver, BackendStatus, ClientConfig, HealthMonitor, InputFile, StaticAssetIndex,
    UploadError, UploadInput, UploadOrchestrator, UploadOutcome, UploadPhase, UploadStateMachine,
    Uploader,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

async fn spawn_backend(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}

fn healthy_route() -> Router {
    Router::new().route(
        "/health",
        get(|| async { Json(json!({"status": "healthy", "message": "ok"})) }),
    )
}

fn test_config(backend_url: &str) -> ClientConfig {
    ClientConfig {
        backend_url: backend_url.to_string(),
        request_timeout_seconds: 5,
        health_timeout_seconds: 2,
        health_interval_seconds: 1,
        max_retries: 2,
        retry_base_delay_ms: 50,
        retry_max_delay_ms: 200,
        ..Default::default()
    }
}

fn valid_input() -> UploadInput {
    UploadInput {
        image: Some(InputFile::new("scan.png", "image/png", vec![7u8; 48 * 1024])),
        annotation: Some(InputFile::new(
            "scan.json",
            "application/json",
            br#"{"patient":"anonymous"}"#.to_vec(),
        )),
    }
}

struct RecordingResolver {
    calls: Mutex<Vec<String>>,
    gallery: Vec<String>,
}

impl RecordingResolver {
    fn new(gallery: Vec<String>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            gallery,
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait::async_trait]
impl AssetResolver for RecordingResolver {
    async fn resolve(&self, class_name: &str) -> cardioscan_client::Result<Vec<String>> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(class_name.to_string());
        Ok(self.gallery.clone())
    }
}

#[tokio::test]
async fn end_to_end_success_resolves_results() {
    init_tracing();

    let hits = Arc::new(AtomicUsize::new(0));
    let upload_hits = hits.clone();
    let router = healthy_route().route(
        "/upload",
        post(move || {
            let hits = upload_hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Json(json!({
                    "predictions": [{"class": "X", "probability": 0.8}],
                    "segmented_image": "/out/1.png"
                }))
            }
        }),
    );
    let backend = spawn_backend(router).await;

    let resolver = Arc::new(RecordingResolver::new(vec!["ref/x-1.jpg".to_string()]));
    let orchestrator = UploadOrchestrator::new(test_config(&backend), resolver.clone());
    assert_eq!(orchestrator.health().probe().await, BackendStatus::Online);

    let outcome = orchestrator
        .submit(valid_input())
        .await
        .expect("submit accepted");

    let result = match outcome {
        UploadOutcome::Success(result) => result,
        UploadOutcome::Failure(err) => panic!("expected success, got {err}"),
    };
    assert_eq!(result.predictions.len(), 1);
    assert_eq!(result.highest.as_ref().map(|p| p.class.as_str()), Some("X"));
    assert_eq!(
        result.segmented_image_url.as_deref(),
        Some(format!("{}/out/1.png", backend).as_str())
    );
    assert_eq!(result.related_images, vec!["ref/x-1.jpg".to_string()]);
    assert_eq!(resolver.calls(), vec!["X".to_string()]);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let state = orchestrator.state_machine();
    assert_eq!(state.phase().await, UploadPhase::Succeeded);
    assert_eq!(state.progress_percent().await, Some(100));
}

#[tokio::test]
async fn exhausts_retry_budget_on_timeouts() {
    init_tracing();

    let hits = Arc::new(AtomicUsize::new(0));
    let upload_hits = hits.clone();
    let router = healthy_route().route(
        "/upload",
        post(move || {
            let hits = upload_hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                Json(json!({"predictions": []}))
            }
        }),
    );
    let backend = spawn_backend(router).await;

    let mut config = test_config(&backend);
    config.request_timeout_seconds = 1;
    let orchestrator =
        UploadOrchestrator::new(config, Arc::new(StaticAssetIndex::default()));
    orchestrator.health().probe().await;

    let outcome = orchestrator
        .submit(valid_input())
        .await
        .expect("submit accepted");

    // max_retries = 2 means exactly three physical attempts.
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(
        outcome,
        UploadOutcome::Failure(UploadError::Timeout { attempts: 3 })
    );
    assert_eq!(
        orchestrator.state_machine().phase().await,
        UploadPhase::Failed
    );
}

#[tokio::test]
async fn network_failure_exhausts_retry_budget() {
    init_tracing();

    // Nothing listens on this port; every attempt fails to connect.
    let config = test_config("http://127.0.0.1:9");
    let uploader = Uploader::new(config.clone());
    let state = UploadStateMachine::new();
    state.try_begin().await.expect("fresh machine accepts");

    let request = cardioscan_client::validate(valid_input(), config.max_image_size_bytes)
        .expect("input is valid");
    let err = uploader
        .upload_with_retry(&request, &state)
        .await
        .expect_err("connect must fail");
    assert_eq!(err, UploadError::NetworkUnavailable { attempts: 3 });
}

#[tokio::test]
async fn payload_too_large_fails_without_retry() {
    init_tracing();

    let hits = Arc::new(AtomicUsize::new(0));
    let upload_hits = hits.clone();
    let router = healthy_route().route(
        "/upload",
        post(move || {
            let hits = upload_hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    Json(json!({"error": "image exceeds server limit"})),
                )
            }
        }),
    );
    let backend = spawn_backend(router).await;

    let orchestrator = UploadOrchestrator::new(
        test_config(&backend),
        Arc::new(StaticAssetIndex::default()),
    );
    orchestrator.health().probe().await;
    let outcome = orchestrator
        .submit(valid_input())
        .await
        .expect("submit accepted");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(outcome, UploadOutcome::Failure(UploadError::PayloadTooLarge));
}

#[tokio::test]
async fn rate_limit_fails_without_retry() {
    init_tracing();

    let hits = Arc::new(AtomicUsize::new(0));
    let upload_hits = hits.clone();
    let router = healthy_route().route(
        "/upload",
        post(move || {
            let hits = upload_hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::TOO_MANY_REQUESTS, Json(json!({"error": "slow down"})))
            }
        }),
    );
    let backend = spawn_backend(router).await;

    let orchestrator = UploadOrchestrator::new(
        test_config(&backend),
        Arc::new(StaticAssetIndex::default()),
    );
    orchestrator.health().probe().await;
    let outcome = orchestrator
        .submit(valid_input())
        .await
        .expect("submit accepted");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(outcome, UploadOutcome::Failure(UploadError::RateLimited));
}

#[tokio::test]
async fn server_error_surfaces_backend_message() {
    init_tracing();

    let router = healthy_route().route(
        "/upload",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "GPU worker crashed"})),
            )
        }),
    );
    let backend = spawn_backend(router).await;

    let orchestrator = UploadOrchestrator::new(
        test_config(&backend),
        Arc::new(StaticAssetIndex::default()),
    );
    orchestrator.health().probe().await;
    let outcome = orchestrator
        .submit(valid_input())
        .await
        .expect("submit accepted");

    assert_eq!(
        outcome,
        UploadOutcome::Failure(UploadError::Server {
            status: 500,
            message: "GPU worker crashed".to_string(),
        })
    );
}

#[tokio::test]
async fn success_without_predictions_is_malformed() {
    init_tracing();

    let hits = Arc::new(AtomicUsize::new(0));
    let upload_hits = hits.clone();
    let router = healthy_route().route(
        "/upload",
        post(move || {
            let hits = upload_hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Json(json!({"message": "processed"}))
            }
        }),
    );
    let backend = spawn_backend(router).await;

    let orchestrator = UploadOrchestrator::new(
        test_config(&backend),
        Arc::new(StaticAssetIndex::default()),
    );
    orchestrator.health().probe().await;
    let outcome = orchestrator
        .submit(valid_input())
        .await
        .expect("submit accepted");

    // A server logic problem is not transient: exactly one attempt.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(outcome, UploadOutcome::Failure(UploadError::MalformedResponse));
}

#[tokio::test]
async fn unhealthy_backend_gates_submission() {
    init_tracing();

    let hits = Arc::new(AtomicUsize::new(0));
    let upload_hits = hits.clone();
    let router = Router::new()
        .route(
            "/health",
            get(|| async { Json(json!({"status": "starting"})) }),
        )
        .route(
            "/upload",
            post(move || {
                let hits = upload_hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"predictions": []}))
                }
            }),
        );
    let backend = spawn_backend(router).await;

    let orchestrator = UploadOrchestrator::new(
        test_config(&backend),
        Arc::new(StaticAssetIndex::default()),
    );
    assert_eq!(orchestrator.health().probe().await, BackendStatus::Unhealthy);

    let outcome = orchestrator
        .submit(valid_input())
        .await
        .expect("submit accepted");

    assert_eq!(
        outcome,
        UploadOutcome::Failure(UploadError::BackendUnavailable {
            status: BackendStatus::Unhealthy,
        })
    );
    // Zero physical attempts were made.
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn offline_backend_gates_submission() {
    init_tracing();

    let orchestrator = UploadOrchestrator::new(
        test_config("http://127.0.0.1:9"),
        Arc::new(StaticAssetIndex::default()),
    );
    assert_eq!(orchestrator.health().probe().await, BackendStatus::Offline);

    let outcome = orchestrator
        .submit(valid_input())
        .await
        .expect("submit accepted");
    assert_eq!(
        outcome,
        UploadOutcome::Failure(UploadError::BackendUnavailable {
            status: BackendStatus::Offline,
        })
    );
}

#[tokio::test]
async fn reentrant_submit_is_ignored_while_uploading() {
    init_tracing();

    let hits = Arc::new(AtomicUsize::new(0));
    let upload_hits = hits.clone();
    let router = healthy_route().route(
        "/upload",
        post(move || {
            let hits = upload_hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!({"predictions": [{"class": "X", "probability": 0.9}]}))
            }
        }),
    );
    let backend = spawn_backend(router).await;

    let orchestrator = Arc::new(UploadOrchestrator::new(
        test_config(&backend),
        Arc::new(StaticAssetIndex::default()),
    ));
    orchestrator.health().probe().await;

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.submit(valid_input()).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    // The second submit lands while the first attempt is in flight.
    assert!(orchestrator.submit(valid_input()).await.is_none());

    let outcome = first.await.expect("task").expect("first submit accepted");
    assert!(outcome.is_success());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn health_monitor_polls_and_stops_cleanly() {
    init_tracing();

    let backend = spawn_backend(healthy_route()).await;
    let monitor = HealthMonitor::new(&test_config(&backend));

    assert_eq!(monitor.status().await, BackendStatus::Checking);

    monitor.start();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(monitor.status().await, BackendStatus::Online);
    assert!(monitor.is_running());

    monitor.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!monitor.is_running());
    // The last observed status is retained after shutdown.
    assert_eq!(monitor.status().await, BackendStatus::Online);
}

#[tokio::test]
async fn health_probe_classifies_http_errors_as_unhealthy() {
    init_tracing();

    let router = Router::new().route(
        "/health",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let backend = spawn_backend(router).await;

    let monitor = HealthMonitor::new(&test_config(&backend));
    assert_eq!(monitor.probe().await, BackendStatus::Unhealthy);
}
