//! End-to-end tests: prepare raw data, train a calibrated pipeline, and
//! serve it through the HTTP endpoint.

use std::io::Write;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use spamguard_core::{CalibrationConfig, ForestConfig, RateLimitConfig, ServerConfig, VectorizerConfig};
use spamguard_model::artifact::SpamArtifact;
use spamguard_model::{load_dataset, prepare_raw_dataset, stratified_split, CalibratedPipeline};
use spamguard_server::{build_router, AppState, ClassifyResponse, ErrorResponse};
use tower::ServiceExt;

const HAM_TEXT: &str = "Hello, how are you?";
const SPAM_TEXT: &str = "WIN a FREE prize now!!! Click here";

/// Train a small calibrated pipeline from a raw tab-separated file, running
/// the whole prepare → load → split → calibrate path.
fn trained_artifact() -> SpamArtifact {
    let dir = tempfile::tempdir().unwrap();
    let raw_path = dir.path().join("spam_raw.txt");
    let csv_path = dir.path().join("spam.csv");

    let mut raw = std::fs::File::create(&raw_path).unwrap();
    for _ in 0..30 {
        writeln!(raw, "ham\t{HAM_TEXT}").unwrap();
        writeln!(raw, "spam\t{SPAM_TEXT}").unwrap();
    }
    drop(raw);

    prepare_raw_dataset(&raw_path, &csv_path).unwrap();
    let dataset = load_dataset(&csv_path).unwrap();
    let (train, _test) = stratified_split(&dataset, 0.3, 42).unwrap();

    let pipeline = CalibratedPipeline::fit(
        &VectorizerConfig::default(),
        &ForestConfig {
            n_trees: 15,
            ..ForestConfig::default()
        },
        &CalibrationConfig { folds: 3, seed: 42 },
        &train,
    )
    .unwrap();
    SpamArtifact::new(pipeline)
}

fn test_app(rate_limiting: RateLimitConfig) -> Router {
    let config = ServerConfig {
        rate_limiting,
        ..ServerConfig::default()
    };
    let state = Arc::new(AppState::new(trained_artifact(), config));
    build_router(state)
}

fn default_app() -> Router {
    test_app(RateLimitConfig {
        enabled: true,
        max_requests: 100,
        window_seconds: 60,
    })
}

fn predict_request(message: &str, client: &str) -> Request<Body> {
    let body = serde_json::json!({ "message": message });
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header("content-type", "application/json")
        .header("x-forwarded-for", client)
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn response_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_model_summary() {
    let app = default_app();
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: serde_json::Value = response_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["model"]["calibration_folds"], 3);
    assert!(json["model"]["vocabulary_size"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn classifies_ham_as_legitimate() {
    let app = default_app();
    let response = app.oneshot(predict_request(HAM_TEXT, "10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: ClassifyResponse = response_json(response).await;
    assert!(!body.error);
    assert_eq!(
        serde_json::to_value(body.status).unwrap(),
        serde_json::json!("legitimate")
    );
    assert!(body.ham_confidence >= 50.0);
    assert!((body.spam_confidence + body.ham_confidence - 100.0).abs() < 0.11);
    assert!((body.confidence - body.ham_confidence).abs() < 1e-9);
}

#[tokio::test]
async fn classifies_spam_as_spam() {
    let app = default_app();
    let response = app
        .oneshot(predict_request("WIN a FREE prize now!!!", "10.0.0.2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: ClassifyResponse = response_json(response).await;
    assert!(!body.error);
    assert_eq!(
        serde_json::to_value(body.status).unwrap(),
        serde_json::json!("spam")
    );
    assert!(body.spam_confidence >= 50.0);
}

#[tokio::test]
async fn form_encoded_requests_are_accepted() {
    let app = default_app();
    let req = Request::builder()
        .method("POST")
        .uri("/predict")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("x-forwarded-for", "10.0.0.3")
        .body(Body::from("message=WIN%20a%20FREE%20prize%20now"))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: ClassifyResponse = response_json(response).await;
    assert!(!body.error);
}

#[tokio::test]
async fn empty_message_is_a_validation_error() {
    let app = default_app();
    let response = app
        .oneshot(predict_request("   ", "10.0.0.4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: ErrorResponse = response_json(response).await;
    assert!(body.error);
    assert!(body.message.contains("enter a message"));
}

#[tokio::test]
async fn message_length_boundary_is_inclusive() {
    let app = default_app();

    let at_limit = "a".repeat(5000);
    let response = app
        .clone()
        .oneshot(predict_request(&at_limit, "10.0.0.5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let over_limit = "a".repeat(5001);
    let response = app
        .oneshot(predict_request(&over_limit, "10.0.0.5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: ErrorResponse = response_json(response).await;
    assert!(body.message.contains("too long"));
}

#[tokio::test]
async fn excess_requests_get_too_many_requests() {
    let app = test_app(RateLimitConfig {
        enabled: true,
        max_requests: 3,
        window_seconds: 60,
    });

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(predict_request(HAM_TEXT, "198.51.100.7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(predict_request(HAM_TEXT, "198.51.100.7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: ErrorResponse = response_json(response).await;
    assert!(body.error);
    assert!(body.message.contains("Too many requests"));

    // A different client is unaffected.
    let response = app
        .oneshot(predict_request(HAM_TEXT, "198.51.100.8"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unparseable_body_is_a_validation_error() {
    let app = default_app();
    let req = Request::builder()
        .method("POST")
        .uri("/predict")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "10.0.0.9")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
