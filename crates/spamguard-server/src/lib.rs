//! HTTP serving endpoint for the SpamGuard classifier.
//!
//! The calibrated pipeline is loaded once at process start into
//! process-wide read-only state; requests apply it without mutation, so no
//! locking is needed around the model. Per-request failures are isolated at
//! the handler boundary and never crash the process.

pub mod config;
pub mod rate_limit;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use spamguard_core::ServerConfig;
use spamguard_model::artifact::SpamArtifact;
use spamguard_model::CalibratedPipeline;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::rate_limit::{RateLimitDecision, RateLimiter};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Process-wide state shared by all request handlers.
///
/// Constructed exactly once at startup from a successfully loaded artifact;
/// there is no reload path short of a process restart.
pub struct AppState {
    /// The read-only calibrated pipeline.
    pub pipeline: CalibratedPipeline,
    /// Schema version of the loaded artifact.
    pub schema_version: u32,
    /// Serving configuration.
    pub config: ServerConfig,
    /// Per-client request budget.
    pub limiter: RateLimiter,
}

impl AppState {
    /// Build state from a loaded artifact and configuration.
    #[must_use]
    pub fn new(artifact: SpamArtifact, config: ServerConfig) -> Self {
        let limiter = RateLimiter::new(&config.rate_limiting);
        Self {
            pipeline: artifact.pipeline,
            schema_version: artifact.schema_version,
            config,
            limiter,
        }
    }
}

/// Build the axum [`Router`] with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/predict", post(predict_handler))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Classification request body (JSON or form-encoded).
#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    /// The message to classify.
    #[serde(default)]
    pub message: String,
}

/// Outcome reported in the `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationStatus {
    Spam,
    Legitimate,
    Error,
}

/// Successful classification response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyResponse {
    /// Always `false` for successful classifications.
    pub error: bool,
    /// `spam` or `legitimate`.
    pub status: ClassificationStatus,
    /// Human-readable verdict.
    pub message: String,
    /// Confidence of the winning class, percent in [0, 100].
    pub confidence: f64,
    /// Spam probability, percent in [0, 100].
    pub spam_confidence: f64,
    /// Ham probability, percent in [0, 100].
    pub ham_confidence: f64,
}

/// Error response body shared by validation, rate-limit, and internal
/// failures.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `true`.
    pub error: bool,
    /// Always `error`.
    pub status: ClassificationStatus,
    /// Human-readable explanation; never leaks internals.
    pub message: String,
}

fn error_response(code: StatusCode, message: &str) -> Response {
    let body = ErrorResponse {
        error: true,
        status: ClassificationStatus::Error,
        message: message.to_string(),
    };
    (code, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve the client key for rate limiting.
///
/// Behind a reverse proxy the peer address is the proxy itself, so the first
/// `x-forwarded-for` entry identifies the caller; direct connections fall
/// back to a shared key.
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

/// Round a percentage to one decimal place.
fn round_percent(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Decode the request body as JSON or form-encoded data.
fn parse_request(headers: &HeaderMap, body: &Bytes) -> Result<PredictRequest, String> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/json") {
        serde_json::from_slice(body).map_err(|_| "Request body is not valid JSON.".to_string())
    } else {
        serde_urlencoded::from_bytes(body)
            .map_err(|_| "Request body could not be parsed.".to_string())
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — liveness plus a model summary.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(serde_json::json!({
        "status": "healthy",
        "model": {
            "schema_version": state.schema_version,
            "calibration_folds": state.pipeline.n_folds(),
            "vocabulary_size": state.pipeline.vocabulary_size(),
        },
    }))
    .into_response()
}

/// `POST /predict` — classify one message.
pub async fn predict_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let client = client_key(&headers);
    if let RateLimitDecision::Limited { retry_after_secs } = state.limiter.check(&client) {
        warn!(%client, retry_after_secs, "rate limit exceeded");
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please wait a minute and try again.",
        );
    }

    let request = match parse_request(&headers, &body) {
        Ok(request) => request,
        Err(reason) => {
            warn!(%client, %reason, "unparseable request body");
            return error_response(StatusCode::BAD_REQUEST, &reason);
        }
    };

    let message = request.message.trim();
    if message.is_empty() {
        warn!(%client, "empty message rejected");
        return error_response(
            StatusCode::BAD_REQUEST,
            "Please enter a message to classify.",
        );
    }
    let chars = message.chars().count();
    if chars > state.config.max_message_chars {
        warn!(%client, chars, "oversized message rejected");
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!(
                "Message is too long. Please limit to {} characters.",
                state.config.max_message_chars
            ),
        );
    }

    let request_id = Uuid::new_v4();
    info!(%request_id, chars, "classifying message");

    let (p_ham, p_spam) = match state.pipeline.predict_proba(message) {
        Ok(probabilities) => probabilities,
        Err(e) => {
            error!(%request_id, error = %e, "inference failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An unexpected server error occurred. The issue has been logged.",
            );
        }
    };

    let is_spam = p_spam > p_ham;
    let ham_confidence = round_percent(p_ham * 100.0);
    let spam_confidence = round_percent(p_spam * 100.0);
    info!(
        %request_id,
        verdict = if is_spam { "spam" } else { "legitimate" },
        spam_confidence,
        "classification complete"
    );

    Json(ClassifyResponse {
        error: false,
        status: if is_spam {
            ClassificationStatus::Spam
        } else {
            ClassificationStatus::Legitimate
        },
        message: if is_spam {
            "This message is SPAM".to_string()
        } else {
            "This message is LEGITIMATE".to_string()
        },
        confidence: ham_confidence.max(spam_confidence),
        spam_confidence,
        ham_confidence,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_key_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_key(&headers), "203.0.113.9");
    }

    #[test]
    fn client_key_falls_back_without_header() {
        assert_eq!(client_key(&HeaderMap::new()), "local");
    }

    #[test]
    fn round_percent_keeps_one_decimal() {
        assert!((round_percent(87.6543) - 87.7).abs() < 1e-9);
        assert!((round_percent(0.04) - 0.0).abs() < 1e-9);
        assert!((round_percent(100.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn parse_request_accepts_json_and_form() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = Bytes::from_static(b"{\"message\": \"hello\"}");
        assert_eq!(parse_request(&headers, &body).unwrap().message, "hello");

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        let body = Bytes::from_static(b"message=hello%20there");
        assert_eq!(
            parse_request(&headers, &body).unwrap().message,
            "hello there"
        );
    }

    #[test]
    fn parse_request_rejects_invalid_json() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = Bytes::from_static(b"{not json");
        assert!(parse_request(&headers, &body).is_err());
    }
}
