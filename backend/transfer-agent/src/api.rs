//! Axum control API — the scanner UI delivers scans and polls progress here.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::orchestrator::{ErrorClass, ScanOutcome, TransferError, TransferSnapshot};
use crate::session::SessionHandle;

#[derive(Clone)]
pub struct ApiState {
    pub session: SessionHandle,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/transfer", get(get_transfer))
        .route("/transfer/scans", post(post_scan))
        .route("/transfer/cancel", post(post_cancel))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ScanRequest {
    pub payload: String,
}

#[derive(Serialize)]
pub struct ScanResponse {
    pub status: &'static str,
    pub snapshot: TransferSnapshot,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub class: &'static str,
}

fn error_response(error: &TransferError) -> Response {
    let (status, class) = match error.class() {
        ErrorClass::Silent => (StatusCode::OK, "silent"),
        ErrorClass::Retryable => (StatusCode::UNPROCESSABLE_ENTITY, "retryable"),
        ErrorClass::Fatal => (StatusCode::CONFLICT, "fatal"),
        ErrorClass::Misuse => (StatusCode::BAD_REQUEST, "misuse"),
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            class,
        }),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /transfer`
pub async fn get_transfer(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.session.snapshot())
}

/// `POST /transfer/scans`
///
/// Delivers one raw scanner payload. Re-scans of the page just accepted
/// answer `duplicate` with `200`.
pub async fn post_scan(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ScanRequest>,
) -> Response {
    let status = match state.session.scan(request.payload).await {
        Ok(ScanOutcome::Accepted { .. }) => "accepted",
        Ok(ScanOutcome::Ignored) => "ignored",
        Err(e) if e.class() == ErrorClass::Silent => "duplicate",
        Err(e) => return error_response(&e),
    };
    (
        StatusCode::OK,
        Json(ScanResponse {
            status,
            snapshot: state.session.snapshot(),
        }),
    )
        .into_response()
}

/// `POST /transfer/cancel`
pub async fn post_cancel(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.session.cancel().await)
}
