//! Liveness/readiness probes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::app::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
	(StatusCode::OK, axum::Json(serde_json::json!({ "status": "ok", "version": state.build_info.version })))
}

/// Ready once every startup subtask has dropped its `BlockReady` guard.
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
	if state.ready.is_ready() {
		(StatusCode::OK, "ready").into_response()
	} else {
		(StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
	}
}

pub async fn live() -> impl IntoResponse {
	(StatusCode::OK, "alive")
}
