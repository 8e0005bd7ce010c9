//! `POST /events`: direct ingestion with a status that reflects the outcome.

use super::error::ApiError;
use super::{request_context, AppState};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use beaconlens_core::ingest::normalize_direct;
use serde_json::{json, Value};

pub async fn handle_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let ctx = request_context(&headers);
    let event = normalize_direct(&body, &ctx)?;

    let correlator = state.correlator.clone();
    let outcome = tokio::task::spawn_blocking(move || correlator.ingest(&event)).await??;

    tracing::debug!(
        session_id = %outcome.session.session_key,
        transition = outcome.transition.as_str(),
        "Direct event stored"
    );
    Ok(Json(json!({ "ok": true })))
}
