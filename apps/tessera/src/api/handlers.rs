//! # API Endpoint Handlers

use super::{
    AppState,
    types::{ApiError, HealthResponse, InvokeRequest},
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::Value;
use tessera_core::Identity;

// =============================================================================
// HEALTH HANDLER
// =============================================================================

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// OPERATION HANDLERS
// =============================================================================

/// Run any operation. Mutating operations are serialized and commit on success.
pub async fn invoke_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(tx): Path<String>,
    Json(request): Json<InvokeRequest>,
) -> Result<Json<Value>, ApiError> {
    let transient = request.decode_transient()?;
    let host = state.host.write().await;
    let out = host.invoke(identity, transient, &tx, &request.args())?;
    Ok(Json(out))
}

/// Run a read-only operation. Never commits.
pub async fn query_handler(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(tx): Path<String>,
    Json(request): Json<InvokeRequest>,
) -> Result<Json<Value>, ApiError> {
    let transient = request.decode_transient()?;
    let host = state.host.read().await;
    let out = host.query(identity, transient, &tx, &request.args())?;
    Ok(Json(out))
}

/// Summaries of every operation in the catalog.
pub async fn transactions_handler(State(state): State<AppState>) -> impl IntoResponse {
    let host = state.host.read().await;
    let list: Vec<Value> = host.engine().transactions().map(|t| t.summary()).collect();
    Json(Value::Array(list))
}
