//! # API Request/Response Types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tessera_core::{ENGINE_VERSION, TesseraError};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub engine_version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            engine_version: ENGINE_VERSION.to_string(),
        }
    }
}

// =============================================================================
// INVOKE REQUEST
// =============================================================================

/// Body of `/api/invoke/{tx}` and `/api/query/{tx}`.
///
/// Every member except `transient` is an operation argument. `transient`
/// maps private argument tags to base64-encoded JSON documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeRequest {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub transient: BTreeMap<String, String>,
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

impl InvokeRequest {
    /// Decode the transient map.
    pub fn decode_transient(&self) -> Result<BTreeMap<String, Vec<u8>>, TesseraError> {
        self.transient
            .iter()
            .map(|(tag, encoded)| {
                STANDARD
                    .decode(encoded)
                    .map(|bytes| (tag.clone(), bytes))
                    .map_err(|e| {
                        TesseraError::bad_request(format!(
                            "transient '{}' is not valid base64: {}",
                            tag, e
                        ))
                    })
            })
            .collect()
    }

    #[must_use]
    pub fn args(&self) -> Value {
        Value::Object(self.args.clone())
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error body: `{"status": <code>, "error": <message>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: String,
}

/// Error returned by handlers and middleware.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn too_many_requests() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests")
    }
}

impl From<TesseraError> for ApiError {
    fn from(err: TesseraError) -> Self {
        let status = u16::try_from(err.code())
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            status: self.status.as_u16(),
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
