//! # Caller Identity
//!
//! Resolves the identity an operation runs as.
//!
//! With `[[identities]]` configured, every request except `/health` must
//! carry one of the keys:
//!
//! ```text
//! Authorization: Bearer <api-key>
//! ```
//!
//! and runs as the identity bound to it. Without keys, the identity is
//! taken from the `x-tessera-msp` and `x-tessera-ou` headers.

use super::types::ApiError;
use crate::config::ApiIdentity;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::{Choice, ConstantTimeEq};
use tessera_core::Identity;

/// Header naming the caller's MSP when no API keys are configured.
pub const MSP_HEADER: &str = "x-tessera-msp";

/// Header naming the caller's organizational unit.
pub const OU_HEADER: &str = "x-tessera-ou";

/// Configured API keys.
pub type Identities = Arc<Vec<ApiIdentity>>;

// =============================================================================
// KEY MATCHING
// =============================================================================

/// Constant-time equality over equal-length padded buffers.
fn keys_match(provided: &[u8], expected: &[u8]) -> Choice {
    let len = provided.len().max(expected.len());
    let mut a = vec![0u8; len];
    let mut b = vec![0u8; len];
    a[..provided.len()].copy_from_slice(provided);
    b[..expected.len()].copy_from_slice(expected);
    a.ct_eq(&b) & Choice::from(u8::from(provided.len() == expected.len()))
}

/// Identity bound to `provided`. Every key is compared.
fn lookup(identities: &[ApiIdentity], provided: &str) -> Option<Identity> {
    let mut found = None;
    for entry in identities {
        if bool::from(keys_match(provided.as_bytes(), entry.api_key.as_bytes())) {
            found = Some(entry.identity.clone());
        }
    }
    found
}

fn from_headers(headers: &HeaderMap) -> Option<Identity> {
    let msp = headers
        .get(MSP_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())?;
    let mut identity = Identity::new(msp);
    if let Some(ou) = headers.get(OU_HEADER).and_then(|v| v.to_str().ok()) {
        identity = identity.with_ou(ou);
    }
    Some(identity)
}

// =============================================================================
// MIDDLEWARE
// =============================================================================

/// Attach the caller's [`Identity`] to the request, or reject with 401.
pub async fn identity_middleware(
    State(identities): State<Identities>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let identity = if identities.is_empty() {
        from_headers(request.headers()).ok_or_else(|| {
            tracing::warn!(event = "auth_failure", reason = "missing_msp_header", "no caller identity");
            ApiError::unauthorized(format!("missing {} header", MSP_HEADER))
        })?
    } else {
        let provided = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
            .ok_or_else(|| {
                tracing::warn!(
                    event = "auth_failure",
                    reason = "missing_authorization_header",
                    "missing Authorization header"
                );
                ApiError::unauthorized("Unauthorized")
            })?;
        lookup(&identities, provided).ok_or_else(|| {
            tracing::warn!(event = "auth_failure", reason = "invalid_api_key", "invalid API key");
            ApiError::unauthorized("Unauthorized")
        })?
    };

    tracing::debug!(msp = %identity.msp, "caller resolved");
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn entry(key: &str, msp: &str) -> ApiIdentity {
        ApiIdentity {
            api_key: key.to_string(),
            identity: Identity::new(msp),
        }
    }

    #[test]
    fn lookup_selects_bound_identity() {
        let identities = vec![entry("alpha", "org1MSP"), entry("beta", "org2MSP")];
        assert_eq!(lookup(&identities, "beta").map(|i| i.msp), Some("org2MSP".into()));
        assert!(lookup(&identities, "bet").is_none());
        assert!(lookup(&identities, "betaa").is_none());
        assert!(lookup(&identities, "").is_none());
    }

    #[test]
    fn headers_give_identity() {
        let mut headers = HeaderMap::new();
        assert!(from_headers(&headers).is_none());
        headers.insert(MSP_HEADER, HeaderValue::from_static("org1MSP"));
        headers.insert(OU_HEADER, HeaderValue::from_static("admin"));
        let identity = from_headers(&headers).expect("identity");
        assert_eq!(identity.msp, "org1MSP");
        assert_eq!(identity.ou.as_deref(), Some("admin"));
    }
}
