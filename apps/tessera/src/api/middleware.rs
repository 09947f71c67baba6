//! # Rate Limiting
//!
//! One global token bucket in front of every route. The rate comes from
//! `[server] rate_limit` or `TESSERA_RATE_LIMIT`; 0 disables the layer.

use super::types::ApiError;
use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Shared limiter handle.
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Limiter for `requests_per_second`, or `None` when limiting is off.
pub fn create_rate_limiter(requests_per_second: u32) -> Option<GlobalRateLimiter> {
    let rps = NonZeroU32::new(requests_per_second)?;
    Some(Arc::new(RateLimiter::direct(Quota::per_second(rps))))
}

/// Reject with 429 once the bucket is empty.
pub async fn rate_limit_middleware(
    State(limiter): State<GlobalRateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if limiter.check().is_err() {
        tracing::warn!(path = %request.uri().path(), "rate limit exceeded");
        return Err(ApiError::too_many_requests());
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_disables_limiting() {
        assert!(create_rate_limiter(0).is_none());
    }

    #[test]
    fn limiter_admits_first_request() {
        let limiter = create_rate_limiter(1).expect("limiter");
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
