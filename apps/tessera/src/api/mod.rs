//! # Tessera HTTP API Module
//!
//! JSON surface over the operation catalog.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /api/invoke/{tx}` - Run any operation; mutating ones commit
//! - `POST /api/query/{tx}` - Run a read-only operation; never commits
//! - `GET /api/transactions` - List the operation catalog
//!
//! ## Security Configuration
//!
//! - `[server] cors_origins` / `TESSERA_CORS_ORIGINS`: allowed origins, or "*" for all (default: localhost only)
//! - `[server] rate_limit` / `TESSERA_RATE_LIMIT`: requests per second (default: 100, 0 to disable)
//! - `[[identities]]`: API keys; when absent, callers identify through headers

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::{MSP_HEADER, OU_HEADER};
pub use middleware::create_rate_limiter;
pub use types::{ApiError, ErrorResponse, HealthResponse, InvokeRequest};

use crate::config::{ApiIdentity, ServerConfig};
use crate::host::Host;
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tessera_core::TesseraError;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted request body (2 MB).
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// Readers share the host; invocations take it exclusively.
    pub host: Arc<RwLock<Host>>,
}

impl AppState {
    #[must_use]
    pub fn new(host: Host) -> Self {
        Self {
            host: Arc::new(RwLock::new(host)),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

fn build_cors_layer(origins: Option<&[String]>) -> CorsLayer {
    match origins {
        Some([only]) if only == "*" => {
            tracing::warn!("CORS: allowing ALL origins; do not use this in production");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(hv) => {
                        tracing::info!("CORS: allowing origin {}", origin);
                        Some(hv)
                    }
                    Err(e) => {
                        tracing::warn!("CORS: invalid origin '{}': {}", origin, e);
                        None
                    }
                })
                .collect();
            if allowed.is_empty() {
                tracing::warn!("CORS: no valid origins configured, defaulting to localhost only");
                build_localhost_cors()
            } else {
                cors_with_origins(allowed)
            }
        }
        None => build_localhost_cors(),
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();
    cors_with_origins(origins)
}

fn cors_with_origins(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(MSP_HEADER),
            HeaderName::from_static(OU_HEADER),
        ])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the router with every endpoint and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing
/// 2. CORS
/// 3. Body limit
/// 4. Rate limiting (if enabled)
/// 5. Caller identity
pub fn create_router(state: AppState, server: &ServerConfig, identities: Vec<ApiIdentity>) -> Router {
    if identities.is_empty() {
        tracing::warn!(
            "API key authentication DISABLED: callers are identified by the {} header. \
             Configure [[identities]] to require API keys.",
            MSP_HEADER
        );
    } else {
        tracing::info!(keys = identities.len(), "API key authentication enabled");
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/invoke/{tx}", post(handlers::invoke_handler))
        .route("/api/query/{tx}", post(handlers::query_handler))
        .route("/api/transactions", get(handlers::transactions_handler))
        .layer(axum_middleware::from_fn_with_state(
            Arc::new(identities),
            auth::identity_middleware,
        ));

    match create_rate_limiter(server.rate_limit) {
        Some(limiter) => {
            tracing::info!("rate limiting enabled: {} requests/second", server.rate_limit);
            router = router.layer(axum_middleware::from_fn_with_state(
                limiter,
                middleware::rate_limit_middleware,
            ));
        }
        None => tracing::info!("rate limiting disabled"),
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer(server.cors_origins.as_deref()))
                .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_SIZE)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve until Ctrl+C.
pub async fn run_server(
    host: Host,
    server: &ServerConfig,
    identities: Vec<ApiIdentity>,
) -> Result<(), TesseraError> {
    let addr = format!("{}:{}", server.host, server.port);
    let router = create_router(AppState::new(host), server, identities);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TesseraError::internal(format!("bind {} failed: {}", addr, e)))?;
    tracing::info!("tessera HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| TesseraError::internal(format!("server error: {}", e)))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => {
            tracing::error!("cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
