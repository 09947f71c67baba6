//! # Host Configuration
//!
//! Settings read from `tessera.toml`:
//!
//! ```toml
//! schema_file = "schema.json"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [storage]
//! backend = "redb"      # or "memory"
//! path = "tessera.redb"
//!
//! [header]
//! name = "library"
//!
//! [engine]
//! strip_metadata = ["@lastTx"]
//! dynamic = { enabled = true }
//!
//! [[identities]]
//! api_key = "..."
//! msp = "org1MSP"
//! ```
//!
//! Environment overrides:
//! - `TESSERA_CORS_ORIGINS`: comma-separated origins, or `*`
//! - `TESSERA_RATE_LIMIT`: requests per second, 0 disables

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tessera_core::{AssetType, EngineConfig, Header, Identity, TesseraError};

/// Default requests per second.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// Largest schema file accepted (4 MB).
const MAX_SCHEMA_FILE_SIZE: u64 = 4 * 1024 * 1024;

// =============================================================================
// SECTIONS
// =============================================================================

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    /// Application header; replaces `engine.header` when present.
    pub header: Option<Header>,
    pub engine: EngineConfig,
    /// API keys and the caller identity each one selects.
    pub identities: Vec<ApiIdentity>,
    /// JSON list of asset types registered at boot.
    pub schema_file: Option<PathBuf>,
}

/// HTTP listener and middleware settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; `None` means localhost only.
    pub cors_origins: Option<Vec<String>>,
    /// Requests per second; 0 disables rate limiting.
    pub rate_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_origins: None,
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }
}

/// Ledger backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Redb,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Redb,
            path: PathBuf::from("tessera.redb"),
        }
    }
}

/// One API key and the identity it authenticates as.
#[derive(Clone, Deserialize)]
pub struct ApiIdentity {
    pub api_key: String,
    #[serde(flatten)]
    pub identity: Identity,
}

impl std::fmt::Debug for ApiIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiIdentity")
            .field("api_key", &"<redacted>")
            .field("identity", &self.identity)
            .finish()
    }
}

// =============================================================================
// LOADING
// =============================================================================

impl AppConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, TesseraError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TesseraError::internal(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use defaults. Environment
    /// overrides apply either way.
    pub fn load_or_default(path: &Path) -> Result<Self, TesseraError> {
        if path.exists() {
            return Self::from_file(path);
        }
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Parse TOML without environment overrides.
    pub fn from_toml(content: &str) -> Result<Self, TesseraError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TesseraError::bad_request(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), TesseraError> {
        for (i, entry) in self.identities.iter().enumerate() {
            if entry.api_key.is_empty() {
                return Err(TesseraError::bad_request(format!(
                    "identities[{}]: api_key must not be empty",
                    i
                )));
            }
            if entry.identity.msp.is_empty() {
                return Err(TesseraError::bad_request(format!(
                    "identities[{}]: msp must not be empty",
                    i
                )));
            }
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(origins) = std::env::var("TESSERA_CORS_ORIGINS") {
            self.server.cors_origins = Some(
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        if let Some(limit) = std::env::var("TESSERA_RATE_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.server.rate_limit = limit;
        }
    }

    /// Engine settings with the `[header]` section folded in.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = self.engine.clone();
        if let Some(header) = &self.header {
            engine.header = header.clone();
        }
        engine
    }

    /// Asset types from `schema_file`, or none.
    pub fn asset_types(&self) -> Result<Vec<AssetType>, TesseraError> {
        let Some(path) = &self.schema_file else {
            return Ok(Vec::new());
        };
        let metadata = std::fs::metadata(path).map_err(|e| {
            TesseraError::internal(format!("cannot read schema '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_SCHEMA_FILE_SIZE {
            return Err(TesseraError::bad_request(format!(
                "schema file is {} bytes, limit is {}",
                metadata.len(),
                MAX_SCHEMA_FILE_SIZE
            )));
        }
        let data = std::fs::read(path).map_err(|e| {
            TesseraError::internal(format!("cannot read schema '{}': {}", path.display(), e))
        })?;
        serde_json::from_slice(&data)
            .map_err(|e| TesseraError::bad_request(format!("invalid schema file: {}", e)))
    }
}
