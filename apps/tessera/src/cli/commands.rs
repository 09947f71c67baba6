//! # CLI Command Implementations

use crate::api;
use crate::config::AppConfig;
use crate::host::Host;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use tessera_core::{Identity, TesseraError};

/// Maximum size of an arguments file (16 MB).
const MAX_ARGS_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Identity for catalog reads issued by the CLI itself.
const CLI_MSP: &str = "tessera-cli";

/// Config written by `tessera init`.
const STARTER_CONFIG: &str = r#"# tessera host configuration

# JSON list of asset types registered at boot.
# schema_file = "schema.json"

[server]
host = "127.0.0.1"
port = 8080
rate_limit = 100
# cors_origins = ["https://app.example.com"]

[storage]
backend = "redb"
path = "tessera.redb"

[header]
name = "tessera"
version = "0.1.0"

[engine]
strip_metadata = []
dynamic = { enabled = false }

# [[identities]]
# api_key = "change-me"
# msp = "org1MSP"
"#;

fn read_args_file(path: &Path) -> Result<String, TesseraError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        TesseraError::bad_request(format!("cannot read '{}': {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(TesseraError::bad_request(format!(
            "'{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > MAX_ARGS_FILE_SIZE {
        return Err(TesseraError::bad_request(format!(
            "file size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_ARGS_FILE_SIZE
        )));
    }
    std::fs::read_to_string(path)
        .map_err(|e| TesseraError::bad_request(format!("cannot read '{}': {}", path.display(), e)))
}

fn print_value(value: &Value, json_mode: bool) -> Result<(), TesseraError> {
    let text = if json_mode {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
    .map_err(|e| TesseraError::internal(format!("failed to encode output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(
    mut config: AppConfig,
    database: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), TesseraError> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let engine_host = Host::open(&config, database)?;
    let path = database.unwrap_or(&config.storage.path);

    println!("Tessera Asset Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", config.server.host);
    println!("  Port:     {}", config.server.port);
    println!("  Backend:  {}", engine_host.backend_name());
    println!("  Ledger:   {}", path.display());
    println!("  Types:    {}", engine_host.engine().registry().list().len());
    println!("  Dynamic:  {}", config.engine.dynamic.enabled);
    println!();
    println!("Endpoints:");
    println!("  POST /api/invoke/{{tx}} - Run an operation");
    println!("  POST /api/query/{{tx}}  - Run a read-only operation");
    println!("  GET  /api/transactions - List operations");
    println!("  GET  /health           - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let identities = config.identities.clone();
    api::run_server(engine_host, &config.server, identities).await
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Write a starter config (unless one exists) and create the ledger it names.
pub fn cmd_init(config_path: &Path, database: Option<&Path>, force: bool) -> Result<(), TesseraError> {
    if config_path.exists() && !force {
        return Err(TesseraError::conflict(format!(
            "'{}' already exists. Use --force to overwrite.",
            config_path.display()
        )));
    }
    std::fs::write(config_path, STARTER_CONFIG).map_err(|e| {
        TesseraError::internal(format!("cannot write '{}': {}", config_path.display(), e))
    })?;
    println!("Wrote {}", config_path.display());

    let config = AppConfig::from_file(config_path)?;
    let host = Host::open(&config, database)?;
    let path = database.unwrap_or(&config.storage.path);
    println!("Initialized {} ledger at {}", host.backend_name(), path.display());
    Ok(())
}

// =============================================================================
// INVOKE COMMAND
// =============================================================================

/// Parsed `invoke` arguments.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub tx: String,
    pub args: Option<String>,
    pub file: Option<std::path::PathBuf>,
    pub msp: String,
    pub ou: Option<String>,
    pub query: bool,
}

impl InvokeOptions {
    fn identity(&self) -> Identity {
        let identity = Identity::new(self.msp.as_str());
        match &self.ou {
            Some(ou) => identity.with_ou(ou.as_str()),
            None => identity,
        }
    }

    fn parsed_args(&self) -> Result<Value, TesseraError> {
        let text = match (&self.args, &self.file) {
            (_, Some(path)) => read_args_file(path)?,
            (Some(args), None) => args.clone(),
            (None, None) => return Ok(json!({})),
        };
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| TesseraError::bad_request(format!("arguments are not valid JSON: {}", e)))?;
        if !value.is_object() {
            return Err(TesseraError::bad_request("arguments must be a JSON object"));
        }
        Ok(value)
    }
}

/// Run one operation against the configured ledger.
pub fn cmd_invoke(
    config: &AppConfig,
    database: Option<&Path>,
    options: InvokeOptions,
    json_mode: bool,
) -> Result<(), TesseraError> {
    let args = options.parsed_args()?;
    let host = Host::open(config, database)?;
    let identity = options.identity();

    let out = if options.query {
        host.query(identity, BTreeMap::new(), &options.tx, &args)?
    } else {
        host.invoke(identity, BTreeMap::new(), &options.tx, &args)?
    };
    print_value(&out, json_mode)
}

// =============================================================================
// SCHEMA COMMAND
// =============================================================================

/// Describe every asset type, or the one named.
pub fn cmd_schema(
    config: &AppConfig,
    database: Option<&Path>,
    asset_type: Option<&str>,
    json_mode: bool,
) -> Result<(), TesseraError> {
    let host = Host::open(config, database)?;
    let args = match asset_type {
        Some(tag) => json!({ "assetType": tag }),
        None => json!({}),
    };
    let out = host.query(Identity::new(CLI_MSP), BTreeMap::new(), "getSchema", &args)?;

    if json_mode || asset_type.is_some() {
        return print_value(&out, json_mode);
    }

    let types = out.as_array().map(Vec::as_slice).unwrap_or_default();
    if types.is_empty() {
        println!("No asset types registered.");
        return Ok(());
    }
    println!("{:<24} {:<32} {}", "TAG", "LABEL", "DYNAMIC");
    for summary in types {
        println!(
            "{:<24} {:<32} {}",
            summary["tag"].as_str().unwrap_or_default(),
            summary["label"].as_str().unwrap_or_default(),
            summary["dynamic"].as_bool().unwrap_or(false)
        );
    }
    Ok(())
}
