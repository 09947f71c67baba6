//! # Tessera Asset Server
//!
//! The binary for the tessera asset engine.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for running operations against a local ledger
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! tessera server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! tessera init
//! tessera schema person
//! tessera invoke readAsset '{"key": {"@assetType": "person", "id": "318.207.920-48"}}' --msp org1MSP
//! ```

use clap::Parser;
use tessera::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // TESSERA_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("TESSERA_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tessera=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    eprintln!(
        r#"
  ████████╗███████╗███████╗███████╗███████╗██████╗  █████╗
  ╚══██╔══╝██╔════╝██╔════╝██╔════╝██╔════╝██╔══██╗██╔══██╗
     ██║   █████╗  ███████╗███████╗█████╗  ██████╔╝███████║
     ██║   ██╔══╝  ╚════██║╚════██║██╔══╝  ██╔══██╗██╔══██║
     ██║   ███████╗███████║███████║███████╗██║  ██║██║  ██║
     ╚═╝   ╚══════╝╚══════╝╚══════╝╚══════╝╚═╝  ╚═╝╚═╝  ╚═╝

  Asset Engine v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
