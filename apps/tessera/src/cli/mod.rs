//! # Tessera CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `init` - Write a starter config and create the ledger
//! - `invoke` - Run an operation against the local ledger
//! - `schema` - Describe the registered asset types

mod commands;

use crate::config::AppConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tessera_core::TesseraError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Tessera - typed asset engine over a transactional ledger
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "tessera.toml")]
    pub config: PathBuf,

    /// Ledger path; overrides `[storage] path`
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to; overrides `[server] host`
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to; overrides `[server] port`
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Write a starter config and create the ledger
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Run an operation
    Invoke {
        /// Operation tag, e.g. createAsset
        tx: String,

        /// Arguments as a JSON object
        #[arg(conflicts_with = "file")]
        args: Option<String>,

        /// Read the arguments from a JSON file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Caller MSP
        #[arg(short, long, default_value = "org1MSP")]
        msp: String,

        /// Caller organizational unit
        #[arg(long)]
        ou: Option<String>,

        /// Never commit; fails for mutating operations
        #[arg(long)]
        query: bool,
    },

    /// Describe all asset types, or one
    Schema {
        /// Asset type tag
        asset_type: Option<String>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), TesseraError> {
    if cli.verbose {
        tracing::debug!(config = %cli.config.display(), "verbose output enabled");
    }

    if let Commands::Init { force } = cli.command {
        return cmd_init(&cli.config, cli.database.as_deref(), force);
    }

    let config = AppConfig::load_or_default(&cli.config)?;
    let database = cli.database.as_deref();

    match cli.command {
        Commands::Server { host, port } => cmd_server(config, database, host, port).await,
        Commands::Invoke {
            tx,
            args,
            file,
            msp,
            ou,
            query,
        } => cmd_invoke(
            &config,
            database,
            InvokeOptions {
                tx,
                args,
                file,
                msp,
                ou,
                query,
            },
            cli.json_mode,
        ),
        Commands::Schema { asset_type } => {
            cmd_schema(&config, database, asset_type.as_deref(), cli.json_mode)
        }
        Commands::Init { .. } => Ok(()),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_invoke() {
        let cli = Cli::try_parse_from([
            "tessera",
            "--json-mode",
            "invoke",
            "readAsset",
            r#"{"key": {}}"#,
            "--msp",
            "org2MSP",
            "--query",
        ])
        .expect("parse");
        assert!(cli.json_mode);
        match cli.command {
            Commands::Invoke {
                tx, args, msp, query, ..
            } => {
                assert_eq!(tx, "readAsset");
                assert_eq!(args.as_deref(), Some(r#"{"key": {}}"#));
                assert_eq!(msp, "org2MSP");
                assert!(query);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn args_and_file_conflict() {
        let parsed = Cli::try_parse_from(["tessera", "invoke", "createAsset", "{}", "--file", "a.json"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn server_overrides_are_optional() {
        let cli = Cli::try_parse_from(["tessera", "server", "--port", "9000"]).expect("parse");
        match cli.command {
            Commands::Server { host, port } => {
                assert!(host.is_none());
                assert_eq!(port, Some(9000));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
