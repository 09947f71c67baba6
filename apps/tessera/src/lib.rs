//! # tessera
//!
//! Host for the tessera asset engine: configuration, ledger binding, the
//! HTTP API and the command line.

pub mod api;
pub mod cli;
pub mod config;
pub mod host;
