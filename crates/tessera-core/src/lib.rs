//! # tessera-core
//!
//! Typed, schema-driven asset engine on top of a transactional key-value
//! ledger.
//!
//! Assets are JSON objects validated against runtime-declared asset types.
//! Identities are derived deterministically from primary-key properties,
//! references between assets are kept consistent through a reverse index,
//! and the asset-type registry itself can evolve at runtime.
//!
//! ## Layers
//!
//! - `types`, `datatype`, `schema`, `access`: the metamodel
//! - `key`, `asset`, `refs`: identity, validation, reference index
//! - `wrapper`, `session`, `query`, `dynamic`, `events`: per-operation engine
//! - `engine`, `transactions`: registries and the operation catalog
//! - `ledger`: reference substrate (memory and redb backends)
//!
//! ## Architectural Constraints
//!
//! - NO async, NO network dependencies (pure Rust)
//! - Every ledger call goes through the `Stub` trait
//! - Registries are owned by `Engine`, never true globals
//! - Ordered collections wherever output order is observable

// =============================================================================
// MODULES
// =============================================================================

pub mod access;
pub mod asset;
pub mod config;
pub mod datatype;
pub mod dynamic;
pub mod engine;
pub mod events;
pub mod key;
pub mod ledger;
pub mod primitives;
pub mod query;
pub mod refs;
pub mod schema;
pub mod session;
pub mod transactions;
pub mod types;
pub mod wrapper;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{Identity, Result, ResultExt, Status, StoreError, TesseraError};

// =============================================================================
// RE-EXPORTS: Metamodel
// =============================================================================

pub use access::{CallerPattern, IdentityPattern, allows_caller, allows_writer};
pub use datatype::{DataType, DataTypeRegistry};
pub use schema::{AssetProp, AssetType, AssetValidator, DataTypeRef, PropValidator, SchemaRegistry};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use asset::Asset;
pub use config::{DynamicConfig, ENGINE_VERSION, EngineConfig, Header};
pub use engine::{Engine, EngineBuilder};
pub use events::{Event, EventHandler, EventType};
pub use key::Key;
pub use query::SearchResult;
pub use session::Session;
pub use transactions::{Arg, Method, Transaction};
pub use wrapper::StubWrapper;

// =============================================================================
// RE-EXPORTS: Ledger
// =============================================================================

pub use ledger::{
    Backend, CommitReceipt, EmittedEvent, HistoryEntry, Ledger, LedgerTx, MemoryBackend,
    RedbBackend, Stub,
};
