//! # Ledger Substrate
//!
//! The engine talks to its transactional store only through the [`Stub`]
//! trait. This module defines that contract and ships a reference ledger
//! implementing it over two backends:
//!
//! - `MemoryBackend`: ordered in-memory maps, for tests and ephemeral hosts
//! - `RedbBackend`: persistent, one redb write transaction per commit
//!
//! ## Transaction model
//!
//! `Ledger::begin` opens a `LedgerTx`. Reads observe committed state only;
//! writes are buffered and applied atomically by `LedgerTx::commit`.
//! Dropping an uncommitted transaction discards its writes.

mod memory;
mod redb_store;
mod selector;
mod tx;

pub use memory::MemoryBackend;
pub use redb_store::RedbBackend;
pub use selector::{RichQuery, Selector};
pub use tx::{CommitReceipt, Ledger, LedgerTx};

use crate::primitives::COMPOSITE_KEY_SEPARATOR;
use crate::types::{Identity, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =============================================================================
// RECORDS
// =============================================================================

/// One version of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Transaction that wrote this version.
    pub tx_id: String,
    /// Stored bytes (empty for deletions).
    pub value: Vec<u8>,
    pub is_delete: bool,
    /// Transaction timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Page of a paginated rich query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page_size: usize,
    /// Opaque position returned by the previous page; empty for the first.
    pub bookmark: String,
}

/// Result of a rich query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPage {
    /// `(key, value)` pairs in result order.
    pub records: Vec<(String, Vec<u8>)>,
    /// Position of the next page; empty when exhausted or unpaginated.
    pub bookmark: String,
}

/// Event published by a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedEvent {
    pub tx_id: String,
    pub name: String,
    pub payload: Vec<u8>,
}

// =============================================================================
// STUB TRAIT
// =============================================================================

/// Capabilities the engine requires from its substrate.
///
/// One stub serves one operation invocation. Errors are backend errors;
/// the engine converts them with their status preserved.
pub trait Stub {
    /// Id of the current transaction.
    fn tx_id(&self) -> &str;

    /// Timestamp of the current transaction.
    fn tx_timestamp(&self) -> DateTime<Utc>;

    /// Identity of the caller.
    fn identity(&self) -> &Identity;

    /// Transient (non-persisted) request data.
    fn transient(&self) -> &BTreeMap<String, Vec<u8>>;

    /// Read a key from the public namespace.
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a key to the public namespace.
    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Delete a key from the public namespace.
    fn del_state(&mut self, key: &str) -> Result<(), StoreError>;

    /// Range over composite keys sharing the given prefix.
    fn get_state_by_partial_composite_key(
        &self,
        object_type: &str,
        attributes: &[&str],
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Rich query over the public namespace.
    fn get_query_result(
        &self,
        query: &Value,
        page: Option<&PageRequest>,
    ) -> Result<QueryPage, StoreError>;

    /// Every committed version of a public key, oldest first.
    fn get_history_for_key(&self, key: &str) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Read from a private collection. Non-members get `AccessDenied`.
    fn get_private_data(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Hash of a private value. Readable by anyone.
    fn get_private_data_hash(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write to a private collection.
    fn put_private_data(
        &mut self,
        collection: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), StoreError>;

    /// Delete from a private collection.
    fn del_private_data(&mut self, collection: &str, key: &str) -> Result<(), StoreError>;

    /// Rich query over a private collection (unpaginated).
    fn get_private_query_result(
        &self,
        collection: &str,
        query: &Value,
    ) -> Result<QueryPage, StoreError>;

    /// Emit an event, published on commit.
    fn set_event(&mut self, name: &str, payload: Vec<u8>) -> Result<(), StoreError>;
}

// =============================================================================
// COMPOSITE KEYS
// =============================================================================

/// Build `\0<objectType>\0<attr>\0...`.
pub fn create_composite_key(object_type: &str, attributes: &[&str]) -> Result<String, StoreError> {
    let mut key = String::with_capacity(
        2 + object_type.len() + attributes.iter().map(|a| a.len() + 1).sum::<usize>(),
    );
    key.push(COMPOSITE_KEY_SEPARATOR);
    for part in std::iter::once(object_type).chain(attributes.iter().copied()) {
        if part.contains(COMPOSITE_KEY_SEPARATOR) {
            return Err(StoreError::InvalidKey(format!(
                "composite key part {:?} contains the separator",
                part
            )));
        }
        key.push_str(part);
        key.push(COMPOSITE_KEY_SEPARATOR);
    }
    Ok(key)
}

/// Split a composite key back into `(objectType, attributes)`.
pub fn split_composite_key(key: &str) -> Result<(String, Vec<String>), StoreError> {
    let body = key
        .strip_prefix(COMPOSITE_KEY_SEPARATOR)
        .and_then(|k| k.strip_suffix(COMPOSITE_KEY_SEPARATOR))
        .ok_or_else(|| StoreError::InvalidKey(format!("{:?} is not a composite key", key)))?;
    let mut parts = body.split(COMPOSITE_KEY_SEPARATOR).map(str::to_string);
    let object_type = parts.next().unwrap_or_default();
    Ok((object_type, parts.collect()))
}

/// Composite keys live in the public namespace beside plain keys.
#[must_use]
pub fn is_composite_key(key: &str) -> bool {
    key.starts_with(COMPOSITE_KEY_SEPARATOR)
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Namespace of a stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace<'a> {
    Public,
    Private(&'a str),
}

/// Writes of one transaction, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub tx_id: String,
    pub timestamp: DateTime<Utc>,
    /// `None` deletes.
    pub public: BTreeMap<String, Option<Vec<u8>>>,
    /// Per collection, `None` deletes.
    pub private: BTreeMap<String, BTreeMap<String, Option<Vec<u8>>>>,
}

impl WriteBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.public.is_empty() && self.private.values().all(BTreeMap::is_empty)
    }
}

/// Committed storage under a `Ledger`.
///
/// Implementations must make `apply` atomic and record a history entry for
/// every plain (non-composite) public key it touches.
pub trait Backend: Send + Sync {
    /// Committed value of a key.
    fn get(&self, ns: Namespace<'_>, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Committed `(key, value)` pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(
        &self,
        ns: Namespace<'_>,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// History of a public key, oldest first.
    fn history(&self, key: &str) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Apply a batch atomically.
    fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError>;
}
