//! # Write-set Wrapper
//!
//! Per-operation overlay over a `Stub`. The substrate does not show a
//! transaction its own uncommitted writes; the wrapper does.
//!
//! - reads consult the overlay first (`None` marks a deletion)
//! - writes go to the overlay and to the substrate
//! - composite range scans merge the overlay into the substrate result
//! - private hashes of overlay entries are computed locally
//!
//! The overlay lives as long as the wrapper, which lives as long as one
//! operation's session.

use crate::ledger::{HistoryEntry, PageRequest, QueryPage, Stub, create_composite_key};
use crate::types::{Identity, Result, StoreError};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

type Overlay = BTreeMap<String, Option<Vec<u8>>>;

/// Overlay over a borrowed stub.
pub struct StubWrapper<'s> {
    stub: &'s mut dyn Stub,
    public: Overlay,
    private: BTreeMap<String, Overlay>,
}

impl std::fmt::Debug for StubWrapper<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubWrapper")
            .field("tx_id", &self.stub.tx_id())
            .field("public_writes", &self.public.len())
            .field("private_collections", &self.private.len())
            .finish()
    }
}

impl<'s> StubWrapper<'s> {
    pub fn new(stub: &'s mut dyn Stub) -> Self {
        Self {
            stub,
            public: BTreeMap::new(),
            private: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn tx_id(&self) -> &str {
        self.stub.tx_id()
    }

    #[must_use]
    pub fn tx_timestamp(&self) -> DateTime<Utc> {
        self.stub.tx_timestamp()
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        self.stub.identity()
    }

    #[must_use]
    pub fn transient(&self) -> &BTreeMap<String, Vec<u8>> {
        self.stub.transient()
    }

    // =========================================================================
    // PUBLIC STATE
    // =========================================================================

    /// Read with read-your-writes.
    pub fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.public.get(key) {
            Some(entry) => Ok(entry.clone()),
            None => Ok(self.stub.get_state(key)?),
        }
    }

    /// Read committed state, bypassing the overlay.
    pub fn get_committed(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.stub.get_state(key)?)
    }

    pub fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.stub.put_state(key, value.clone())?;
        self.public.insert(key.to_string(), Some(value));
        Ok(())
    }

    pub fn del_state(&mut self, key: &str) -> Result<()> {
        self.stub.del_state(key)?;
        self.public.insert(key.to_string(), None);
        Ok(())
    }

    /// Composite range scan merged with the overlay, in key order.
    pub fn get_state_by_partial_composite_key(
        &self,
        object_type: &str,
        attributes: &[&str],
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let prefix = create_composite_key(object_type, attributes)?;
        let mut merged: BTreeMap<String, Vec<u8>> = self
            .stub
            .get_state_by_partial_composite_key(object_type, attributes)?
            .into_iter()
            .collect();
        for (key, entry) in self.public.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            match entry {
                Some(bytes) => {
                    merged.insert(key.clone(), bytes.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Rich query against committed state.
    pub fn get_query_result(&self, query: &Value, page: Option<&PageRequest>) -> Result<QueryPage> {
        Ok(self.stub.get_query_result(query, page)?)
    }

    pub fn get_history_for_key(&self, key: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self.stub.get_history_for_key(key)?)
    }

    // =========================================================================
    // PRIVATE DATA
    // =========================================================================

    fn private_overlay(&self, collection: &str, key: &str) -> Option<&Option<Vec<u8>>> {
        self.private.get(collection).and_then(|c| c.get(key))
    }

    /// Read a private value. Non-members get a 403.
    pub fn get_private_data(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>> {
        match self.private_overlay(collection, key) {
            Some(entry) => Ok(entry.clone()),
            None => Ok(self.stub.get_private_data(collection, key)?),
        }
    }

    /// Read a private value, or `Err(AccessDenied)` unconverted so callers
    /// can fall back to the hash.
    pub fn try_get_private_data(
        &self,
        collection: &str,
        key: &str,
    ) -> std::result::Result<Option<Vec<u8>>, StoreError> {
        match self.private_overlay(collection, key) {
            Some(entry) => Ok(entry.clone()),
            None => self.stub.get_private_data(collection, key),
        }
    }

    /// Hash of a private value; overlay entries are hashed locally.
    pub fn get_private_data_hash(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>> {
        match self.private_overlay(collection, key) {
            Some(Some(bytes)) => Ok(Some(blake3::hash(bytes).as_bytes().to_vec())),
            Some(None) => Ok(None),
            None => Ok(self.stub.get_private_data_hash(collection, key)?),
        }
    }

    /// Committed private hash, bypassing the overlay.
    pub fn get_committed_private_hash(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.stub.get_private_data_hash(collection, key)?)
    }

    pub fn put_private_data(&mut self, collection: &str, key: &str, value: Vec<u8>) -> Result<()> {
        self.stub.put_private_data(collection, key, value.clone())?;
        self.private
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), Some(value));
        Ok(())
    }

    pub fn del_private_data(&mut self, collection: &str, key: &str) -> Result<()> {
        self.stub.del_private_data(collection, key)?;
        self.private
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), None);
        Ok(())
    }

    pub fn get_private_query_result(&self, collection: &str, query: &Value) -> Result<QueryPage> {
        Ok(self.stub.get_private_query_result(collection, query)?)
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    pub fn set_event(&mut self, name: &str, payload: Vec<u8>) -> Result<()> {
        Ok(self.stub.set_event(name, payload)?)
    }
}
