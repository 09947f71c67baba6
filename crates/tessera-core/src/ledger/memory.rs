//! In-memory ledger backend.
//!
//! All maps are `BTreeMap`s so scans come back in key order.

use super::{Backend, HistoryEntry, Namespace, WriteBatch, is_composite_key};
use crate::types::StoreError;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct MemoryState {
    state: BTreeMap<String, Vec<u8>>,
    private: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    history: BTreeMap<String, Vec<HistoryEntry>>,
}

/// Volatile backend. Data lives as long as the value.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<MemoryState>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed public keys, composite keys included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().state.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn scan(map: &BTreeMap<String, Vec<u8>>, prefix: &str) -> Vec<(String, Vec<u8>)> {
    map.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl Backend for MemoryBackend {
    fn get(&self, ns: Namespace<'_>, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.inner.read();
        Ok(match ns {
            Namespace::Public => inner.state.get(key).cloned(),
            Namespace::Private(collection) => inner
                .private
                .get(collection)
                .and_then(|c| c.get(key))
                .cloned(),
        })
    }

    fn scan_prefix(
        &self,
        ns: Namespace<'_>,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let inner = self.inner.read();
        Ok(match ns {
            Namespace::Public => scan(&inner.state, prefix),
            Namespace::Private(collection) => inner
                .private
                .get(collection)
                .map(|c| scan(c, prefix))
                .unwrap_or_default(),
        })
    }

    fn history(&self, key: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self
            .inner
            .read()
            .history
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        for (key, value) in &batch.public {
            match value {
                Some(bytes) => {
                    inner.state.insert(key.clone(), bytes.clone());
                }
                None => {
                    inner.state.remove(key);
                }
            }
            if !is_composite_key(key) {
                inner
                    .history
                    .entry(key.clone())
                    .or_default()
                    .push(HistoryEntry {
                        tx_id: batch.tx_id.clone(),
                        value: value.clone().unwrap_or_default(),
                        is_delete: value.is_none(),
                        timestamp: batch.timestamp,
                    });
            }
        }
        for (collection, writes) in &batch.private {
            let target = inner.private.entry(collection.clone()).or_default();
            for (key, value) in writes {
                match value {
                    Some(bytes) => {
                        target.insert(key.clone(), bytes.clone());
                    }
                    None => {
                        target.remove(key);
                    }
                }
            }
        }
        Ok(())
    }
}
