//! # redb-backed Ledger Storage
//!
//! A disk-backed ledger backend using the redb embedded database.
//!
//! - ACID: one redb write transaction per committed ledger transaction
//! - Crash safety (copy-on-write B-trees)
//! - MVCC: queries run on read transactions and never block a commit
//!
//! History entries are encoded with postcard; asset payloads are stored
//! as the opaque bytes the engine hands over.

use super::{Backend, HistoryEntry, Namespace, WriteBatch, is_composite_key};
use crate::types::StoreError;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::fmt::Display;
use std::path::Path;

/// Table for public state: key -> bytes
const STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("state");

/// Table for private collections: (collection, key) -> bytes
const PRIVATE: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("private");

/// Table for history: (key, sequence) -> postcard `HistoryEntry`
const HISTORY: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("history");

fn io<E: Display>(e: E) -> StoreError {
    StoreError::Io(e.to_string())
}

/// A persistent ledger backend.
pub struct RedbBackend {
    db: Database,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend").finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Open or create a ledger database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        // Create the tables so read transactions never see a missing table.
        {
            let write_txn = db.begin_write().map_err(io)?;
            let _ = write_txn.open_table(STATE).map_err(io)?;
            let _ = write_txn.open_table(PRIVATE).map_err(io)?;
            let _ = write_txn.open_table(HISTORY).map_err(io)?;
            write_txn.commit().map_err(io)?;
        }

        Ok(Self { db })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), StoreError> {
        self.db.compact().map_err(io)?;
        Ok(())
    }
}

impl Backend for RedbBackend {
    fn get(&self, ns: Namespace<'_>, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        match ns {
            Namespace::Public => {
                let table = read_txn.open_table(STATE).map_err(io)?;
                Ok(table.get(key).map_err(io)?.map(|v| v.value().to_vec()))
            }
            Namespace::Private(collection) => {
                let table = read_txn.open_table(PRIVATE).map_err(io)?;
                Ok(table
                    .get((collection, key))
                    .map_err(io)?
                    .map(|v| v.value().to_vec()))
            }
        }
    }

    fn scan_prefix(
        &self,
        ns: Namespace<'_>,
        prefix: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let mut out = Vec::new();
        match ns {
            Namespace::Public => {
                let table = read_txn.open_table(STATE).map_err(io)?;
                for entry in table.range(prefix..).map_err(io)? {
                    let (key, value) = entry.map_err(io)?;
                    let key = key.value();
                    if !key.starts_with(prefix) {
                        break;
                    }
                    out.push((key.to_string(), value.value().to_vec()));
                }
            }
            Namespace::Private(collection) => {
                let table = read_txn.open_table(PRIVATE).map_err(io)?;
                for entry in table.range((collection, prefix)..).map_err(io)? {
                    let (key, value) = entry.map_err(io)?;
                    let (owner, key) = key.value();
                    if owner != collection || !key.starts_with(prefix) {
                        break;
                    }
                    out.push((key.to_string(), value.value().to_vec()));
                }
            }
        }
        Ok(out)
    }

    fn history(&self, key: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(HISTORY).map_err(io)?;

        let mut entries = Vec::new();
        for entry in table.range((key, 0u64)..=(key, u64::MAX)).map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            let decoded: HistoryEntry = postcard::from_bytes(value.value())
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            entries.push(decoded);
        }
        Ok(entries)
    }

    fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write().map_err(io)?;
        {
            let mut state = write_txn.open_table(STATE).map_err(io)?;
            let mut history = write_txn.open_table(HISTORY).map_err(io)?;
            for (key, value) in &batch.public {
                match value {
                    Some(bytes) => {
                        state.insert(key.as_str(), bytes.as_slice()).map_err(io)?;
                    }
                    None => {
                        state.remove(key.as_str()).map_err(io)?;
                    }
                }
                if is_composite_key(key) {
                    continue;
                }

                let next_seq = history
                    .range((key.as_str(), 0u64)..=(key.as_str(), u64::MAX))
                    .map_err(io)?
                    .next_back()
                    .transpose()
                    .map_err(io)?
                    .map_or(0, |(k, _)| k.value().1.saturating_add(1));
                let entry = HistoryEntry {
                    tx_id: batch.tx_id.clone(),
                    value: value.clone().unwrap_or_default(),
                    is_delete: value.is_none(),
                    timestamp: batch.timestamp,
                };
                let encoded = postcard::to_allocvec(&entry)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                history
                    .insert((key.as_str(), next_seq), encoded.as_slice())
                    .map_err(io)?;
            }

            let mut private = write_txn.open_table(PRIVATE).map_err(io)?;
            for (collection, writes) in &batch.private {
                for (key, value) in writes {
                    match value {
                        Some(bytes) => {
                            private
                                .insert((collection.as_str(), key.as_str()), bytes.as_slice())
                                .map_err(io)?;
                        }
                        None => {
                            private
                                .remove((collection.as_str(), key.as_str()))
                                .map_err(io)?;
                        }
                    }
                }
            }
        }
        write_txn.commit().map_err(io)?;
        Ok(())
    }
}
