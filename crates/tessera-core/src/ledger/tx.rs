//! Ledger front and its transactions.

use super::{
    Backend, EmittedEvent, HistoryEntry, Namespace, PageRequest, QueryPage, RichQuery, Stub,
    WriteBatch, create_composite_key, is_composite_key,
};
use crate::types::{Identity, StoreError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Maximum number of published events kept in memory.
const EVENT_LOG_CAPACITY: usize = 1024;

/// A transactional ledger over a backend.
///
/// Shareable across threads; each operation opens its own `LedgerTx`.
#[derive(Debug)]
pub struct Ledger<B: Backend> {
    backend: B,
    /// Private collection -> member MSPs. Undeclared collections are open.
    collections: RwLock<BTreeMap<String, Vec<String>>>,
    events: Mutex<Vec<EmittedEvent>>,
}

/// Outcome of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub tx_id: String,
    pub timestamp: DateTime<Utc>,
    /// Public and private keys written or deleted.
    pub writes: usize,
    pub events: usize,
}

impl<B: Backend> Ledger<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            collections: RwLock::new(BTreeMap::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Declare the members of one private collection.
    pub fn set_collection_members(&self, collection: &str, members: Vec<String>) {
        self.collections
            .write()
            .insert(collection.to_string(), members);
    }

    /// Declare every private collection at once, replacing prior declarations.
    pub fn configure_collections(&self, collections: BTreeMap<String, Vec<String>>) {
        *self.collections.write() = collections;
    }

    /// Open a transaction for the given caller.
    #[must_use]
    pub fn begin(&self, identity: Identity) -> LedgerTx<'_, B> {
        self.begin_with_transient(identity, BTreeMap::new())
    }

    /// Open a transaction carrying transient data.
    #[must_use]
    pub fn begin_with_transient(
        &self,
        identity: Identity,
        transient: BTreeMap<String, Vec<u8>>,
    ) -> LedgerTx<'_, B> {
        LedgerTx {
            ledger: self,
            tx_id: Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now(),
            identity,
            transient,
            batch_public: BTreeMap::new(),
            batch_private: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Committed value of a public key.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.backend.get(Namespace::Public, key)
    }

    /// Published events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<EmittedEvent> {
        self.events.lock().clone()
    }

    fn is_member(&self, collection: &str, msp: &str) -> bool {
        self.collections
            .read()
            .get(collection)
            .is_none_or(|members| members.iter().any(|m| m == msp))
    }
}

/// One open transaction.
///
/// Reads see committed state only. Writes are buffered until `commit`.
pub struct LedgerTx<'l, B: Backend> {
    ledger: &'l Ledger<B>,
    tx_id: String,
    timestamp: DateTime<Utc>,
    identity: Identity,
    transient: BTreeMap<String, Vec<u8>>,
    batch_public: BTreeMap<String, Option<Vec<u8>>>,
    batch_private: BTreeMap<String, BTreeMap<String, Option<Vec<u8>>>>,
    events: Vec<(String, Vec<u8>)>,
}

impl<B: Backend> std::fmt::Debug for LedgerTx<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerTx")
            .field("tx_id", &self.tx_id)
            .field("msp", &self.identity.msp)
            .field("pending_writes", &self.pending_writes())
            .finish_non_exhaustive()
    }
}

impl<B: Backend> LedgerTx<'_, B> {
    /// Override the transaction timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Buffered writes, public and private.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.batch_public.len() + self.batch_private.values().map(BTreeMap::len).sum::<usize>()
    }

    /// Apply buffered writes atomically, then publish buffered events.
    pub fn commit(self) -> Result<CommitReceipt, StoreError> {
        let writes = self.pending_writes();
        let batch = WriteBatch {
            tx_id: self.tx_id.clone(),
            timestamp: self.timestamp,
            public: self.batch_public,
            private: self.batch_private,
        };
        if !batch.is_empty() {
            self.ledger.backend.apply(&batch)?;
        }

        let published = self.events.len();
        if published > 0 {
            let mut log = self.ledger.events.lock();
            for (name, payload) in self.events {
                log.push(EmittedEvent {
                    tx_id: self.tx_id.clone(),
                    name,
                    payload,
                });
            }
            let overflow = log.len().saturating_sub(EVENT_LOG_CAPACITY);
            log.drain(..overflow);
        }

        tracing::debug!(tx_id = %self.tx_id, writes, events = published, "ledger commit");
        Ok(CommitReceipt {
            tx_id: self.tx_id,
            timestamp: self.timestamp,
            writes,
            events: published,
        })
    }

    fn check_member(&self, collection: &str) -> Result<(), StoreError> {
        if self.ledger.is_member(collection, &self.identity.msp) {
            Ok(())
        } else {
            Err(StoreError::AccessDenied(collection.to_string()))
        }
    }
}

fn check_plain_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("empty key".into()));
    }
    Ok(())
}

impl<B: Backend> Stub for LedgerTx<'_, B> {
    fn tx_id(&self) -> &str {
        &self.tx_id
    }

    fn tx_timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn transient(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.transient
    }

    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.ledger.backend.get(Namespace::Public, key)
    }

    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        check_plain_key(key)?;
        self.batch_public.insert(key.to_string(), Some(value));
        Ok(())
    }

    fn del_state(&mut self, key: &str) -> Result<(), StoreError> {
        check_plain_key(key)?;
        self.batch_public.insert(key.to_string(), None);
        Ok(())
    }

    fn get_state_by_partial_composite_key(
        &self,
        object_type: &str,
        attributes: &[&str],
    ) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let prefix = create_composite_key(object_type, attributes)?;
        self.ledger.backend.scan_prefix(Namespace::Public, &prefix)
    }

    fn get_query_result(
        &self,
        query: &Value,
        page: Option<&PageRequest>,
    ) -> Result<QueryPage, StoreError> {
        let rich = RichQuery::parse(query)?;
        let records: Vec<_> = self
            .ledger
            .backend
            .scan_prefix(Namespace::Public, "")?
            .into_iter()
            .filter(|(k, _)| !is_composite_key(k))
            .collect();
        rich.run(records, page)
    }

    fn get_history_for_key(&self, key: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        self.ledger.backend.history(key)
    }

    fn get_private_data(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_member(collection)?;
        self.ledger.backend.get(Namespace::Private(collection), key)
    }

    fn get_private_data_hash(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .ledger
            .backend
            .get(Namespace::Private(collection), key)?
            .map(|bytes| blake3::hash(&bytes).as_bytes().to_vec()))
    }

    fn put_private_data(
        &mut self,
        collection: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), StoreError> {
        check_plain_key(key)?;
        self.batch_private
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), Some(value));
        Ok(())
    }

    fn del_private_data(&mut self, collection: &str, key: &str) -> Result<(), StoreError> {
        check_plain_key(key)?;
        self.batch_private
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), None);
        Ok(())
    }

    fn get_private_query_result(
        &self,
        collection: &str,
        query: &Value,
    ) -> Result<QueryPage, StoreError> {
        self.check_member(collection)?;
        let rich = RichQuery::parse(query)?;
        let records = self
            .ledger
            .backend
            .scan_prefix(Namespace::Private(collection), "")?;
        rich.run(records, None)
    }

    fn set_event(&mut self, name: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::InvalidKey("event name is empty".into()));
        }
        self.events.push((name.to_string(), payload));
        Ok(())
    }
}
