//! # Session
//!
//! One operation's view of the engine: a registry snapshot, the caller's
//! stub behind a write-set wrapper, and the operation tag recorded in
//! `@lastTx`. Every CRUD path goes through here:
//!
//! - `put` / `put_new` / `put_recursive`
//! - `get` / `get_recursive`
//! - `update` / `update_recursive`
//! - `delete` / `delete_cascade`
//! - `exists` / `committed`
//!
//! Writes update the reference index before the asset itself; recursive
//! writes persist children before parents.

use crate::access::allows_writer;
use crate::asset::Asset;
use crate::datatype::format_rfc3339;
use crate::engine::Engine;
use crate::key::{Key, with_asset_type};
use crate::ledger::Stub;
use crate::primitives::{
    ATTR_ASSET_TYPE, ATTR_HASH, ATTR_KEY, MAX_RESOLVE_DEPTH, WRITE_METADATA,
};
use crate::refs;
use crate::schema::{AssetType, SchemaRegistry};
use crate::types::{Identity, Result, ResultExt, StoreError, TesseraError};
use crate::wrapper::StubWrapper;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

/// Per-operation engine handle.
#[derive(Debug)]
pub struct Session<'s> {
    engine: &'s Engine,
    registry: Arc<SchemaRegistry>,
    stub: StubWrapper<'s>,
    tx: String,
    read_only: bool,
}

impl<'s> Session<'s> {
    pub(crate) fn new(engine: &'s Engine, stub: &'s mut dyn Stub, tx: &str, read_only: bool) -> Self {
        Self {
            engine,
            registry: engine.registry(),
            stub: StubWrapper::new(stub),
            tx: tx.to_string(),
            read_only,
        }
    }

    #[must_use]
    pub fn engine(&self) -> &'s Engine {
        self.engine
    }

    /// Registry snapshot taken when the session opened.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Pick up a registry swapped in by this operation.
    pub(crate) fn refresh_registry(&mut self) {
        self.registry = self.engine.registry();
    }

    #[must_use]
    pub fn stub(&self) -> &StubWrapper<'s> {
        &self.stub
    }

    pub fn stub_mut(&mut self) -> &mut StubWrapper<'s> {
        &mut self.stub
    }

    /// Operation tag.
    #[must_use]
    pub fn tx(&self) -> &str {
        &self.tx
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        self.stub.identity()
    }

    /// Transaction timestamp, RFC3339.
    #[must_use]
    pub fn timestamp(&self) -> String {
        format_rfc3339(&self.stub.tx_timestamp())
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(TesseraError::internal(format!(
                "write attempted by read-only operation '{}'",
                self.tx
            )));
        }
        Ok(())
    }

    /// Fail 403 unless the caller may set every declared property present in `map`.
    /// Creation passes the built asset, so defaulted properties are checked too.
    pub fn check_writers(&self, asset_type: &AssetType, map: &Map<String, Value>) -> Result<()> {
        let msp = &self.identity().msp;
        for (tag, value) in map {
            if tag.starts_with('@') || value.is_null() {
                continue;
            }
            let Some(prop) = asset_type.get_prop(tag) else {
                continue;
            };
            if !allows_writer(&prop.writers, msp) {
                return Err(TesseraError::forbidden(format!(
                    "caller '{}' is not allowed to write property '{}'",
                    msp, tag
                )));
            }
        }
        Ok(())
    }

    // =========================================================================
    // STORAGE ROUTING
    // =========================================================================

    /// Load an asset through the overlay. Private reads by non-members fail 403.
    pub(crate) fn load(&self, key: &Key) -> Result<Option<Asset>> {
        let asset_type = self.registry.require(&key.asset_type)?;
        let bytes = match asset_type.collection() {
            Some(collection) => self.stub.get_private_data(collection, &key.key)?,
            None => self.stub.get_state(&key.key)?,
        };
        bytes.map(|b| Asset::from_bytes(&b)).transpose()
    }

    fn load_required(&self, key: &Key) -> Result<Asset> {
        self.load(key)?
            .ok_or_else(|| TesseraError::not_found(format!("asset '{}' not found", key)))
    }

    /// Pre-image of a write. Private pre-images the caller cannot read are skipped.
    fn pre_image(&self, asset_type: &AssetType, key: &Key) -> Result<Option<Asset>> {
        let bytes = match asset_type.collection() {
            Some(collection) => match self.stub.try_get_private_data(collection, &key.key) {
                Ok(bytes) => bytes,
                Err(StoreError::AccessDenied(_)) => None,
                Err(e) => return Err(e.into()),
            },
            None => self.stub.get_state(&key.key)?,
        };
        bytes.map(|b| Asset::from_bytes(&b)).transpose()
    }

    /// Persist a validated asset: metadata, reference index, then the record.
    fn write(&mut self, mut asset: Asset) -> Result<Asset> {
        self.ensure_writable()?;
        let registry = Arc::clone(&self.registry);
        let asset_type = asset.definition(&registry)?;

        let msp = self.identity().msp.clone();
        let timestamp = self.timestamp();
        asset.inject_metadata(&msp, &self.tx, &timestamp);

        if let Some(previous) = self.pre_image(asset_type, &asset.key())? {
            refs::del_refs(&mut self.stub, &registry, &previous)?;
        }
        refs::put_refs(&mut self.stub, &registry, &asset)?;
        refs::validate_refs(&self.stub, &registry, &asset)?;

        let bytes = asset.to_bytes()?;
        match asset_type.collection() {
            Some(collection) => self.stub.put_private_data(collection, asset.key_str(), bytes)?,
            None => self.stub.put_state(asset.key_str(), bytes)?,
        }
        tracing::debug!(key = asset.key_str(), tx = %self.tx, "asset written");
        Ok(asset)
    }

    /// Remove an asset and the reference records it owns.
    fn remove(&mut self, asset: &Asset) -> Result<()> {
        self.ensure_writable()?;
        let registry = Arc::clone(&self.registry);
        let asset_type = asset.definition(&registry)?;
        refs::del_refs(&mut self.stub, &registry, asset)?;
        match asset_type.collection() {
            Some(collection) => self.stub.del_private_data(collection, asset.key_str())?,
            None => self.stub.del_state(asset.key_str())?,
        }
        tracing::debug!(key = asset.key_str(), tx = %self.tx, "asset deleted");
        Ok(())
    }

    /// Caller-facing form of a written asset: full for public, key for private.
    fn render_written(&self, asset: &Asset) -> Value {
        match self.registry.fetch(asset.asset_type()) {
            Some(t) if t.is_private() => asset.key().to_value(),
            _ => asset.to_value(),
        }
    }

    // =========================================================================
    // CREATE
    // =========================================================================

    /// Create or replace an asset.
    pub fn put(&mut self, raw: &Map<String, Value>) -> Result<Value> {
        let asset = self.put_asset(raw)?;
        Ok(self.render_written(&asset))
    }

    pub(crate) fn put_asset(&mut self, raw: &Map<String, Value>) -> Result<Asset> {
        let asset = Asset::new(&self.registry, raw)?;
        self.check_writers(asset.definition(&self.registry)?, asset.as_map())?;
        self.write(asset)
    }

    /// Create an asset. Fails 409 if its key exists.
    pub fn put_new(&mut self, raw: &Map<String, Value>) -> Result<Value> {
        let asset = Asset::new(&self.registry, raw)?;
        self.check_writers(asset.definition(&self.registry)?, asset.as_map())?;
        if self.exists(&asset.key())? {
            return Err(TesseraError::conflict(format!(
                "asset already exists: '{}'",
                asset.key()
            )));
        }
        let asset = self.write(asset)?;
        Ok(self.render_written(&asset))
    }

    /// Create or replace an asset embedding full sub-assets under its
    /// reference properties. Existing sub-assets are updated.
    pub fn put_recursive(&mut self, raw: &Map<String, Value>) -> Result<Value> {
        let asset = self.materialize(raw, 0, false)?;
        Ok(self.render_written(&asset))
    }

    /// Update an asset embedding sub-asset patches under its reference properties.
    pub fn update_recursive(&mut self, patch: &Map<String, Value>) -> Result<Value> {
        let asset = self.materialize(patch, 0, true)?;
        Ok(self.render_written(&asset))
    }

    fn materialize(&mut self, raw: &Map<String, Value>, depth: usize, update: bool) -> Result<Asset> {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(TesseraError::bad_request("sub-asset nesting too deep"));
        }
        let registry = Arc::clone(&self.registry);
        let tag = match raw.get(ATTR_ASSET_TYPE) {
            Some(Value::String(tag)) => tag.as_str(),
            _ => return Err(TesseraError::bad_request("@assetType must be a string")),
        };
        let asset_type = registry.require(tag)?;

        let mut flat = raw.clone();
        for prop in asset_type.ref_props() {
            let (Some(target), Some(value)) = (prop.data_type.ref_target(), raw.get(&prop.tag))
            else {
                continue;
            };
            let replaced = match value {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| self.materialize_ref(target, item, depth, update))
                        .collect::<Result<_>>()?,
                ),
                other => self.materialize_ref(target, other, depth, update)?,
            };
            flat.insert(prop.tag.clone(), replaced);
        }

        if update {
            self.update_asset(&flat)
        } else {
            self.put_asset(&flat)
        }
    }

    fn materialize_ref(&mut self, target: &str, value: &Value, depth: usize, update: bool) -> Result<Value> {
        let Value::Object(map) = value else {
            return Ok(value.clone());
        };
        if !self.is_embedded(target, map)? {
            return Ok(value.clone());
        }
        let sub = with_asset_type(map, target)?;
        let existing = self.exists(&Key::from_map(&self.registry, &sub)?)?;
        let child = self
            .materialize(&sub, depth + 1, update || existing)
            .wrap_with(|| format!("sub-asset of type '{}'", target))?;
        Ok(child.key().to_value())
    }

    /// An embedded object is a sub-asset when it carries non-key properties,
    /// or carries only key properties of an asset that does not exist yet.
    fn is_embedded(&self, target: &str, map: &Map<String, Value>) -> Result<bool> {
        let asset_type = self.registry.require(target)?;
        let mut props = map.keys().filter(|k| !k.starts_with('@')).peekable();
        if props.peek().is_none() {
            return Ok(false);
        }
        if props.any(|k| asset_type.get_prop(k).is_some_and(|p| !p.is_key)) {
            return Ok(true);
        }
        let key = Key::from_reference(&self.registry, target, &Value::Object(map.clone()))?;
        Ok(!self.exists(&key)?)
    }

    // =========================================================================
    // READ
    // =========================================================================

    /// Read an asset. Fails 404 when absent.
    pub fn get(&self, key: &Key) -> Result<Value> {
        Ok(self.load_required(key)?.to_value())
    }

    /// Read an asset with its references expanded.
    ///
    /// Expansion is tracked per branch: a key already expanded on the
    /// current branch is replaced by its stored record, unexpanded.
    /// Private sub-assets the caller cannot read become hash stubs.
    pub fn get_recursive(&self, key: &Key) -> Result<Value> {
        let asset = self.load_required(key)?;
        let mut branch = BTreeSet::from([key.key.clone()]);
        self.resolve_asset(asset, &mut branch, 0)
    }

    pub(crate) fn resolve_asset(&self, asset: Asset, branch: &mut BTreeSet<String>, depth: usize) -> Result<Value> {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(TesseraError::bad_request("reference chain too deep"));
        }
        let registry = Arc::clone(&self.registry);
        let asset_type = asset.definition(&registry)?;
        let mut out = asset.into_map();
        for prop in asset_type.ref_props() {
            let (Some(target), Some(value)) = (prop.data_type.ref_target(), out.get(&prop.tag))
            else {
                continue;
            };
            let resolved = match value {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::Null => Ok(Value::Null),
                            _ => self.resolve_ref(target, item, branch, depth),
                        })
                        .collect::<Result<_>>()?,
                ),
                Value::Null => continue,
                other => self.resolve_ref(target, other, branch, depth)?,
            };
            out.insert(prop.tag.clone(), resolved);
        }
        Ok(Value::Object(out))
    }

    fn resolve_ref(&self, target: &str, value: &Value, branch: &mut BTreeSet<String>, depth: usize) -> Result<Value> {
        let key = Key::from_reference(&self.registry, target, value)?;
        let asset_type = self.registry.require(&key.asset_type)?;
        let bytes = match asset_type.collection() {
            Some(collection) => match self.stub.try_get_private_data(collection, &key.key) {
                Ok(bytes) => bytes,
                Err(StoreError::AccessDenied(_)) => return self.hash_stub(collection, &key),
                Err(e) => return Err(e.into()),
            },
            None => self.stub.get_state(&key.key)?,
        };
        let asset = bytes
            .map(|b| Asset::from_bytes(&b))
            .transpose()?
            .ok_or_else(|| TesseraError::not_found(format!("referenced asset '{}' not found", key)))?;

        if branch.contains(&key.key) {
            return Ok(asset.to_value());
        }
        branch.insert(key.key.clone());
        let resolved = self.resolve_asset(asset, branch, depth + 1);
        branch.remove(&key.key);
        resolved
    }

    fn hash_stub(&self, collection: &str, key: &Key) -> Result<Value> {
        let hash = self
            .stub
            .get_private_data_hash(collection, &key.key)?
            .ok_or_else(|| TesseraError::not_found(format!("referenced asset '{}' not found", key)))?;
        tracing::warn!(key = %key, collection, "private sub-asset unreadable, returning hash");
        let mut stub = Map::new();
        stub.insert(ATTR_ASSET_TYPE.into(), Value::String(key.asset_type.clone()));
        stub.insert(ATTR_KEY.into(), Value::String(key.key.clone()));
        stub.insert(ATTR_HASH.into(), Value::String(STANDARD.encode(hash)));
        Ok(Value::Object(stub))
    }

    // =========================================================================
    // UPDATE
    // =========================================================================

    /// Merge a patch into the stored asset. Key properties in the patch
    /// select the asset and are otherwise ignored.
    pub fn update(&mut self, patch: &Map<String, Value>) -> Result<Value> {
        let asset = self.update_asset(patch)?;
        Ok(self.render_written(&asset))
    }

    pub(crate) fn update_asset(&mut self, patch: &Map<String, Value>) -> Result<Asset> {
        let registry = Arc::clone(&self.registry);
        let key = Key::from_map(&registry, patch)?;
        let asset_type = registry.require(&key.asset_type)?;
        let current = self.load_required(&key)?;
        self.check_writers(asset_type, patch)?;

        let mut merged = current.into_map();
        for attr in WRITE_METADATA {
            merged.remove(attr);
        }
        for (tag, value) in patch {
            if tag.starts_with('@') {
                continue;
            }
            let prop = asset_type.get_prop(tag).ok_or_else(|| {
                TesseraError::bad_request(format!(
                    "property '{}' is not declared on asset type '{}'",
                    tag, asset_type.tag
                ))
            })?;
            if prop.is_key {
                continue;
            }
            if prop.read_only {
                return Err(TesseraError::forbidden(format!(
                    "property '{}' is read-only",
                    tag
                )));
            }
            if value.is_null() {
                merged.remove(tag);
            } else {
                merged.insert(tag.clone(), value.clone());
            }
        }

        let asset = Asset::new(&registry, &merged)?;
        self.write(asset)
    }

    // =========================================================================
    // DELETE
    // =========================================================================

    /// Delete an unreferenced asset and return its last state.
    pub fn delete(&mut self, key: &Key) -> Result<Value> {
        self.ensure_writable()?;
        let asset = self.load_required(key)?;
        if refs::is_referenced(&self.stub, key)? {
            return Err(TesseraError::bad_request(
                "another asset holds a reference to this one",
            ));
        }
        self.remove(&asset)?;
        Ok(asset.to_value())
    }

    /// Delete an asset and, transitively, every asset referring to it.
    ///
    /// Returns the deleted keys in discovery order, target first.
    pub fn delete_cascade(&mut self, key: &Key) -> Result<Vec<Key>> {
        self.ensure_writable()?;
        self.load_required(key)?;

        let mut order = vec![key.clone()];
        let mut visited = BTreeSet::from([key.clone()]);
        let mut queue = VecDeque::from([key.clone()]);
        while let Some(current) = queue.pop_front() {
            for referrer in refs::referrers(&self.stub, &current)? {
                if visited.insert(referrer.clone()) {
                    order.push(referrer.clone());
                    queue.push_back(referrer);
                }
            }
        }

        for target in order.iter().rev() {
            if let Some(asset) = self.load(target)? {
                self.remove(&asset)?;
            }
        }
        tracing::debug!(root = %key, deleted = order.len(), "cascade delete");
        Ok(order)
    }

    // =========================================================================
    // VISIBILITY
    // =========================================================================

    /// Visible to this operation, uncommitted writes included.
    pub fn exists(&self, key: &Key) -> Result<bool> {
        refs::exists_in(&self.stub, &self.registry, key)
    }

    /// Present in committed state.
    pub fn committed(&self, key: &Key) -> Result<bool> {
        let asset_type = self.registry.require(&key.asset_type)?;
        match asset_type.collection() {
            Some(collection) => Ok(self
                .stub
                .get_committed_private_hash(collection, &key.key)?
                .is_some()),
            None => Ok(self.stub.get_committed(&key.key)?.is_some()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
