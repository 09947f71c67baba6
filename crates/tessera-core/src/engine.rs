//! # Engine
//!
//! Owner of every process-wide registry: data types, asset types, events
//! and the operation catalog. Built once at boot by [`EngineBuilder`],
//! whose final startup check is fatal on failure.
//!
//! The asset-type registry is the only piece mutated after boot, by the
//! dynamic registry operations. Sessions take an `Arc` snapshot of it, so a
//! swap never affects an operation already running.

use crate::access::allows_caller;
use crate::config::{EngineConfig, Header};
use crate::datatype::{DataType, DataTypeRegistry};
use crate::events::Event;
use crate::ledger::Stub;
use crate::primitives::REGISTRY_ASSET_TYPE;
use crate::schema::{AssetProp, AssetType, SchemaRegistry};
use crate::session::Session;
use crate::transactions::{self, Transaction};
use crate::types::{Result, ResultExt, TesseraError};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// ENGINE
// =============================================================================

/// The asset engine.
pub struct Engine {
    datatypes: Arc<DataTypeRegistry>,
    registry: RwLock<Arc<SchemaRegistry>>,
    /// Types registered at boot, kept for reconciliation.
    static_types: Vec<AssetType>,
    events: BTreeMap<String, Event>,
    transactions: BTreeMap<String, Transaction>,
    config: EngineConfig,
    /// `lastUpdated` of the last meta-asset loaded.
    registry_version: RwLock<Option<String>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("asset_types", &self.registry.read().list().len())
            .field("events", &self.events.len())
            .field("transactions", &self.transactions.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Snapshot of the current asset-type registry.
    #[must_use]
    pub fn registry(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.registry.read())
    }

    /// Install a registry that already passed its check.
    pub(crate) fn swap_registry(&self, registry: SchemaRegistry) {
        *self.registry.write() = Arc::new(registry);
    }

    pub(crate) fn static_types(&self) -> &[AssetType] {
        &self.static_types
    }

    pub(crate) fn registry_version(&self) -> Option<String> {
        self.registry_version.read().clone()
    }

    pub(crate) fn set_registry_version(&self, version: Option<String>) {
        *self.registry_version.write() = version;
    }

    #[must_use]
    pub fn datatypes(&self) -> &DataTypeRegistry {
        &self.datatypes
    }

    #[must_use]
    pub fn datatypes_handle(&self) -> Arc<DataTypeRegistry> {
        Arc::clone(&self.datatypes)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.config.header
    }

    /// Find an event. Fails 404.
    pub fn event(&self, tag: &str) -> Result<&Event> {
        self.events
            .get(tag)
            .ok_or_else(|| TesseraError::not_found(format!("event '{}' not found", tag)))
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    /// Find an operation. Fails 404.
    pub fn transaction(&self, tag: &str) -> Result<&Transaction> {
        self.transactions
            .get(tag)
            .ok_or_else(|| TesseraError::not_found(format!("transaction '{}' not found", tag)))
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    /// Private collections and their members, from the current registry.
    #[must_use]
    pub fn private_collections(&self) -> BTreeMap<String, Vec<String>> {
        self.registry.read().private_collections()
    }

    /// Open a session over a stub.
    pub fn session<'s>(&'s self, stub: &'s mut dyn Stub, tx: &str, read_only: bool) -> Session<'s> {
        Session::new(self, stub, tx, read_only)
    }

    /// Run a catalog operation.
    ///
    /// Checks callers, validates arguments, then runs the routine. Errors
    /// are wrapped with the operation tag and keep their status.
    pub fn invoke(&self, stub: &mut dyn Stub, tag: &str, args: &Value) -> Result<Value> {
        let tx = self.transaction(tag)?;
        if !allows_caller(tx.callers.as_deref(), stub.identity()) {
            return Err(TesseraError::forbidden(format!(
                "caller '{}' is not allowed to invoke '{}'",
                stub.identity().msp,
                tag
            )));
        }
        let raw = match args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => return Err(TesseraError::bad_request("arguments must be a JSON object").wrap(tag)),
        };

        let mut session = self.session(stub, tag, tx.read_only);
        let result = transactions::validate_args(&session, tx, &raw)
            .and_then(|args| tx.run(&mut session, &args))
            .map_err(|e| e.wrap(tag));
        match &result {
            Ok(_) => tracing::debug!(tx = tag, "transaction completed"),
            Err(e) => tracing::debug!(tx = tag, status = e.code(), "transaction failed: {}", e),
        }
        result
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Boot-time registration of every registry.
pub struct EngineBuilder {
    datatypes: DataTypeRegistry,
    types: Vec<AssetType>,
    events: Vec<Event>,
    transactions: Vec<Transaction>,
    config: EngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Builder with the built-in data types and no asset types.
    #[must_use]
    pub fn new() -> Self {
        Self {
            datatypes: DataTypeRegistry::with_builtins(),
            types: Vec::new(),
            events: Vec::new(),
            transactions: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// Register a custom data type.
    pub fn data_type(mut self, tag: &str, data_type: DataType) -> Result<Self> {
        self.datatypes.register(tag, data_type)?;
        Ok(self)
    }

    #[must_use]
    pub fn asset_types(mut self, types: Vec<AssetType>) -> Self {
        self.types.extend(types);
        self
    }

    #[must_use]
    pub fn event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    /// Add an application operation next to the built-ins.
    #[must_use]
    pub fn transaction(mut self, tx: Transaction) -> Self {
        self.transactions.push(tx);
        self
    }

    #[must_use]
    pub fn header(mut self, header: Header) -> Self {
        self.config.header = header;
        self
    }

    /// Replace the configuration, header included.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the startup check and build the engine.
    pub fn build(self) -> Result<Engine> {
        let datatypes = Arc::new(self.datatypes);

        let mut static_types = self.types;
        if !static_types.iter().any(|t| t.tag == REGISTRY_ASSET_TYPE) {
            static_types.push(registry_asset_type()?);
        }
        let mut registry = SchemaRegistry::new(Arc::clone(&datatypes));
        registry.register(static_types.clone());
        registry.check().wrap_err("startup check failed")?;

        let mut events = BTreeMap::new();
        for event in self.events {
            if events.contains_key(&event.tag) {
                return Err(TesseraError::bad_request(format!(
                    "duplicate event '{}'",
                    event.tag
                )));
            }
            events.insert(event.tag.clone(), event);
        }

        let mut catalog = BTreeMap::new();
        for tx in transactions::builtins()?.into_iter().chain(self.transactions) {
            if catalog.contains_key(&tx.tag) {
                return Err(TesseraError::bad_request(format!(
                    "duplicate transaction '{}'",
                    tx.tag
                )));
            }
            tx.check(&registry)
                .wrap_with(|| format!("transaction '{}'", tx.tag))?;
            catalog.insert(tx.tag.clone(), tx);
        }

        tracing::info!(
            asset_types = registry.list().len(),
            events = events.len(),
            transactions = catalog.len(),
            "engine ready"
        );

        Ok(Engine {
            datatypes,
            registry: RwLock::new(Arc::new(registry)),
            static_types,
            events,
            transactions: catalog,
            config: self.config,
            registry_version: RwLock::new(None),
        })
    }
}

/// Type of the registry meta-asset.
fn registry_asset_type() -> Result<AssetType> {
    Ok(AssetType::new(REGISTRY_ASSET_TYPE, "Asset Type List")
        .description("Persisted list of the asset types in use")
        .prop(AssetProp::new("id", "string")?.label("ID").key())
        .prop(AssetProp::new("list", "[]@object")?.label("List").required())
        .prop(AssetProp::new("lastUpdated", "datetime")?.label("Last Updated")))
}
