//! # Host
//!
//! An engine bound to a ledger. Each call runs in its own ledger
//! transaction; mutating operations commit on success, read-only ones
//! never do. A failed operation drops its transaction, so nothing it
//! wrote becomes visible.

use crate::config::{AppConfig, BackendKind};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use tessera_core::{
    Backend, Engine, Identity, Ledger, MemoryBackend, RedbBackend, TesseraError,
};

/// Caller identity used for boot-time maintenance.
const SYSTEM_MSP: &str = "tessera-host";

/// Ledger with its backend fixed at open time.
enum Store {
    Memory(Ledger<MemoryBackend>),
    Redb(Ledger<RedbBackend>),
}

/// Engine plus ledger.
pub struct Host {
    engine: Engine,
    store: Store,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.store {
            Store::Memory(_) => "memory",
            Store::Redb(_) => "redb",
        };
        f.debug_struct("Host")
            .field("engine", &self.engine)
            .field("backend", &backend)
            .finish()
    }
}

impl Host {
    /// Build the engine from `config` and open the configured ledger.
    /// `database` overrides `storage.path`.
    pub fn open(config: &AppConfig, database: Option<&Path>) -> Result<Self, TesseraError> {
        let engine = Engine::builder()
            .asset_types(config.asset_types()?)
            .config(config.engine_config())
            .build()?;

        let path = database.unwrap_or(&config.storage.path);
        let host = match config.storage.backend {
            BackendKind::Memory => Self::in_memory(engine),
            BackendKind::Redb => Self::with_redb(engine, path)?,
        };
        host.reload_asset_types()?;
        Ok(host)
    }

    /// Host over a fresh in-memory ledger.
    #[must_use]
    pub fn in_memory(engine: Engine) -> Self {
        let ledger = Ledger::new(MemoryBackend::new());
        ledger.configure_collections(engine.private_collections());
        Self {
            engine,
            store: Store::Memory(ledger),
        }
    }

    /// Host over a redb file, created if missing.
    pub fn with_redb(engine: Engine, path: &Path) -> Result<Self, TesseraError> {
        let ledger = Ledger::new(RedbBackend::open(path)?);
        ledger.configure_collections(engine.private_collections());
        tracing::info!(path = %path.display(), "redb ledger opened");
        Ok(Self {
            engine,
            store: Store::Redb(ledger),
        })
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        match &self.store {
            Store::Memory(_) => "memory",
            Store::Redb(_) => "redb",
        }
    }

    /// Run any catalog operation. Mutating operations commit on success.
    pub fn invoke(
        &self,
        identity: Identity,
        transient: BTreeMap<String, Vec<u8>>,
        tx: &str,
        args: &Value,
    ) -> Result<Value, TesseraError> {
        let commit = !self.engine.transaction(tx)?.read_only;
        self.run(identity, transient, tx, args, commit)
    }

    /// Run a read-only operation. Fails 400 for mutating ones.
    pub fn query(
        &self,
        identity: Identity,
        transient: BTreeMap<String, Vec<u8>>,
        tx: &str,
        args: &Value,
    ) -> Result<Value, TesseraError> {
        if !self.engine.transaction(tx)?.read_only {
            return Err(TesseraError::bad_request(format!(
                "'{}' is not a read-only transaction; use invoke",
                tx
            )));
        }
        self.run(identity, transient, tx, args, false)
    }

    fn run(
        &self,
        identity: Identity,
        transient: BTreeMap<String, Vec<u8>>,
        tx: &str,
        args: &Value,
        commit: bool,
    ) -> Result<Value, TesseraError> {
        match &self.store {
            Store::Memory(ledger) => run_on(&self.engine, ledger, identity, transient, tx, args, commit),
            Store::Redb(ledger) => run_on(&self.engine, ledger, identity, transient, tx, args, commit),
        }
    }

    /// Reconcile the registry with the stored asset type list, when the
    /// dynamic registry is enabled.
    fn reload_asset_types(&self) -> Result<(), TesseraError> {
        if !self.engine.config().dynamic.enabled {
            return Ok(());
        }
        let out = self.invoke(
            Identity::new(SYSTEM_MSP),
            BTreeMap::new(),
            "loadAssetTypeList",
            &json!({}),
        )?;
        if out["reloaded"] == json!(true) {
            tracing::info!(
                asset_types = self.engine.registry().list().len(),
                "stored asset types loaded"
            );
        }
        Ok(())
    }
}

fn run_on<B: Backend>(
    engine: &Engine,
    ledger: &Ledger<B>,
    identity: Identity,
    transient: BTreeMap<String, Vec<u8>>,
    tx: &str,
    args: &Value,
    commit: bool,
) -> Result<Value, TesseraError> {
    let mut ltx = ledger.begin_with_transient(identity, transient);
    let out = engine.invoke(&mut ltx, tx, args)?;
    if commit {
        let receipt = ltx.commit()?;
        tracing::debug!(tx, tx_id = %receipt.tx_id, writes = receipt.writes, "committed");
        // Private collections follow the registry, which the operation may have changed.
        ledger.configure_collections(engine.private_collections());
    }
    Ok(out)
}
