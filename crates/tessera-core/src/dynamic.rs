//! # Dynamic Asset Types
//!
//! Runtime evolution of the asset-type registry. The registry is persisted
//! as a singleton meta-asset:
//!
//! ```text
//! { "@assetType": "assetTypeListData", "id": "primary",
//!   "list": [<asset type>...], "lastUpdated": <RFC3339> }
//! ```
//!
//! Every mutation persists the new list before swapping the in-memory
//! registry. `load_asset_type_list` reconciles the stored list with the
//! types registered at boot; `lastUpdated` short-circuits no-op reloads.

use crate::access::allows_caller;
use crate::asset::Asset;
use crate::key::Key;
use crate::primitives::{ATTR_ASSET_TYPE, REGISTRY_ASSET_ID, REGISTRY_ASSET_TYPE};
use crate::schema::{AssetProp, AssetType, DataTypeRef, SchemaRegistry};
use crate::session::Session;
use crate::types::{Result, ResultExt, TesseraError};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

// =============================================================================
// PATCHES
// =============================================================================

/// Partial update of one asset type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TypePatch {
    tag: String,
    label: Option<String>,
    description: Option<String>,
    readers: Option<Vec<String>>,
    #[serde(default)]
    props: Vec<PropPatch>,
}

/// Partial update of one property, keyed by tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PropPatch {
    tag: String,
    #[serde(default)]
    delete: bool,
    label: Option<String>,
    description: Option<String>,
    is_key: Option<bool>,
    required: Option<bool>,
    read_only: Option<bool>,
    default_value: Option<Value>,
    data_type: Option<String>,
    writers: Option<Vec<String>>,
}

/// Deletion request for one asset type.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeDeletion {
    tag: String,
    #[serde(default)]
    force: bool,
}

fn decode<T: for<'de> Deserialize<'de>>(value: &Value, what: &str) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| TesseraError::bad_request(format!("invalid {}: {}", what, e)))
}

// =============================================================================
// OPERATIONS
// =============================================================================

impl Session<'_> {
    fn ensure_dynamic(&self) -> Result<()> {
        if !self.engine().config().dynamic.enabled {
            return Err(TesseraError::not_implemented(
                "dynamic asset types are disabled",
            ));
        }
        Ok(())
    }

    fn ensure_dynamic_admin(&self) -> Result<()> {
        self.ensure_dynamic()?;
        let admins = self.engine().config().dynamic.admins.as_deref();
        if !allows_caller(admins, self.identity()) {
            return Err(TesseraError::forbidden(format!(
                "caller '{}' may not change asset types",
                self.identity().msp
            )));
        }
        Ok(())
    }

    /// Register new asset types at runtime.
    ///
    /// A type may reference only types already registered or submitted
    /// earlier in the same batch (or itself).
    pub fn create_asset_types(&mut self, types: &[Value]) -> Result<Vec<Value>> {
        self.ensure_dynamic_admin()?;
        let mut registry = self.registry().clone();
        let mut created = Vec::new();

        for raw in types {
            let mut asset_type: AssetType = decode(raw, "asset type")?;
            asset_type.dynamic = true;
            for target in asset_type.sub_asset_types() {
                if target != asset_type.tag && registry.fetch(target).is_none() {
                    return Err(TesseraError::bad_request(format!(
                        "asset type '{}' references unknown type '{}'",
                        asset_type.tag, target
                    )));
                }
            }
            created.push(asset_type.summary());
            registry.append(vec![asset_type])?;
        }

        self.commit_registry(registry)?;
        tracing::info!(count = created.len(), tx = self.tx(), "asset types created");
        Ok(created)
    }

    /// Patch dynamic asset types.
    ///
    /// Key properties can be neither created nor deleted, and an existing
    /// property's data type cannot change.
    pub fn update_asset_types(&mut self, patches: &[Value]) -> Result<Vec<Value>> {
        self.ensure_dynamic_admin()?;
        let mut registry = self.registry().clone();
        let mut updated = Vec::new();

        for raw in patches {
            let patch: TypePatch = decode(raw, "asset type patch")?;
            let asset_type = apply_type_patch(registry.require(&patch.tag)?, &patch)
                .wrap_with(|| format!("asset type '{}'", patch.tag))?;
            updated.push(asset_type.summary());
            registry.replace(asset_type)?;
        }

        self.commit_registry(registry)?;
        tracing::info!(count = updated.len(), tx = self.tx(), "asset types updated");
        Ok(updated)
    }

    /// Remove dynamic asset types. Without `force`, a type with stored
    /// assets is kept.
    pub fn delete_asset_types(&mut self, deletions: &[Value]) -> Result<Vec<Value>> {
        self.ensure_dynamic_admin()?;
        let mut registry = self.registry().clone();
        let mut deleted = Vec::new();

        for raw in deletions {
            let deletion: TypeDeletion = decode(raw, "asset type deletion")?;
            if deletion.tag == REGISTRY_ASSET_TYPE {
                return Err(TesseraError::bad_request(format!(
                    "asset type '{}' cannot be deleted",
                    REGISTRY_ASSET_TYPE
                )));
            }
            if !registry.require(&deletion.tag)?.dynamic {
                return Err(TesseraError::bad_request(format!(
                    "asset type '{}' is declared at boot; only dynamic asset types can be deleted",
                    deletion.tag
                )));
            }
            let referrers: Vec<&str> = registry
                .referrers_of(&deletion.tag)
                .into_iter()
                .filter(|t| *t != deletion.tag)
                .collect();
            if !referrers.is_empty() {
                return Err(TesseraError::bad_request(format!(
                    "asset type '{}' is referenced by {}",
                    deletion.tag,
                    referrers.join(", ")
                )));
            }
            if !deletion.force && self.has_stored_assets(&deletion.tag)? {
                return Err(TesseraError::bad_request(format!(
                    "asset type '{}' has stored assets; use force to delete it",
                    deletion.tag
                )));
            }
            let removed = registry.remove(&deletion.tag)?;
            deleted.push(removed.summary());
        }

        self.commit_registry(registry)?;
        tracing::info!(count = deleted.len(), tx = self.tx(), "asset types deleted");
        Ok(deleted)
    }

    fn has_stored_assets(&self, tag: &str) -> Result<bool> {
        let request = json!({"selector": {"@assetType": tag}, "limit": 1});
        Ok(self.first(&request)?.is_some())
    }

    /// Check, persist, then install a registry.
    fn commit_registry(&mut self, registry: SchemaRegistry) -> Result<()> {
        registry.check()?;
        self.persist_registry(&registry)?;
        self.engine().swap_registry(registry);
        self.engine().set_registry_version(Some(self.timestamp()));
        self.refresh_registry();
        Ok(())
    }

    fn persist_registry(&mut self, registry: &SchemaRegistry) -> Result<()> {
        let list = registry
            .list()
            .iter()
            .filter(|t| t.tag != REGISTRY_ASSET_TYPE)
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TesseraError::internal(format!("failed to encode asset types: {}", e)))?;

        let mut raw = Map::new();
        raw.insert(ATTR_ASSET_TYPE.into(), json!(REGISTRY_ASSET_TYPE));
        raw.insert("id".into(), json!(REGISTRY_ASSET_ID));
        raw.insert("list".into(), Value::Array(list));
        raw.insert("lastUpdated".into(), json!(self.timestamp()));
        self.put_asset(&raw)?;
        Ok(())
    }

    /// Reconcile the in-memory registry with the stored meta-asset.
    ///
    /// Boot types are always kept and win on conflict, so they keep their
    /// validators. Stored dynamic types are added; a dynamic type missing
    /// from the stored list was deleted and is dropped. `init` forces the
    /// reload even when `lastUpdated` matches. Returns whether the registry
    /// was reloaded.
    pub fn load_asset_type_list(&mut self, init: bool) -> Result<bool> {
        self.ensure_dynamic()?;
        let mut lookup = Map::new();
        lookup.insert(ATTR_ASSET_TYPE.into(), json!(REGISTRY_ASSET_TYPE));
        lookup.insert("id".into(), json!(REGISTRY_ASSET_ID));
        let key = Key::from_map(self.registry(), &lookup)?;

        let Some(stored) = self.load(&key)? else {
            return Ok(false);
        };
        let version = stored
            .get("lastUpdated")
            .and_then(Value::as_str)
            .map(str::to_string);
        if !init && version.is_some() && version == self.engine().registry_version() {
            return Ok(false);
        }

        let registry = self.reconcile(&stored)?;
        registry.check().wrap_err("stored asset types")?;
        let count = registry.list().len();
        self.engine().swap_registry(registry);
        self.engine().set_registry_version(version);
        self.refresh_registry();
        tracing::info!(asset_types = count, init, "asset type list loaded");
        Ok(true)
    }

    fn reconcile(&self, stored: &Asset) -> Result<SchemaRegistry> {
        let stored_types: Vec<AssetType> = stored
            .get("list")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        serde_json::from_value::<AssetType>(item.clone()).map_err(|e| {
                            TesseraError::internal(format!("corrupt stored asset type: {}", e))
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        let statics = self.engine().static_types();
        let static_tags: BTreeSet<&str> = statics.iter().map(|t| t.tag.as_str()).collect();

        let mut merged: Vec<AssetType> = statics.to_vec();
        for mut t in stored_types {
            if static_tags.contains(t.tag.as_str()) {
                continue;
            }
            t.dynamic = true;
            merged.push(t);
        }
        let dropped: Vec<&str> = self
            .registry()
            .list()
            .iter()
            .filter(|t| t.dynamic && !merged.iter().any(|m| m.tag == t.tag))
            .map(|t| t.tag.as_str())
            .collect();
        if !dropped.is_empty() {
            tracing::info!(asset_types = ?dropped, "dropping asset types deleted by another peer");
        }

        let mut registry = SchemaRegistry::new(self.engine().datatypes_handle());
        registry.register(merged);
        Ok(registry)
    }
}

fn apply_type_patch(current: &AssetType, patch: &TypePatch) -> Result<AssetType> {
    if !current.dynamic {
        return Err(TesseraError::bad_request(
            "only dynamic asset types can be updated",
        ));
    }
    let mut next = current.clone();
    if let Some(label) = &patch.label {
        next.label.clone_from(label);
    }
    if let Some(description) = &patch.description {
        next.description.clone_from(description);
    }
    if let Some(readers) = &patch.readers {
        if readers.is_empty() != current.readers.is_empty() {
            return Err(TesseraError::bad_request(
                "cannot change whether an asset type is private",
            ));
        }
        next.readers.clone_from(readers);
    }

    for prop_patch in &patch.props {
        let position = next.props.iter().position(|p| p.tag == prop_patch.tag);
        match (position, prop_patch.delete) {
            (Some(i), true) => {
                if next.props[i].is_key {
                    return Err(TesseraError::bad_request(format!(
                        "cannot delete key property '{}'",
                        prop_patch.tag
                    )));
                }
                next.props.remove(i);
            }
            (None, true) => {
                return Err(TesseraError::bad_request(format!(
                    "property '{}' does not exist",
                    prop_patch.tag
                )));
            }
            (Some(i), false) => {
                let prop = &mut next.props[i];
                patch_prop(prop, prop_patch)?;
            }
            (None, false) => next.props.push(new_prop(prop_patch)?),
        }
    }
    Ok(next)
}

fn patch_prop(prop: &mut AssetProp, patch: &PropPatch) -> Result<()> {
    if let Some(raw) = &patch.data_type {
        if DataTypeRef::parse(raw)? != prop.data_type {
            return Err(TesseraError::bad_request(format!(
                "cannot change the data type of property '{}'",
                prop.tag
            )));
        }
    }
    if patch.is_key.is_some_and(|k| k != prop.is_key) {
        return Err(TesseraError::bad_request(format!(
            "cannot change whether property '{}' is a key",
            prop.tag
        )));
    }
    if let Some(label) = &patch.label {
        prop.label.clone_from(label);
    }
    if let Some(description) = &patch.description {
        prop.description.clone_from(description);
    }
    if let Some(required) = patch.required {
        prop.required = required || prop.is_key;
    }
    if let Some(read_only) = patch.read_only {
        prop.read_only = read_only;
    }
    if let Some(default) = &patch.default_value {
        prop.default_value = (!default.is_null()).then(|| default.clone());
    }
    if let Some(writers) = &patch.writers {
        let writers: Vec<&str> = writers.iter().map(String::as_str).collect();
        *prop = prop.clone().writers(&writers)?;
    }
    Ok(())
}

fn new_prop(patch: &PropPatch) -> Result<AssetProp> {
    if patch.is_key == Some(true) {
        return Err(TesseraError::bad_request(format!(
            "cannot create key property '{}'",
            patch.tag
        )));
    }
    let data_type = patch.data_type.as_deref().ok_or_else(|| {
        TesseraError::bad_request(format!("new property '{}' needs a dataType", patch.tag))
    })?;
    let mut prop = AssetProp::new(&patch.tag, data_type)?;
    patch_prop(&mut prop, patch)?;
    Ok(prop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DynamicConfig, EngineConfig};
    use crate::engine::Engine;
    use crate::ledger::{Ledger, MemoryBackend};
    use crate::types::Identity;

    fn person() -> AssetType {
        AssetType::new("person", "Person").prop(AssetProp::new("id", "string").expect("prop").key())
    }

    fn engine() -> Engine {
        engine_with(vec![person()])
    }

    fn engine_with(types: Vec<AssetType>) -> Engine {
        Engine::builder()
            .asset_types(types)
            .config(EngineConfig {
                dynamic: DynamicConfig {
                    enabled: true,
                    admins: None,
                },
                ..EngineConfig::default()
            })
            .build()
            .expect("engine")
    }

    fn magazine() -> Value {
        json!({
            "tag": "magazine",
            "label": "Magazine",
            "props": [
                {"tag": "name", "label": "Name", "isKey": true, "required": true, "dataType": "string"},
                {"tag": "editor", "label": "Editor", "dataType": "->person"},
            ],
        })
    }

    #[test]
    fn disabled_registry_is_not_implemented() {
        let engine = Engine::builder().build().expect("engine");
        let ledger = Ledger::new(MemoryBackend::new());
        let mut tx = ledger.begin(Identity::new("org1MSP"));
        let mut s = engine.session(&mut tx, "createAssetType", false);
        assert_eq!(s.create_asset_types(&[magazine()]).expect_err("disabled").code(), 501);
    }

    #[test]
    fn create_persists_and_swaps() {
        let engine = engine();
        let ledger = Ledger::new(MemoryBackend::new());
        let mut tx = ledger.begin(Identity::new("org1MSP"));
        {
            let mut s = engine.session(&mut tx, "createAssetType", false);
            s.create_asset_types(&[magazine()]).expect("create");
            assert!(s.registry().fetch("magazine").is_some_and(|t| t.dynamic));
            let err = s.create_asset_types(&[magazine()]).expect_err("duplicate");
            assert_eq!(err.code(), 409);
        }
        tx.commit().expect("commit");
        assert!(engine.registry().fetch("magazine").is_some());
    }

    #[test]
    fn batch_order_matters_for_references() {
        let engine = engine();
        let ledger = Ledger::new(MemoryBackend::new());
        let mut tx = ledger.begin(Identity::new("org1MSP"));
        let mut s = engine.session(&mut tx, "createAssetType", false);
        let issue = json!({
            "tag": "issue", "label": "Issue",
            "props": [
                {"tag": "n", "label": "N", "isKey": true, "dataType": "integer"},
                {"tag": "magazine", "label": "In", "dataType": "->magazine"},
            ],
        });
        let err = s
            .create_asset_types(&[issue.clone(), magazine()])
            .expect_err("forward reference");
        assert_eq!(err.code(), 400);
        s.create_asset_types(&[magazine(), issue]).expect("ordered");
    }

    #[test]
    fn update_rules() {
        let engine = engine();
        let ledger = Ledger::new(MemoryBackend::new());
        let mut tx = ledger.begin(Identity::new("org1MSP"));
        let mut s = engine.session(&mut tx, "updateAssetType", false);
        s.create_asset_types(&[magazine()]).expect("create");

        for bad in [
            json!({"tag": "magazine", "props": [{"tag": "name", "delete": true}]}),
            json!({"tag": "magazine", "props": [{"tag": "issn", "isKey": true, "dataType": "string"}]}),
            json!({"tag": "magazine", "props": [{"tag": "editor", "dataType": "string"}]}),
            json!({"tag": "person", "label": "Human"}),
        ] {
            assert_eq!(s.update_asset_types(&[bad]).expect_err("refused").code(), 400);
        }

        s.update_asset_types(&[json!({
            "tag": "magazine",
            "label": "Periodical",
            "props": [
                {"tag": "editor", "delete": true},
                {"tag": "pages", "label": "Pages", "dataType": "integer", "defaultValue": 0},
            ],
        })])
        .expect("update");
        let t = s.registry().fetch("magazine").cloned().expect("type");
        assert_eq!(t.label, "Periodical");
        assert!(t.get_prop("editor").is_none());
        assert_eq!(t.get_prop("pages").and_then(|p| p.default_value.clone()), Some(json!(0)));
    }

    #[test]
    fn delete_requires_force_with_stored_assets() {
        let engine = engine();
        let ledger = Ledger::new(MemoryBackend::new());
        {
            let mut tx = ledger.begin(Identity::new("org1MSP"));
            let mut s = engine.session(&mut tx, "createAssetType", false);
            let issue = json!({
                "tag": "issue",
                "label": "Issue",
                "props": [
                    {"tag": "number", "label": "Number", "isKey": true, "dataType": "string"},
                    {"tag": "magazine", "label": "Magazine", "dataType": "->magazine"},
                ],
            });
            s.create_asset_types(&[magazine(), issue]).expect("create");
            let mut raw = Map::new();
            raw.insert("@assetType".into(), json!("magazine"));
            raw.insert("name".into(), json!("m"));
            s.put(&raw).expect("put");
            drop(s);
            tx.commit().expect("commit");
        }

        let mut tx = ledger.begin(Identity::new("org1MSP"));
        let mut s = engine.session(&mut tx, "deleteAssetType", false);
        let err = s
            .delete_asset_types(&[json!({"tag": "magazine", "force": true})])
            .expect_err("referenced");
        assert_eq!(err.code(), 400);
        assert_eq!(err.message(), "asset type 'magazine' is referenced by issue");
        s.delete_asset_types(&[json!({"tag": "issue"})]).expect("unreferenced");
        assert_eq!(
            s.delete_asset_types(&[json!({"tag": "magazine"})]).expect_err("stored").code(),
            400
        );
        s.delete_asset_types(&[json!({"tag": "magazine", "force": true})])
            .expect("forced");
        assert!(s.registry().fetch("magazine").is_none());
    }

    #[test]
    fn reload_restores_dynamic_types() {
        let ledger = Ledger::new(MemoryBackend::new());
        {
            let engine = engine();
            let mut tx = ledger.begin(Identity::new("org1MSP"));
            let mut s = engine.session(&mut tx, "createAssetType", false);
            s.create_asset_types(&[magazine()]).expect("create");
            drop(s);
            tx.commit().expect("commit");
        }

        // A fresh peer starts with boot types only.
        let engine = engine();
        assert!(engine.registry().fetch("magazine").is_none());
        let mut tx = ledger.begin(Identity::new("org1MSP"));
        let mut s = engine.session(&mut tx, "loadAssetTypeList", false);
        assert!(s.load_asset_type_list(true).expect("load"));
        assert!(s.registry().fetch("magazine").is_some());
        assert!(!s.load_asset_type_list(false).expect("no-op"));
    }

    #[test]
    fn boot_types_cannot_be_deleted() {
        let engine = engine_with(vec![
            person(),
            AssetType::new("car", "Car").prop(AssetProp::new("plate", "string").expect("prop").key()),
        ]);
        let ledger = Ledger::new(MemoryBackend::new());
        let mut tx = ledger.begin(Identity::new("org1MSP"));
        let mut s = engine.session(&mut tx, "deleteAssetType", false);
        let err = s
            .delete_asset_types(&[json!({"tag": "car", "force": true})])
            .expect_err("boot type");
        assert_eq!(err.code(), 400);
        assert!(s.registry().fetch("car").is_some());
    }

    #[test]
    fn reload_keeps_boot_types_added_after_persist() {
        let ledger = Ledger::new(MemoryBackend::new());
        {
            let engine = engine();
            let mut tx = ledger.begin(Identity::new("org1MSP"));
            let mut s = engine.session(&mut tx, "createAssetType", false);
            s.create_asset_types(&[magazine()]).expect("create");
            drop(s);
            tx.commit().expect("commit");
        }

        // The peer restarts with one more boot type than the stored list knows.
        let engine = engine_with(vec![
            person(),
            AssetType::new("car", "Car").prop(AssetProp::new("plate", "string").expect("prop").key()),
        ]);
        let mut tx = ledger.begin(Identity::new("org1MSP"));
        let mut s = engine.session(&mut tx, "loadAssetTypeList", false);
        assert!(s.load_asset_type_list(false).expect("load"));
        assert!(s.registry().fetch("car").is_some_and(|t| !t.dynamic));
        assert!(s.registry().fetch("person").is_some());
        assert!(s.registry().fetch("magazine").is_some_and(|t| t.dynamic));
    }

    #[test]
    fn reload_drops_dynamic_types_deleted_elsewhere() {
        let ledger = Ledger::new(MemoryBackend::new());
        let first = engine();
        let second = engine();
        {
            let mut tx = ledger.begin(Identity::new("org1MSP"));
            let mut s = first.session(&mut tx, "createAssetType", false);
            s.create_asset_types(&[magazine()]).expect("create");
            drop(s);
            tx.commit().expect("commit");
        }
        {
            let mut tx = ledger.begin(Identity::new("org1MSP"));
            let mut s = second.session(&mut tx, "loadAssetTypeList", false);
            assert!(s.load_asset_type_list(false).expect("load"));
            assert!(s.registry().fetch("magazine").is_some());
        }
        {
            let later = chrono::Utc::now() + chrono::Duration::seconds(1);
            let mut tx = ledger.begin(Identity::new("org1MSP")).with_timestamp(later);
            let mut s = first.session(&mut tx, "deleteAssetType", false);
            s.delete_asset_types(&[json!({"tag": "magazine"})]).expect("delete");
            drop(s);
            tx.commit().expect("commit");
        }

        let mut tx = ledger.begin(Identity::new("org1MSP"));
        let mut s = second.session(&mut tx, "loadAssetTypeList", false);
        assert!(s.load_asset_type_list(false).expect("reload"));
        assert!(s.registry().fetch("magazine").is_none());
        assert!(s.registry().fetch("person").is_some());
    }
}
