//! Registry of asset types and its startup check.

use super::{AssetType, DataTypeRef};
use crate::datatype::DataTypeRegistry;
use crate::types::{Result, TesseraError};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Ordered set of asset types sharing one data-type registry.
///
/// Cloning is cheap for the data-type side (shared `Arc`); the type list is
/// copied. Mutations build a new registry that replaces the old one once
/// it passes [`SchemaRegistry::check`].
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    datatypes: Arc<DataTypeRegistry>,
    types: Vec<AssetType>,
}

impl SchemaRegistry {
    /// Empty registry over the given data types.
    #[must_use]
    pub fn new(datatypes: Arc<DataTypeRegistry>) -> Self {
        Self {
            datatypes,
            types: Vec::new(),
        }
    }

    /// Data types visible to this registry.
    #[must_use]
    pub fn datatypes(&self) -> &DataTypeRegistry {
        &self.datatypes
    }

    /// Shared handle to the data types.
    #[must_use]
    pub fn datatypes_handle(&self) -> Arc<DataTypeRegistry> {
        Arc::clone(&self.datatypes)
    }

    /// Replace the whole type list.
    pub fn register(&mut self, types: Vec<AssetType>) {
        self.types = types;
    }

    /// Add types at the end. Fails 409 on a tag already present.
    pub fn append(&mut self, types: Vec<AssetType>) -> Result<()> {
        for t in types {
            if self.fetch(&t.tag).is_some() {
                return Err(TesseraError::conflict(format!(
                    "asset type '{}' already registered",
                    t.tag
                )));
            }
            self.types.push(t);
        }
        Ok(())
    }

    /// Remove a type, returning it.
    pub fn remove(&mut self, tag: &str) -> Result<AssetType> {
        let idx = self
            .types
            .iter()
            .position(|t| t.tag == tag)
            .ok_or_else(|| TesseraError::not_found(format!("asset type '{}' not found", tag)))?;
        Ok(self.types.remove(idx))
    }

    /// Swap in a new definition for an existing tag, keeping its position.
    pub fn replace(&mut self, asset_type: AssetType) -> Result<()> {
        let slot = self
            .types
            .iter_mut()
            .find(|t| t.tag == asset_type.tag)
            .ok_or_else(|| {
                TesseraError::not_found(format!("asset type '{}' not found", asset_type.tag))
            })?;
        *slot = asset_type;
        Ok(())
    }

    /// Look up a type by tag.
    #[must_use]
    pub fn fetch(&self, tag: &str) -> Option<&AssetType> {
        self.types.iter().find(|t| t.tag == tag)
    }

    /// Look up a type, failing 400 when it is unknown.
    pub fn require(&self, tag: &str) -> Result<&AssetType> {
        self.fetch(tag)
            .ok_or_else(|| TesseraError::bad_request(format!("asset type '{}' not found", tag)))
    }

    /// Snapshot of every registered type.
    #[must_use]
    pub fn list(&self) -> &[AssetType] {
        &self.types
    }

    /// Types that hold a reference to `tag`, excluding `tag` itself.
    #[must_use]
    pub fn referrers_of(&self, tag: &str) -> Vec<&str> {
        self.types
            .iter()
            .filter(|t| t.tag != tag && t.sub_asset_types().contains(&tag))
            .map(|t| t.tag.as_str())
            .collect()
    }

    /// `(collection, readers)` of every private type.
    #[must_use]
    pub fn private_collections(&self) -> BTreeMap<String, Vec<String>> {
        self.types
            .iter()
            .filter(|t| t.is_private())
            .map(|t| (t.tag.clone(), t.readers.clone()))
            .collect()
    }

    /// Summaries of every type, in registration order.
    #[must_use]
    pub fn describe(&self) -> Value {
        Value::Array(self.types.iter().map(AssetType::summary).collect())
    }

    // =========================================================================
    // STARTUP CHECK
    // =========================================================================

    /// Check every registry invariant.
    ///
    /// Writer patterns are compiled when the props are built, so a registry
    /// that reaches this point carries no invalid regex.
    pub fn check(&self) -> Result<()> {
        let mut tags = BTreeSet::new();
        let mut folded = BTreeMap::new();
        let mut labels = BTreeSet::new();

        for t in &self.types {
            if t.tag.is_empty() || t.tag.starts_with('@') || t.tag.contains(':') {
                return Err(TesseraError::bad_request(format!(
                    "invalid asset type tag '{}'",
                    t.tag
                )));
            }
            if !tags.insert(t.tag.as_str()) {
                return Err(TesseraError::bad_request(format!(
                    "duplicate asset type tag '{}'",
                    t.tag
                )));
            }
            if let Some(other) = folded.insert(t.tag.to_lowercase(), t.tag.as_str()) {
                return Err(TesseraError::bad_request(format!(
                    "asset type tags '{}' and '{}' differ only in case",
                    other, t.tag
                )));
            }
            if !labels.insert(t.label.as_str()) {
                return Err(TesseraError::bad_request(format!(
                    "duplicate asset type label '{}'",
                    t.label
                )));
            }
        }

        for t in &self.types {
            self.check_type(t)
                .map_err(|e| e.wrap(format!("asset type '{}'", t.tag)))?;
        }
        Ok(())
    }

    fn check_type(&self, t: &AssetType) -> Result<()> {
        if t.keys().next().is_none() {
            return Err(TesseraError::bad_request("no key property"));
        }

        let mut tags = BTreeSet::new();
        let mut labels = BTreeSet::new();
        for prop in &t.props {
            if prop.tag.is_empty() || prop.tag.starts_with('@') {
                return Err(TesseraError::bad_request(format!(
                    "invalid property tag '{}'",
                    prop.tag
                )));
            }
            if !tags.insert(prop.tag.as_str()) {
                return Err(TesseraError::bad_request(format!(
                    "duplicate property tag '{}'",
                    prop.tag
                )));
            }
            if !labels.insert(prop.label.as_str()) {
                return Err(TesseraError::bad_request(format!(
                    "duplicate property label '{}'",
                    prop.label
                )));
            }
            self.check_data_type(&prop.data_type)
                .map_err(|e| e.wrap(format!("property '{}'", prop.tag)))?;
            if prop.data_type.is_reference() && prop.default_value.is_some() {
                return Err(TesseraError::bad_request(format!(
                    "reference property '{}' cannot have a default value",
                    prop.tag
                )));
            }
            if let (Some(default), DataTypeRef::Scalar(tag)) =
                (&prop.default_value, prop.data_type.element().0)
            {
                self.check_default(tag, &prop.data_type, default)
                    .map_err(|e| e.wrap(format!("default of '{}'", prop.tag)))?;
            }
        }
        Ok(())
    }

    fn check_data_type(&self, data_type: &DataTypeRef) -> Result<()> {
        match data_type.element().0 {
            DataTypeRef::Scalar(tag) if self.datatypes.contains(tag) => Ok(()),
            DataTypeRef::Scalar(tag) => Err(TesseraError::bad_request(format!(
                "unknown data type '{}'",
                tag
            ))),
            DataTypeRef::Ref(target) if self.fetch(target).is_some() => Ok(()),
            DataTypeRef::Ref(target) => Err(TesseraError::bad_request(format!(
                "reference to unknown asset type '{}'",
                target
            ))),
            DataTypeRef::Object => Ok(()),
            other => Err(TesseraError::bad_request(format!(
                "'{}' is only valid for operation arguments",
                other
            ))),
        }
    }

    fn check_default(&self, tag: &str, data_type: &DataTypeRef, default: &Value) -> Result<()> {
        match (data_type.element().1, default) {
            (true, Value::Array(items)) => items
                .iter()
                .try_for_each(|v| self.datatypes.parse(tag, v).map(|_| ())),
            (true, _) => Err(TesseraError::bad_request("array default must be an array")),
            (false, v) => self.datatypes.parse(tag, v).map(|_| ()),
        }
    }
}
