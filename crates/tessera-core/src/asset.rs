//! # Asset Object
//!
//! Runtime record of an asset type. Construction runs the whole
//! validation and coercion pipeline:
//!
//! 1. strip null values
//! 2. inject `@assetType`, derive `@key`
//! 3. take each declared property from the input or its `defaultValue`
//! 4. parse element-wise through the data-type registry; references become `Key`s
//! 5. run per-property validators and required checks
//! 6. reject undeclared attributes, then run the type validator

use crate::key::{Key, derive_key};
use crate::primitives::{
    ATTR_ASSET_TYPE, ATTR_KEY, ATTR_LAST_TOUCH_BY, ATTR_LAST_TX, ATTR_LAST_UPDATED,
    RESERVED_ATTRIBUTES,
};
use crate::schema::{AssetProp, AssetType, DataTypeRef, SchemaRegistry};
use crate::types::{Result, ResultExt, TesseraError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// A validated asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asset(Map<String, Value>);

impl Asset {
    /// Build and validate an asset from a raw map.
    pub fn new(registry: &SchemaRegistry, raw: &Map<String, Value>) -> Result<Self> {
        let mut input: Map<String, Value> = raw
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let tag = match input.get(ATTR_ASSET_TYPE) {
            Some(Value::String(tag)) => tag.clone(),
            _ => return Err(TesseraError::bad_request("@assetType must be a string")),
        };
        let asset_type = registry.require(&tag)?;

        // Key properties are required, so a failing derivation is reported
        // as the missing property it names.
        let derived = derive_key(registry, &input, 0)?;
        match input.get(ATTR_KEY) {
            Some(Value::String(supplied)) if *supplied != derived => {
                return Err(TesseraError::bad_request(format!(
                    "supplied @key '{}' does not match derived key '{}'",
                    supplied, derived
                )));
            }
            Some(Value::String(_)) | None => {}
            Some(_) => return Err(TesseraError::bad_request("@key must be a string")),
        }
        input.insert(ATTR_KEY.into(), Value::String(derived));

        let mut out = Map::new();
        for attr in RESERVED_ATTRIBUTES {
            if let Some(v) = input.get(attr) {
                out.insert(attr.to_string(), v.clone());
            }
        }

        for prop in &asset_type.props {
            let value = match input.get(&prop.tag).or(prop.default_value.as_ref()) {
                Some(v) => v,
                None if prop.required => {
                    return Err(TesseraError::bad_request(format!(
                        "property '{}' is required",
                        prop.tag
                    )));
                }
                None => continue,
            };
            let parsed = validate_prop(registry, prop, value)
                .wrap_with(|| format!("invalid property '{}'", prop.tag))?;
            out.insert(prop.tag.clone(), parsed);
        }

        for attr in input.keys() {
            if !attr.starts_with('@') && asset_type.get_prop(attr).is_none() {
                return Err(TesseraError::bad_request(format!(
                    "property '{}' is not declared on asset type '{}'",
                    attr, tag
                )));
            }
        }

        if let Some(validator) = &asset_type.validate {
            validator
                .check(&out)
                .wrap_with(|| format!("asset type '{}' validation failed", tag))?;
        }

        Ok(Self(out))
    }

    /// Wrap an already validated map, e.g. one read back from storage.
    #[must_use]
    pub fn from_map_unchecked(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Decode stored bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| TesseraError::internal(format!("failed to decode asset: {}", e)))
    }

    /// Encode for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.0)
            .map_err(|e| TesseraError::internal(format!("failed to encode asset: {}", e)))
    }

    /// Type tag.
    #[must_use]
    pub fn asset_type(&self) -> &str {
        self.0
            .get(ATTR_ASSET_TYPE)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// The asset's `@key` string.
    #[must_use]
    pub fn key_str(&self) -> &str {
        self.0.get(ATTR_KEY).and_then(Value::as_str).unwrap_or_default()
    }

    /// The asset's handle.
    #[must_use]
    pub fn key(&self) -> Key {
        Key::new(self.asset_type(), self.key_str())
    }

    /// Property value, if set.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&Value> {
        self.0.get(tag)
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Set one property.
    ///
    /// Reserved attributes are refused with 500 and primary-key properties
    /// with 501; changing a key means a new asset.
    pub fn set_prop(&mut self, registry: &SchemaRegistry, tag: &str, value: Value) -> Result<()> {
        if tag.starts_with('@') {
            return Err(TesseraError::internal(format!(
                "cannot set reserved attribute '{}'",
                tag
            )));
        }
        let asset_type = registry.require(self.asset_type())?;
        let prop = asset_type.get_prop(tag).ok_or_else(|| {
            TesseraError::bad_request(format!(
                "property '{}' is not declared on asset type '{}'",
                tag, asset_type.tag
            ))
        })?;
        if prop.is_key {
            return Err(TesseraError::not_implemented(format!(
                "cannot set key property '{}'",
                tag
            )));
        }
        if value.is_null() {
            if prop.required {
                return Err(TesseraError::bad_request(format!(
                    "property '{}' is required",
                    tag
                )));
            }
            self.0.remove(tag);
            return Ok(());
        }
        let parsed = validate_prop(registry, prop, &value)
            .map_err(|e| e.wrap(format!("invalid property '{}'", tag)))?;
        self.0.insert(tag.to_string(), parsed);
        Ok(())
    }

    /// Every reference held by the asset, arrays flattened, nulls skipped.
    pub fn refs(&self, registry: &SchemaRegistry) -> Result<BTreeSet<Key>> {
        let asset_type = registry.require(self.asset_type())?;
        let mut out = BTreeSet::new();
        for prop in asset_type.ref_props() {
            let (Some(value), Some(target)) = (self.0.get(&prop.tag), prop.data_type.ref_target())
            else {
                continue;
            };
            collect_refs(registry, target, value, &mut out)
                .map_err(|e| e.wrap(format!("reference property '{}'", prop.tag)))?;
        }
        Ok(out)
    }

    /// Set the write metadata.
    pub fn inject_metadata(&mut self, msp: &str, tx: &str, timestamp: &str) {
        self.0
            .insert(ATTR_LAST_TOUCH_BY.into(), Value::String(msp.to_string()));
        self.0.insert(ATTR_LAST_TX.into(), Value::String(tx.to_string()));
        self.0
            .insert(ATTR_LAST_UPDATED.into(), Value::String(timestamp.to_string()));
    }

    /// The type definition of this asset.
    pub fn definition<'r>(&self, registry: &'r SchemaRegistry) -> Result<&'r AssetType> {
        registry.require(self.asset_type())
    }
}

fn collect_refs(
    registry: &SchemaRegistry,
    target: &str,
    value: &Value,
    out: &mut BTreeSet<Key>,
) -> Result<()> {
    match value {
        Value::Null => Ok(()),
        Value::Array(items) => items
            .iter()
            .try_for_each(|item| collect_refs(registry, target, item, out)),
        other => {
            out.insert(Key::from_reference(registry, target, other)?);
            Ok(())
        }
    }
}

// =============================================================================
// PROPERTY VALIDATION
// =============================================================================

/// Parse a property value against its declaration and run its validator.
pub fn validate_prop(registry: &SchemaRegistry, prop: &AssetProp, value: &Value) -> Result<Value> {
    let parsed = validate_value(registry, &prop.data_type, value)?;
    if let Some(validator) = &prop.validate {
        validator.check(&parsed)?;
    }
    Ok(parsed)
}

/// Parse a value against a declared data type.
pub fn validate_value(
    registry: &SchemaRegistry,
    data_type: &DataTypeRef,
    value: &Value,
) -> Result<Value> {
    match data_type {
        DataTypeRef::Scalar(tag) => Ok(registry.datatypes().parse(tag, value)?.1),
        DataTypeRef::Ref(target) => Ok(Key::from_reference(registry, target, value)?.to_value()),
        DataTypeRef::Array(inner) => {
            let items = value
                .as_array()
                .ok_or_else(|| TesseraError::bad_request("value must be an array"))?;
            let keep_nulls = matches!(**inner, DataTypeRef::Ref(_));
            items
                .iter()
                .map(|item| match item {
                    Value::Null if keep_nulls => Ok(Value::Null),
                    Value::Null => Err(TesseraError::bad_request("array element cannot be null")),
                    _ => validate_value(registry, inner, item),
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        DataTypeRef::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            Value::String(raw) => serde_json::from_str::<Map<String, Value>>(raw)
                .map(Value::Object)
                .map_err(|_| TesseraError::bad_request("value must be a JSON object")),
            _ => Err(TesseraError::bad_request("value must be a JSON object")),
        },
        other => Err(TesseraError::bad_request(format!(
            "'{}' is not a property data type",
            other
        ))),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{DataType, DataTypeRegistry};
    use crate::schema::{AssetValidator, PropValidator};
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> SchemaRegistry {
        let mut datatypes = DataTypeRegistry::with_builtins();
        datatypes
            .register(
                "upper",
                DataType::new("upper-case string", &["string"], |v| {
                    let s = v
                        .as_str()
                        .ok_or_else(|| TesseraError::bad_request("must be a string"))?
                        .to_uppercase();
                    Ok((s.clone(), Value::String(s)))
                }),
            )
            .expect("register");
        let mut r = SchemaRegistry::new(Arc::new(datatypes));
        r.register(vec![
            AssetType::new("person", "Person")
                .prop(AssetProp::new("id", "upper").expect("prop").key())
                .prop(AssetProp::new("name", "string").expect("prop").required())
                .prop(
                    AssetProp::new("height", "number")
                        .expect("prop")
                        .default_value(json!(0)),
                )
                .prop(
                    AssetProp::new("age", "integer")
                        .expect("prop")
                        .validator(PropValidator::new(|v| match v.as_i64() {
                            Some(n) if n >= 0 => Ok(()),
                            _ => Err(TesseraError::bad_request("age must be positive")),
                        })),
                ),
            AssetType::new("book", "Book")
                .prop(AssetProp::new("title", "string").expect("prop").key())
                .prop(AssetProp::new("tenant", "->person").expect("prop"))
                .prop(AssetProp::new("readers", "[]->person").expect("prop"))
                .prop(AssetProp::new("extra", "@object").expect("prop"))
                .validator(AssetValidator::new(|m| {
                    if m.get("title").and_then(Value::as_str) == Some("forbidden") {
                        Err(TesseraError::bad_request("title not allowed"))
                    } else {
                        Ok(())
                    }
                })),
        ]);
        r
    }

    fn map(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    #[test]
    fn builds_with_defaults_and_canonical_values() {
        let asset = Asset::new(
            &registry(),
            &map(json!({"@assetType": "person", "id": "ab", "name": "Ana", "age": "31"})),
        )
        .expect("asset");
        assert_eq!(asset.get("id"), Some(&json!("AB")));
        assert_eq!(asset.get("height"), Some(&json!(0)));
        assert_eq!(asset.get("age"), Some(&json!(31)));
        assert!(asset.key_str().starts_with("person:"));
    }

    #[test]
    fn nulls_are_stripped() {
        let asset = Asset::new(
            &registry(),
            &map(json!({"@assetType": "person", "id": "a", "name": "Ana", "age": null})),
        )
        .expect("asset");
        assert!(asset.get("age").is_none());
    }

    #[test]
    fn required_and_undeclared() {
        let r = registry();
        let err = Asset::new(&r, &map(json!({"@assetType": "person", "id": "a"})))
            .expect_err("name missing");
        assert!(err.message().contains("name"));

        let err = Asset::new(
            &r,
            &map(json!({"@assetType": "person", "id": "a", "name": "x", "nickname": "y"})),
        )
        .expect_err("undeclared");
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn unknown_reserved_attributes_are_dropped() {
        let asset = Asset::new(
            &registry(),
            &map(json!({"@assetType": "person", "id": "a", "name": "x", "@color": "red"})),
        )
        .expect("asset");
        assert!(asset.get("@color").is_none());
    }

    #[test]
    fn supplied_key_must_match() {
        let err = Asset::new(
            &registry(),
            &map(json!({"@assetType": "person", "@key": "person:other", "id": "a", "name": "x"})),
        )
        .expect_err("mismatch");
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn validators_run() {
        let r = registry();
        let err = Asset::new(
            &r,
            &map(json!({"@assetType": "person", "id": "a", "name": "x", "age": -1})),
        )
        .expect_err("negative");
        assert!(err.message().contains("age must be positive"));

        let err = Asset::new(&r, &map(json!({"@assetType": "book", "title": "forbidden"})))
            .expect_err("type validator");
        assert!(err.message().contains("title not allowed"));
    }

    #[test]
    fn references_become_keys() {
        let r = registry();
        let book = Asset::new(
            &r,
            &map(json!({
                "@assetType": "book",
                "title": "t",
                "tenant": {"id": "a"},
                "readers": [{"id": "b"}, null, {"id": "a"}],
                "extra": "{\"shelf\": 3}",
            })),
        )
        .expect("book");
        let tenant = book.get("tenant").expect("tenant");
        assert_eq!(tenant["@assetType"], json!("person"));
        assert_eq!(book.get("readers").and_then(Value::as_array).map(Vec::len), Some(3));
        assert_eq!(book.get("extra"), Some(&json!({"shelf": 3})));

        let refs = book.refs(&r).expect("refs");
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn reference_type_mismatch_fails() {
        let err = Asset::new(
            &registry(),
            &map(json!({"@assetType": "book", "title": "t", "tenant": {"@assetType": "book", "title": "x"}})),
        )
        .expect_err("mismatch");
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn set_prop_rules() {
        let r = registry();
        let mut asset = Asset::new(
            &r,
            &map(json!({"@assetType": "person", "id": "a", "name": "Ana"})),
        )
        .expect("asset");
        assert_eq!(
            asset.set_prop(&r, "@key", json!("x")).expect_err("reserved").code(),
            500
        );
        assert_eq!(
            asset.set_prop(&r, "id", json!("b")).expect_err("key").code(),
            501
        );
        asset.set_prop(&r, "height", json!("1.5")).expect("set");
        assert_eq!(asset.get("height"), Some(&json!(1.5)));
        assert!(asset.set_prop(&r, "height", json!("tall")).is_err());
    }

    #[test]
    fn bytes_round_trip_and_metadata() {
        let r = registry();
        let mut asset = Asset::new(
            &r,
            &map(json!({"@assetType": "person", "id": "a", "name": "Ana"})),
        )
        .expect("asset");
        asset.inject_metadata("org1MSP", "createAsset", "2024-01-01T00:00:00Z");
        let decoded = Asset::from_bytes(&asset.to_bytes().expect("encode")).expect("decode");
        assert_eq!(decoded, asset);
        assert_eq!(decoded.get(ATTR_LAST_TOUCH_BY), Some(&json!("org1MSP")));
        assert_eq!(decoded.key().asset_type, "person");
    }
}
