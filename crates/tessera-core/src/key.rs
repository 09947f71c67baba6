//! # Key Derivation
//!
//! Deterministic asset identity:
//!
//! ```text
//! @key = <typeTag> ":" uuidv5(NAMESPACE_OID, seed)
//! seed = concat(canonical key form of each primary-key property, in declaration order)
//! ```
//!
//! Sub-asset key properties contribute the sub-asset's own `@key`.

use crate::primitives::{ATTR_ASSET_TYPE, ATTR_KEY, MAX_RESOLVE_DEPTH};
use crate::schema::{DataTypeRef, SchemaRegistry};
use crate::types::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// KEY
// =============================================================================

/// Minimized asset: `{@assetType, @key}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    #[serde(rename = "@assetType")]
    pub asset_type: String,
    #[serde(rename = "@key")]
    pub key: String,
}

impl Key {
    /// Build a key from its parts.
    pub fn new(asset_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            asset_type: asset_type.into(),
            key: key.into(),
        }
    }

    /// Key from a bare `@key` string; the type is the prefix before `:`.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once(':') {
            Some((asset_type, id)) if !asset_type.is_empty() && !id.is_empty() => {
                Ok(Self::new(asset_type, raw))
            }
            _ => Err(TesseraError::bad_request(format!("malformed key '{}'", raw))),
        }
    }

    /// Resolve a raw map to a key.
    ///
    /// Accepts either a map carrying `@key`, or one carrying `@assetType`
    /// and every primary-key property.
    pub fn from_map(registry: &SchemaRegistry, raw: &Map<String, Value>) -> Result<Self> {
        let key = generate_key(registry, raw)?;
        let asset_type = match raw.get(ATTR_ASSET_TYPE) {
            Some(Value::String(t)) => t.clone(),
            _ => Self::parse(&key)?.asset_type,
        };
        let key = Self::new(asset_type, key);
        key.check_prefix()?;
        Ok(key)
    }

    /// Resolve a reference value of the declared target type.
    ///
    /// Injects `@assetType` when absent and rejects a mismatched one.
    pub fn from_reference(registry: &SchemaRegistry, target: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) => {
                let map = with_asset_type(map, target)?;
                Self::from_map(registry, &map)
            }
            Value::String(raw) => {
                let key = Self::parse(raw)?;
                if key.asset_type != target {
                    return Err(mismatch(target, &key.asset_type));
                }
                Ok(key)
            }
            other => Err(TesseraError::bad_request(format!(
                "reference to '{}' must be an object, got {}",
                target, other
            ))),
        }
    }

    /// The key as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(ATTR_ASSET_TYPE.into(), Value::String(self.asset_type.clone()));
        map.insert(ATTR_KEY.into(), Value::String(self.key.clone()));
        Value::Object(map)
    }

    /// True if the map is exactly a key object.
    #[must_use]
    pub fn is_key_object(map: &Map<String, Value>) -> bool {
        map.len() == 2
            && matches!(map.get(ATTR_ASSET_TYPE), Some(Value::String(t)) if !t.starts_with('@'))
            && matches!(map.get(ATTR_KEY), Some(Value::String(_)))
    }

    fn check_prefix(&self) -> Result<()> {
        match self.key.split_once(':') {
            Some((prefix, _)) if prefix == self.asset_type => Ok(()),
            _ => Err(TesseraError::bad_request(format!(
                "key '{}' does not belong to asset type '{}'",
                self.key, self.asset_type
            ))),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn mismatch(expected: &str, got: &str) -> TesseraError {
    TesseraError::bad_request(format!(
        "expected asset type '{}', got '{}'",
        expected, got
    ))
}

/// Copy of `map` with `@assetType` set to `target`.
pub(crate) fn with_asset_type(map: &Map<String, Value>, target: &str) -> Result<Map<String, Value>> {
    match map.get(ATTR_ASSET_TYPE) {
        None => {
            let mut out = map.clone();
            out.insert(ATTR_ASSET_TYPE.into(), Value::String(target.to_string()));
            Ok(out)
        }
        Some(Value::String(t)) if t == target => Ok(map.clone()),
        Some(Value::String(t)) => Err(mismatch(target, t)),
        Some(_) => Err(TesseraError::bad_request("@assetType must be a string")),
    }
}

// =============================================================================
// DERIVATION
// =============================================================================

/// Derive the `@key` of a raw asset map.
pub fn generate_key(registry: &SchemaRegistry, raw: &Map<String, Value>) -> Result<String> {
    if let Some(Value::String(key)) = raw.get(ATTR_KEY) {
        return Ok(key.clone());
    }
    derive_key(registry, raw, 0)
}

/// Derive from the primary-key properties only, ignoring any supplied `@key`.
pub fn derive_key(registry: &SchemaRegistry, raw: &Map<String, Value>, depth: usize) -> Result<String> {
    if depth > MAX_RESOLVE_DEPTH {
        return Err(TesseraError::bad_request("key nesting too deep"));
    }
    let tag = match raw.get(ATTR_ASSET_TYPE) {
        Some(Value::String(tag)) => tag,
        _ => return Err(TesseraError::bad_request("@assetType must be a string")),
    };
    let asset_type = registry.require(tag)?;

    let mut seed = String::new();
    for prop in asset_type.keys() {
        let value = raw
            .get(&prop.tag)
            .filter(|v| !v.is_null())
            .ok_or_else(|| {
                TesseraError::bad_request(format!("primary key property '{}' is missing", prop.tag))
            })?;
        let (element, is_array) = prop.data_type.element();
        let elements: Vec<&Value> = match (is_array, value) {
            (true, Value::Array(items)) => items.iter().collect(),
            (true, _) => {
                return Err(TesseraError::bad_request(format!(
                    "property '{}' must be an array",
                    prop.tag
                )));
            }
            (false, v) => vec![v],
        };
        for item in elements {
            seed.push_str(
                &key_fragment(registry, element, item, depth)
                    .map_err(|e| e.wrap(format!("key property '{}'", prop.tag)))?,
            );
        }
    }

    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes());
    Ok(format!("{}:{}", tag, id))
}

fn key_fragment(
    registry: &SchemaRegistry,
    element: &DataTypeRef,
    value: &Value,
    depth: usize,
) -> Result<String> {
    match element {
        DataTypeRef::Scalar(tag) => Ok(registry.datatypes().parse(tag, value)?.0),
        DataTypeRef::Ref(target) => match value {
            Value::Object(map) => {
                let map = with_asset_type(map, target)?;
                match map.get(ATTR_KEY) {
                    Some(Value::String(key)) => Ok(key.clone()),
                    _ => derive_key(registry, &map, depth + 1),
                }
            }
            Value::String(_) => Ok(Key::from_reference(registry, target, value)?.key),
            _ => Err(TesseraError::bad_request(format!(
                "reference to '{}' must be an object",
                target
            ))),
        },
        DataTypeRef::Object => serde_json::to_string(value)
            .map_err(|e| TesseraError::internal(format!("failed to encode key object: {}", e))),
        other => Err(TesseraError::bad_request(format!(
            "'{}' cannot be part of a key",
            other
        ))),
    }
}

// =============================================================================
// TESTS
// =============================================================================
