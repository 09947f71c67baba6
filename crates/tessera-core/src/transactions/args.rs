//! Argument validation.
//!
//! Arguments are parsed against their declared data types before the
//! routine runs. Private arguments come from the transient channel, one
//! JSON document per argument tag.

use super::Transaction;
use crate::asset::validate_value;
use crate::key::Key;
use crate::primitives::ATTR_ASSET_TYPE;
use crate::schema::{DataTypeRef, SchemaRegistry};
use crate::session::Session;
use crate::types::{Result, TesseraError};
use serde_json::{Map, Value};

/// Validate raw arguments; returns the parsed argument map.
pub fn validate_args(
    session: &Session<'_>,
    tx: &Transaction,
    raw: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    for name in raw.keys() {
        match tx.args.iter().find(|a| a.tag == *name) {
            None => {
                return Err(TesseraError::bad_request(format!(
                    "unexpected argument '{}'",
                    name
                )));
            }
            Some(arg) if arg.private => {
                return Err(TesseraError::bad_request(format!(
                    "argument '{}' is private and must be sent as transient data",
                    name
                )));
            }
            Some(_) => {}
        }
    }

    let mut out = Map::new();
    for arg in &tx.args {
        let value = if arg.private {
            match session.stub().transient().get(&arg.tag) {
                Some(bytes) => Some(serde_json::from_slice::<Value>(bytes).map_err(|e| {
                    TesseraError::bad_request(format!(
                        "transient argument '{}' is not JSON: {}",
                        arg.tag, e
                    ))
                })?),
                None => None,
            }
        } else {
            raw.get(&arg.tag).cloned()
        };

        let Some(value) = value.filter(|v| !v.is_null()) else {
            if arg.required {
                return Err(TesseraError::bad_request(format!(
                    "missing argument '{}'",
                    arg.tag
                )));
            }
            continue;
        };
        let parsed = validate_arg(session.registry(), &arg.data_type, &value)
            .map_err(|e| e.wrap(format!("invalid argument '{}'", arg.tag)))?;
        out.insert(arg.tag.clone(), parsed);
    }
    Ok(out)
}

/// Parse one argument value.
fn validate_arg(registry: &SchemaRegistry, data_type: &DataTypeRef, value: &Value) -> Result<Value> {
    match data_type {
        DataTypeRef::Array(inner) => value
            .as_array()
            .ok_or_else(|| TesseraError::bad_request("value must be an array"))?
            .iter()
            .map(|item| validate_arg(registry, inner, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        DataTypeRef::Asset | DataTypeRef::Update => {
            let map = as_object(value)?;
            match map.get(ATTR_ASSET_TYPE) {
                Some(Value::String(tag)) => {
                    registry.require(tag)?;
                }
                _ => return Err(TesseraError::bad_request("@assetType must be a string")),
            }
            if matches!(data_type, DataTypeRef::Update) {
                Key::from_map(registry, &map)?;
            }
            Ok(Value::Object(map))
        }
        DataTypeRef::Key => {
            let key = match value {
                Value::String(raw) => Key::parse(raw)?,
                _ => Key::from_map(registry, &as_object(value)?)?,
            };
            registry.require(&key.asset_type)?;
            Ok(key.to_value())
        }
        DataTypeRef::Query => Ok(Value::Object(as_object(value)?)),
        scalar_or_ref => validate_value(registry, scalar_or_ref, value),
    }
}

/// An object, or a string holding one.
fn as_object(value: &Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map.clone()),
        Value::String(raw) => serde_json::from_str(raw)
            .map_err(|_| TesseraError::bad_request("value must be a JSON object")),
        _ => Err(TesseraError::bad_request("value must be a JSON object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataTypeRegistry;
    use crate::schema::{AssetProp, AssetType};
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> SchemaRegistry {
        let mut r = SchemaRegistry::new(Arc::new(DataTypeRegistry::with_builtins()));
        r.register(vec![
            AssetType::new("person", "Person")
                .prop(AssetProp::new("id", "string").expect("prop").key()),
        ]);
        r
    }

    fn parse(data_type: &str, value: Value) -> Result<Value> {
        let dt = DataTypeRef::parse(data_type).expect("data type");
        validate_arg(&registry(), &dt, &value)
    }

    #[test]
    fn key_arguments_accept_objects_and_strings() {
        let from_props = parse("@key", json!({"@assetType": "person", "id": "1"})).expect("props");
        let key = from_props["@key"].as_str().expect("key").to_string();
        assert_eq!(parse("@key", json!(key)).expect("string"), from_props);
        assert_eq!(parse("@key", json!("ghost:1")).expect_err("unknown type").code(), 400);
    }

    #[test]
    fn asset_arguments_need_a_registered_type() {
        parse("[]@asset", json!([{"@assetType": "person", "id": "1"}])).expect("asset");
        assert_eq!(parse("@asset", json!({"id": "1"})).expect_err("untyped").code(), 400);
        assert_eq!(parse("@update", json!({"@assetType": "person"})).expect_err("no key").code(), 400);
    }

    #[test]
    fn scalars_and_queries() {
        assert_eq!(parse("integer", json!("42")).expect("integer"), json!(42));
        assert_eq!(
            parse("@query", json!("{\"selector\": {}}")).expect("query"),
            json!({"selector": {}})
        );
        assert_eq!(parse("boolean", json!("yes")).expect_err("bool").code(), 400);
    }
}
