//! Built-in operations shipped with every engine.

use super::{Arg, Method, Transaction};
use crate::datatype::parse_rfc3339;
use crate::key::Key;
use crate::session::Session;
use crate::types::{Result, TesseraError};
use serde_json::{Map, Value, json};

/// The built-in catalog.
pub fn builtins() -> Result<Vec<Transaction>> {
    Ok(vec![
        // ---------------------------------------------------------------------
        // Assets
        // ---------------------------------------------------------------------
        Transaction::new("createAsset", Method::Post, create_asset)
            .label("Create Asset")
            .description("Create one or more assets; fails if any already exists")
            .arg(Arg::new("asset", "[]@asset")?.label("Assets").required()),
        Transaction::new("readAsset", Method::Get, read_asset)
            .label("Read Asset")
            .description("Read an asset, optionally resolving its references")
            .read_only()
            .arg(Arg::new("key", "@key")?.label("Key").required())
            .arg(Arg::new("resolve", "boolean")?.label("Resolve")),
        Transaction::new("updateAsset", Method::Put, update_asset)
            .label("Update Asset")
            .description("Merge a patch into an existing asset")
            .arg(Arg::new("update", "@update")?.label("Update").required()),
        Transaction::new("deleteAsset", Method::Delete, delete_asset)
            .label("Delete Asset")
            .description("Delete an asset no other asset refers to")
            .arg(Arg::new("key", "@key")?.label("Key").required()),
        Transaction::new("deleteRecursive", Method::Delete, delete_recursive)
            .label("Delete Recursive")
            .description("Delete an asset and every asset referring to it")
            .arg(Arg::new("key", "@key")?.label("Key").required()),
        Transaction::new("search", Method::Get, search)
            .label("Search")
            .description("Run a selector query")
            .read_only()
            .arg(Arg::new("query", "@query")?.label("Query").required())
            .arg(Arg::new("resolve", "boolean")?.label("Resolve")),
        Transaction::new("readAssetHistory", Method::Get, read_asset_history)
            .label("Read Asset History")
            .description("Committed versions of an asset")
            .read_only()
            .arg(Arg::new("key", "@key")?.label("Key").required())
            .arg(Arg::new("timeTarget", "datetime")?.label("Time Target")),
        // ---------------------------------------------------------------------
        // Introspection
        // ---------------------------------------------------------------------
        Transaction::new("getSchema", Method::Get, get_schema)
            .label("Get Schema")
            .description("List asset types, or describe one")
            .read_only()
            .arg(Arg::new("assetType", "string")?.label("Asset Type")),
        Transaction::new("getDataTypes", Method::Get, |s: &mut Session<'_>, _: &Map<String, Value>| {
            Ok(s.registry().datatypes().describe())
        })
        .label("Get Data Types")
        .description("Describe every registered data type")
        .read_only(),
        Transaction::new("getEvents", Method::Get, |s: &mut Session<'_>, _: &Map<String, Value>| {
            Ok(Value::Array(s.engine().events().map(|e| e.descriptor()).collect()))
        })
        .label("Get Events")
        .description("Describe every declared event")
        .read_only(),
        Transaction::new("getHeader", Method::Get, |s: &mut Session<'_>, _: &Map<String, Value>| {
            Ok(s.engine().header().describe())
        })
        .label("Get Header")
        .description("Application header and engine version")
        .read_only(),
        Transaction::new("getTx", Method::Get, get_tx)
            .label("Get Transactions")
            .description("List operations, or describe one")
            .read_only()
            .arg(Arg::new("txName", "string")?.label("Transaction")),
        // ---------------------------------------------------------------------
        // Dynamic asset types
        // ---------------------------------------------------------------------
        Transaction::new("createAssetType", Method::Post, |s: &mut Session<'_>, args: &Map<String, Value>| {
            Ok(Value::Array(s.create_asset_types(array(args, "assetTypes")?)?))
        })
        .label("Create Asset Type")
        .description("Register asset types at runtime")
        .arg(Arg::new("assetTypes", "[]@object")?.label("Asset Types").required()),
        Transaction::new("updateAssetType", Method::Put, |s: &mut Session<'_>, args: &Map<String, Value>| {
            Ok(Value::Array(s.update_asset_types(array(args, "assetTypes")?)?))
        })
        .label("Update Asset Type")
        .description("Patch dynamic asset types")
        .arg(Arg::new("assetTypes", "[]@object")?.label("Asset Types").required()),
        Transaction::new("deleteAssetType", Method::Delete, |s: &mut Session<'_>, args: &Map<String, Value>| {
            Ok(Value::Array(s.delete_asset_types(array(args, "assetTypes")?)?))
        })
        .label("Delete Asset Type")
        .description("Remove asset types; `force` ignores stored assets")
        .arg(Arg::new("assetTypes", "[]@object")?.label("Asset Types").required()),
        Transaction::new("loadAssetTypeList", Method::Post, |s: &mut Session<'_>, args: &Map<String, Value>| {
            let init = flag(args, "init");
            Ok(json!({"reloaded": s.load_asset_type_list(init)?}))
        })
        .label("Load Asset Type List")
        .description("Reconcile the registry with the stored asset type list")
        .arg(Arg::new("init", "boolean")?.label("Init")),
    ])
}

// =============================================================================
// ARGUMENT ACCESS
// =============================================================================

fn flag(args: &Map<String, Value>, tag: &str) -> bool {
    args.get(tag).and_then(Value::as_bool).unwrap_or(false)
}

fn key(args: &Map<String, Value>, tag: &str) -> Result<Key> {
    let value = args
        .get(tag)
        .ok_or_else(|| TesseraError::bad_request(format!("missing argument '{}'", tag)))?;
    serde_json::from_value(value.clone())
        .map_err(|e| TesseraError::bad_request(format!("argument '{}' is not a key: {}", tag, e)))
}

fn object<'a>(args: &'a Map<String, Value>, tag: &str) -> Result<&'a Map<String, Value>> {
    args.get(tag)
        .and_then(Value::as_object)
        .ok_or_else(|| TesseraError::bad_request(format!("argument '{}' must be an object", tag)))
}

fn array<'a>(args: &'a Map<String, Value>, tag: &str) -> Result<&'a [Value]> {
    args.get(tag)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| TesseraError::bad_request(format!("argument '{}' must be an array", tag)))
}

fn string<'a>(args: &'a Map<String, Value>, tag: &str) -> Option<&'a str> {
    args.get(tag).and_then(Value::as_str)
}

// =============================================================================
// ROUTINES
// =============================================================================

fn create_asset(session: &mut Session<'_>, args: &Map<String, Value>) -> Result<Value> {
    let mut created = Vec::new();
    for (i, item) in array(args, "asset")?.iter().enumerate() {
        let raw = item
            .as_object()
            .ok_or_else(|| TesseraError::bad_request(format!("asset {} must be an object", i)))?;
        created.push(session.put_new(raw)?);
    }
    Ok(Value::Array(created))
}

fn read_asset(session: &mut Session<'_>, args: &Map<String, Value>) -> Result<Value> {
    let key = key(args, "key")?;
    if flag(args, "resolve") {
        session.get_recursive(&key)
    } else {
        session.get(&key)
    }
}

fn update_asset(session: &mut Session<'_>, args: &Map<String, Value>) -> Result<Value> {
    session.update(object(args, "update")?)
}

fn delete_asset(session: &mut Session<'_>, args: &Map<String, Value>) -> Result<Value> {
    session.delete(&key(args, "key")?)
}

fn delete_recursive(session: &mut Session<'_>, args: &Map<String, Value>) -> Result<Value> {
    let deleted = session.delete_cascade(&key(args, "key")?)?;
    Ok(Value::Array(
        deleted.into_iter().map(|k| Value::String(k.key)).collect(),
    ))
}

fn search(session: &mut Session<'_>, args: &Map<String, Value>) -> Result<Value> {
    let query = Value::Object(object(args, "query")?.clone());
    Ok(session.search(&query, flag(args, "resolve"))?.to_value())
}

fn read_asset_history(session: &mut Session<'_>, args: &Map<String, Value>) -> Result<Value> {
    let before = string(args, "timeTarget").map(parse_rfc3339).transpose()?;
    let versions = session.history(&key(args, "key")?, before)?;
    match before {
        Some(_) => Ok(versions.into_iter().next().unwrap_or(Value::Null)),
        None => Ok(Value::Array(versions)),
    }
}

fn get_schema(session: &mut Session<'_>, args: &Map<String, Value>) -> Result<Value> {
    match string(args, "assetType") {
        Some(tag) => {
            let asset_type = session
                .registry()
                .fetch(tag)
                .ok_or_else(|| TesseraError::not_found(format!("asset type '{}' not found", tag)))?;
            serde_json::to_value(asset_type)
                .map_err(|e| TesseraError::internal(format!("failed to encode asset type: {}", e)))
        }
        None => Ok(session.registry().describe()),
    }
}

fn get_tx(session: &mut Session<'_>, args: &Map<String, Value>) -> Result<Value> {
    match string(args, "txName") {
        Some(tag) => Ok(session.engine().transaction(tag)?.descriptor()),
        None => Ok(Value::Array(
            session.engine().transactions().map(|t| t.summary()).collect(),
        )),
    }
}
