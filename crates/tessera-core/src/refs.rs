//! # Reference Index
//!
//! Reverse-index records realizing "is referred to by":
//!
//! ```text
//! \0<referenced @key>\0<referrer @key>\0  ->  [0x00]
//! ```
//!
//! A record exists iff the referrer currently holds the reference. Records
//! are owned by the referrer: written with it, removed with it.

use crate::asset::Asset;
use crate::key::Key;
use crate::ledger::{create_composite_key, split_composite_key};
use crate::primitives::REFERENCE_SENTINEL;
use crate::schema::SchemaRegistry;
use crate::types::{Result, TesseraError};
use crate::wrapper::StubWrapper;

/// Write one record per reference held by `asset`.
pub fn put_refs(stub: &mut StubWrapper<'_>, registry: &SchemaRegistry, asset: &Asset) -> Result<()> {
    for referenced in asset.refs(registry)? {
        let record = create_composite_key(&referenced.key, &[asset.key_str()])?;
        stub.put_state(&record, REFERENCE_SENTINEL.to_vec())?;
        tracing::debug!(referrer = asset.key_str(), referenced = %referenced, "reference indexed");
    }
    Ok(())
}

/// Remove the records of every reference held by `asset`.
pub fn del_refs(stub: &mut StubWrapper<'_>, registry: &SchemaRegistry, asset: &Asset) -> Result<()> {
    for referenced in asset.refs(registry)? {
        let record = create_composite_key(&referenced.key, &[asset.key_str()])?;
        stub.del_state(&record)?;
        tracing::debug!(referrer = asset.key_str(), referenced = %referenced, "reference removed");
    }
    Ok(())
}

/// Fail 404 if any reference held by `asset` does not resolve.
pub fn validate_refs(stub: &StubWrapper<'_>, registry: &SchemaRegistry, asset: &Asset) -> Result<()> {
    for referenced in asset.refs(registry)? {
        if !exists_in(stub, registry, &referenced)? {
            return Err(TesseraError::not_found(format!(
                "referenced asset '{}' not found",
                referenced
            )));
        }
    }
    Ok(())
}

/// Visible existence of a key, private types answered through the hash.
pub fn exists_in(stub: &StubWrapper<'_>, registry: &SchemaRegistry, key: &Key) -> Result<bool> {
    let asset_type = registry.require(&key.asset_type)?;
    match asset_type.collection() {
        Some(collection) => Ok(stub.get_private_data_hash(collection, &key.key)?.is_some()),
        None => Ok(stub.get_state(&key.key)?.is_some()),
    }
}

/// True if any asset holds a reference to `key`.
pub fn is_referenced(stub: &StubWrapper<'_>, key: &Key) -> Result<bool> {
    Ok(!stub
        .get_state_by_partial_composite_key(&key.key, &[])?
        .is_empty())
}

/// Keys of every asset holding a reference to `key`, in key order.
pub fn referrers(stub: &StubWrapper<'_>, key: &Key) -> Result<Vec<Key>> {
    stub.get_state_by_partial_composite_key(&key.key, &[])?
        .into_iter()
        .map(|(record, _)| {
            let (_, attributes) = split_composite_key(&record)?;
            let referrer = attributes.first().ok_or_else(|| {
                TesseraError::internal(format!("malformed reference record {:?}", record))
            })?;
            Key::parse(referrer)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataTypeRegistry;
    use crate::ledger::{Ledger, MemoryBackend};
    use crate::schema::{AssetProp, AssetType};
    use crate::types::Identity;
    use serde_json::{Map, Value, json};
    use std::sync::Arc;

    fn registry() -> SchemaRegistry {
        let mut r = SchemaRegistry::new(Arc::new(DataTypeRegistry::with_builtins()));
        r.register(vec![
            AssetType::new("person", "Person")
                .prop(AssetProp::new("id", "string").expect("prop").key()),
            AssetType::new("book", "Book")
                .prop(AssetProp::new("title", "string").expect("prop").key())
                .prop(AssetProp::new("tenant", "->person").expect("prop")),
        ]);
        r
    }

    fn asset(r: &SchemaRegistry, v: Value) -> Asset {
        let map: Map<String, Value> = v.as_object().cloned().unwrap_or_default();
        Asset::new(r, &map).expect("asset")
    }

    #[test]
    fn index_lifecycle() {
        let r = registry();
        let ledger = Ledger::new(MemoryBackend::new());
        let mut tx = ledger.begin(Identity::new("org1MSP"));
        let mut stub = StubWrapper::new(&mut tx);

        let person = asset(&r, json!({"@assetType": "person", "id": "1"}));
        let book = asset(&r, json!({"@assetType": "book", "title": "t", "tenant": {"id": "1"}}));

        assert_eq!(
            validate_refs(&stub, &r, &book).expect_err("dangling").code(),
            404
        );
        stub.put_state(person.key_str(), person.to_bytes().expect("bytes"))
            .expect("put person");
        validate_refs(&stub, &r, &book).expect("resolves");

        put_refs(&mut stub, &r, &book).expect("put refs");
        assert!(is_referenced(&stub, &person.key()).expect("referenced"));
        assert_eq!(referrers(&stub, &person.key()).expect("referrers"), vec![book.key()]);

        del_refs(&mut stub, &r, &book).expect("del refs");
        assert!(!is_referenced(&stub, &person.key()).expect("referenced"));
    }
}
