//! # Property-Based Tests
//!
//! Determinism and integrity invariants, checked with proptest.

mod common;

use chrono::{DateTime, FixedOffset};
use common::{engine, invoke, ledger, map};
use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tessera_core::key::generate_key;
use tessera_core::refs::is_referenced;
use tessera_core::{Identity, Key, Ledger, MemoryBackend};

fn cpf(n: u32) -> String {
    format!("{:011}", n)
}

fn person_key(engine: &tessera_core::Engine, n: u32) -> Key {
    Key::from_map(
        &engine.registry(),
        &map(json!({"@assetType": "person", "id": cpf(n)})),
    )
    .expect("key")
}

// =============================================================================
// KEYS AND CANONICAL FORMS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Key derivation ignores map order and is stable across clones.
    #[test]
    fn key_is_deterministic(title in "[a-zA-Z0-9 ]{1,24}", author in "[a-zA-Z ]{1,24}") {
        let engine = engine();
        let registry = engine.registry();

        let forward = map(json!({"@assetType": "book", "title": title, "author": author}));
        let mut backward = serde_json::Map::new();
        backward.insert("author".into(), json!(author));
        backward.insert("title".into(), json!(title));
        backward.insert("@assetType".into(), json!("book"));

        let a = generate_key(&registry, &forward).expect("forward");
        let b = generate_key(&registry, &forward.clone()).expect("clone");
        let c = generate_key(&registry, &backward).expect("backward");
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(&a, &c);
        prop_assert!(a.starts_with("book:"));
    }

    /// Punctuation never changes a person's key.
    #[test]
    fn custom_type_key_ignores_punctuation(n in 0u32..1_000_000_000) {
        let engine = engine();
        let registry = engine.registry();
        let digits = cpf(n);
        let dotted = format!("{}.{}.{}-{}", &digits[0..3], &digits[3..6], &digits[6..9], &digits[9..]);

        let plain = generate_key(&registry, &map(json!({"@assetType": "person", "id": digits})));
        let punctuated = generate_key(&registry, &map(json!({"@assetType": "person", "id": dotted})));
        prop_assert_eq!(plain.expect("plain"), punctuated.expect("punctuated"));
    }

    /// Parsing a canonical value yields the same canonical key.
    #[test]
    fn number_canonical_form_is_stable(v in -1.0e12f64..1.0e12) {
        let engine = engine();
        let types = engine.datatypes();
        let (key, canonical) = types.parse("number", &json!(v)).expect("parse");
        let (again, _) = types.parse("number", &canonical).expect("reparse");
        prop_assert_eq!(key, again);
    }

    #[test]
    fn integer_canonical_form_is_stable(v in any::<i32>()) {
        let engine = engine();
        let types = engine.datatypes();
        for input in [json!(v), json!(v.to_string())] {
            let (key, canonical) = types.parse("integer", &input).expect("parse");
            let (again, _) = types.parse("integer", &canonical).expect("reparse");
            prop_assert_eq!(key, again);
        }
    }

    #[test]
    fn datetime_canonical_form_is_stable(secs in 0i64..4_000_000_000, offset in -12i32..=12) {
        let engine = engine();
        let types = engine.datatypes();
        let zone = FixedOffset::east_opt(offset * 3600).expect("offset");
        let ts = DateTime::from_timestamp(secs, 0).expect("timestamp").with_timezone(&zone);

        let (key, canonical) = types.parse("datetime", &json!(ts.to_rfc3339())).expect("parse");
        let (again, _) = types.parse("datetime", &canonical).expect("reparse");
        prop_assert_eq!(key, again);
    }

    #[test]
    fn string_and_boolean_forms_are_stable(s in ".{0,32}", b in any::<bool>()) {
        let engine = engine();
        let types = engine.datatypes();
        let (key, canonical) = types.parse("string", &json!(s)).expect("string");
        prop_assert_eq!(&key, &types.parse("string", &canonical).expect("reparse").0);
        let (key, canonical) = types.parse("boolean", &json!(b)).expect("boolean");
        prop_assert_eq!(&key, &types.parse("boolean", &canonical).expect("reparse").0);
    }
}

// =============================================================================
// REFERENCE INTEGRITY
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A person is referenced exactly while some book names it as tenant.
    #[test]
    fn reference_index_tracks_live_references(
        tenants in vec(0u32..6, 1..10),
        removed in btree_set(0usize..10, 0..10),
    ) {
        let engine = engine();
        let ledger = Ledger::new(MemoryBackend::new());
        let mut tx = ledger.begin(Identity::new("org1MSP"));
        let mut s = engine.session(&mut tx, "createAsset", false);

        for n in 0..6 {
            s.put(&map(json!({"@assetType": "person", "id": cpf(n), "name": "P"}))).expect("person");
        }
        let mut books = Vec::new();
        for (i, tenant) in tenants.iter().enumerate() {
            let out = s
                .put(&map(json!({
                    "@assetType": "book",
                    "title": format!("b{}", i),
                    "author": "a",
                    "currentTenant": {"id": cpf(*tenant)},
                })))
                .expect("book");
            books.push(Key::parse(out["@key"].as_str().expect("key")).expect("parse"));
        }
        for n in 0..6 {
            let held = tenants.contains(&n);
            prop_assert_eq!(is_referenced(s.stub(), &person_key(&engine, n)).expect("index"), held);
        }

        let mut live = Vec::new();
        for (i, (book, tenant)) in books.iter().zip(&tenants).enumerate() {
            if removed.contains(&i) {
                s.delete(book).expect("delete");
            } else {
                live.push(*tenant);
            }
        }
        for n in 0..6 {
            let held = live.contains(&n);
            prop_assert_eq!(is_referenced(s.stub(), &person_key(&engine, n)).expect("index"), held);
        }
    }

    /// Cascade removes the target and everything that reached it.
    #[test]
    fn cascade_leaves_nothing_behind(
        tenants in vec(0u32..4, 0..8),
        shelves in vec(vec(0usize..8, 0..4), 0..4),
        target in 0u32..4,
    ) {
        let engine = engine();
        let ledger = Ledger::new(MemoryBackend::new());
        let mut tx = ledger.begin(Identity::new("org1MSP"));
        let mut s = engine.session(&mut tx, "deleteRecursive", false);

        for n in 0..4 {
            s.put(&map(json!({"@assetType": "person", "id": cpf(n), "name": "P"}))).expect("person");
        }
        let mut books = Vec::new();
        for (i, tenant) in tenants.iter().enumerate() {
            let out = s
                .put(&map(json!({
                    "@assetType": "book",
                    "title": format!("b{}", i),
                    "author": "a",
                    "currentTenant": {"id": cpf(*tenant)},
                })))
                .expect("book");
            books.push(out["@key"].clone());
        }
        for (i, shelf) in shelves.iter().enumerate() {
            let held: BTreeSet<usize> = shelf.iter().copied().filter(|b| *b < books.len()).collect();
            let refs: Vec<Value> = held.iter().map(|b| json!({"@assetType": "book", "@key": books[*b]})).collect();
            s.put(&map(json!({"@assetType": "library", "name": format!("l{}", i), "books": refs})))
                .expect("library");
        }

        let root = person_key(&engine, target);
        let deleted = s.delete_cascade(&root).expect("cascade");
        prop_assert_eq!(deleted.first(), Some(&root));
        let unique: BTreeSet<&Key> = deleted.iter().collect();
        prop_assert_eq!(unique.len(), deleted.len());
        for key in &deleted {
            prop_assert!(!s.exists(key).expect("exists"));
            prop_assert!(!is_referenced(s.stub(), key).expect("index"));
        }
    }
}

// =============================================================================
// VALIDATION TOTALITY
// =============================================================================

fn loose_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        (-1.0e6f64..1.0e6).prop_map(|f| json!(f)),
        "[0-9.\\-a-z]{0,14}".prop_map(Value::from),
        Just(json!(["x"])),
        Just(json!({"nested": 1})),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Any input is either stored as a readable asset or refused with a
    /// client error, and a refusal leaves the ledger untouched.
    #[test]
    fn creation_is_total(
        id in loose_value(),
        name in loose_value(),
        height in loose_value(),
        extra in prop::option::of(loose_value()),
    ) {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        let mut raw = map(json!({"@assetType": "person", "id": id, "name": name, "height": height}));
        if let Some(extra) = extra {
            raw.insert("nickname".into(), extra);
        }

        match invoke(&engine, &ledger, "org1MSP", "createAsset", json!({"asset": [raw]})) {
            Ok(out) => {
                let key = out[0]["@key"].clone();
                let read = invoke(
                    &engine,
                    &ledger,
                    "org1MSP",
                    "readAsset",
                    json!({"key": {"@assetType": "person", "@key": key}}),
                )
                .expect("read back");
                prop_assert_eq!(&read, &out[0]);
            }
            Err(err) => {
                prop_assert!((400..500).contains(&err.code()), "{}", err);
                prop_assert!(ledger.backend().is_empty());
            }
        }
    }
}
