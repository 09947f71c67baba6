//! # End-to-End Scenarios
//!
//! The library schema driven through the operation catalog, one ledger
//! transaction per operation, literal values throughout.

mod common;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use common::{BOOK_KEY, PERSON_KEY, engine, invoke, ledger, maria, maria_book};
use serde_json::json;
use tessera_core::ledger::create_composite_key;
use tessera_core::{Identity, MemoryBackend, Stub};

// =============================================================================
// CREATE
// =============================================================================

mod create {
    use super::*;

    #[test]
    fn person_gets_canonical_id_defaults_and_metadata() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());

        let out = invoke(&engine, &ledger, "org1MSP", "createAsset", json!({"asset": [maria()]}))
            .expect("create");
        let person = &out[0];

        assert_eq!(person["@assetType"], json!("person"));
        assert_eq!(person["@key"], json!(PERSON_KEY));
        assert_eq!(person["name"], json!("Maria"));
        assert_eq!(person["id"], json!("31820792048"));
        assert_eq!(person["height"], json!(0));
        assert_eq!(person["@lastTouchBy"], json!("org1MSP"));
        assert_eq!(person["@lastTx"], json!("createAsset"));
        assert!(person["@lastUpdated"].is_string());

        let read = invoke(
            &engine,
            &ledger,
            "org1MSP",
            "readAsset",
            json!({"key": {"@assetType": "person", "@key": PERSON_KEY}}),
        )
        .expect("read");
        assert_eq!(&read, person);
    }

    #[test]
    fn creating_twice_conflicts() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        invoke(&engine, &ledger, "org1MSP", "createAsset", json!({"asset": [maria()]}))
            .expect("create");

        let err = invoke(&engine, &ledger, "org1MSP", "createAsset", json!({"asset": [maria()]}))
            .expect_err("duplicate");
        assert_eq!(err.code(), 409);
    }

    #[test]
    fn bad_cpf_is_rejected() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        let err = invoke(
            &engine,
            &ledger,
            "org1MSP",
            "createAsset",
            json!({"asset": [{"@assetType": "person", "name": "Maria", "id": "123"}]}),
        )
        .expect_err("short cpf");
        assert_eq!(err.code(), 400);
    }
}

// =============================================================================
// REFERENCES
// =============================================================================

mod references {
    use super::*;

    #[test]
    fn book_stores_tenant_as_key_and_indexes_it() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        invoke(&engine, &ledger, "org1MSP", "createAsset", json!({"asset": [maria()]}))
            .expect("person");

        let out = invoke(&engine, &ledger, "org2MSP", "createAsset", json!({"asset": [maria_book()]}))
            .expect("book");
        let book = &out[0];
        assert_eq!(book["@key"], json!(BOOK_KEY));
        assert_eq!(
            book["currentTenant"],
            json!({"@assetType": "person", "@key": PERSON_KEY})
        );
        assert_eq!(book["genres"], json!(["biography", "non-fiction"]));
        assert_eq!(book["@lastTouchBy"], json!("org2MSP"));

        let record = create_composite_key(PERSON_KEY, &[BOOK_KEY]).expect("composite");
        assert!(ledger.get(&record).expect("get").is_some());
    }

    #[test]
    fn dangling_reference_is_not_found() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        let err = invoke(&engine, &ledger, "org2MSP", "createAsset", json!({"asset": [maria_book()]}))
            .expect_err("no tenant");
        assert_eq!(err.code(), 404);
    }
}

// =============================================================================
// DELETION
// =============================================================================

mod deletion {
    use super::*;

    fn seeded() -> (tessera_core::Engine, tessera_core::Ledger<MemoryBackend>) {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        invoke(&engine, &ledger, "org1MSP", "createAsset", json!({"asset": [maria()]}))
            .expect("person");
        invoke(&engine, &ledger, "org2MSP", "createAsset", json!({"asset": [maria_book()]}))
            .expect("book");
        (engine, ledger)
    }

    #[test]
    fn referenced_asset_cannot_be_deleted() {
        let (engine, ledger) = seeded();
        let err = invoke(
            &engine,
            &ledger,
            "org1MSP",
            "deleteAsset",
            json!({"key": {"@assetType": "person", "@key": PERSON_KEY}}),
        )
        .expect_err("referenced");
        assert_eq!(err.code(), 400);
        assert!(err.message().ends_with("another asset holds a reference to this one"));
    }

    #[test]
    fn cascade_deletes_referrers_in_discovery_order() {
        let (engine, ledger) = seeded();
        let out = invoke(
            &engine,
            &ledger,
            "org1MSP",
            "deleteRecursive",
            json!({"key": {"@assetType": "person", "@key": PERSON_KEY}}),
        )
        .expect("cascade");
        assert_eq!(out, json!([PERSON_KEY, BOOK_KEY]));

        for (asset_type, key) in [("person", PERSON_KEY), ("book", BOOK_KEY)] {
            let err = invoke(
                &engine,
                &ledger,
                "org1MSP",
                "readAsset",
                json!({"key": {"@assetType": asset_type, "@key": key}}),
            )
            .expect_err("gone");
            assert_eq!(err.code(), 404);
        }
        let record = create_composite_key(PERSON_KEY, &[BOOK_KEY]).expect("composite");
        assert!(ledger.get(&record).expect("get").is_none());
    }

    #[test]
    fn deleting_the_referrer_frees_the_target() {
        let (engine, ledger) = seeded();
        invoke(
            &engine,
            &ledger,
            "org1MSP",
            "deleteAsset",
            json!({"key": {"@assetType": "book", "@key": BOOK_KEY}}),
        )
        .expect("book");
        invoke(
            &engine,
            &ledger,
            "org1MSP",
            "deleteAsset",
            json!({"key": {"@assetType": "person", "@key": PERSON_KEY}}),
        )
        .expect("person");
    }
}

// =============================================================================
// WRITER RESTRICTIONS
// =============================================================================

mod writers {
    use super::*;

    #[test]
    fn restricted_property_is_forbidden_open_one_is_not() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        invoke(&engine, &ledger, "org1MSP", "createAsset", json!({"asset": [maria()]}))
            .expect("person");

        let err = invoke(
            &engine,
            &ledger,
            "org2MSP",
            "updateAsset",
            json!({"update": {"@assetType": "person", "name": "Maria", "id": "318.207.920-48"}}),
        )
        .expect_err("id is org1 only");
        assert_eq!(err.code(), 403);
        assert!(err.message().contains("'id'"));

        let out = invoke(
            &engine,
            &ledger,
            "org2MSP",
            "updateAsset",
            json!({"update": {"@assetType": "person", "@key": PERSON_KEY, "height": 1.67}}),
        )
        .expect("height is open");
        assert_eq!(out["height"], json!(1.67));
        assert_eq!(out["@lastTouchBy"], json!("org2MSP"));
        assert_eq!(out["@lastTx"], json!("updateAsset"));
        assert_eq!(out["name"], json!("Maria"));
    }

    #[test]
    fn regex_writer_rejects_foreign_msp() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        invoke(&engine, &ledger, "org1MSP", "createAsset", json!({"asset": [maria()]}))
            .expect("person");

        let err = invoke(
            &engine,
            &ledger,
            "auditMSP",
            "updateAsset",
            json!({"update": {"@assetType": "person", "@key": PERSON_KEY, "name": "Mary"}}),
        )
        .expect_err("not an org");
        assert_eq!(err.code(), 403);
    }
}

// =============================================================================
// PRIVATE SUB-ASSETS
// =============================================================================

mod private_assets {
    use super::*;

    #[test]
    fn recursive_read_hashes_unreadable_sub_asset() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());

        let written = invoke(
            &engine,
            &ledger,
            "org1MSP",
            "createAsset",
            json!({"asset": [{"@assetType": "secret", "secretName": "vault", "secret": "1234"}]}),
        )
        .expect("secret");
        let secret_key = written[0]["@key"].as_str().expect("key").to_string();
        assert_eq!(written[0].as_object().map(|m| m.len()), Some(2));

        invoke(
            &engine,
            &ledger,
            "org1MSP",
            "createAsset",
            json!({"asset": [{"@assetType": "library", "name": "Central", "entranceCode": {"secretName": "vault"}}]}),
        )
        .expect("library");

        let out = invoke(
            &engine,
            &ledger,
            "org2MSP",
            "readAsset",
            json!({"key": {"@assetType": "library", "name": "Central"}, "resolve": true}),
        )
        .expect("recursive read");

        let stub = &out["entranceCode"];
        assert_eq!(stub["@assetType"], json!("secret"));
        assert_eq!(stub["@key"], json!(secret_key));

        let tx = ledger.begin(Identity::new("org2MSP"));
        let hash = tx
            .get_private_data_hash("secret", &secret_key)
            .expect("hash")
            .expect("present");
        assert_eq!(stub["@hash"], json!(STANDARD.encode(hash)));
        assert!(stub.get("secret").is_none());
    }

    #[test]
    fn members_see_the_full_sub_asset() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        invoke(
            &engine,
            &ledger,
            "org1MSP",
            "createAsset",
            json!({"asset": [{"@assetType": "secret", "secretName": "vault", "secret": "1234"}]}),
        )
        .expect("secret");
        invoke(
            &engine,
            &ledger,
            "org1MSP",
            "createAsset",
            json!({"asset": [{"@assetType": "library", "name": "Central", "entranceCode": {"secretName": "vault"}}]}),
        )
        .expect("library");

        let out = invoke(
            &engine,
            &ledger,
            "org1MSP",
            "readAsset",
            json!({"key": {"@assetType": "library", "name": "Central"}, "resolve": true}),
        )
        .expect("recursive read");
        assert_eq!(out["entranceCode"]["secret"], json!("1234"));
    }

    #[test]
    fn direct_private_read_is_forbidden() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        invoke(
            &engine,
            &ledger,
            "org1MSP",
            "createAsset",
            json!({"asset": [{"@assetType": "secret", "secretName": "vault", "secret": "1234"}]}),
        )
        .expect("secret");

        let err = invoke(
            &engine,
            &ledger,
            "org2MSP",
            "readAsset",
            json!({"key": {"@assetType": "secret", "secretName": "vault"}}),
        )
        .expect_err("not a reader");
        assert_eq!(err.code(), 403);
    }
}

// =============================================================================
// QUERIES AND HISTORY
// =============================================================================

mod queries {
    use super::*;

    #[test]
    fn search_returns_matching_assets() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        invoke(&engine, &ledger, "org1MSP", "createAsset", json!({"asset": [maria()]}))
            .expect("person");
        invoke(&engine, &ledger, "org2MSP", "createAsset", json!({"asset": [maria_book()]}))
            .expect("book");

        let out = invoke(
            &engine,
            &ledger,
            "org1MSP",
            "search",
            json!({"query": {"selector": {"@assetType": "book"}}, "resolve": true}),
        )
        .expect("search");
        let result = out["result"].as_array().expect("result");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["currentTenant"]["name"], json!("Maria"));
    }

    #[test]
    fn history_lists_every_version() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        invoke(&engine, &ledger, "org1MSP", "createAsset", json!({"asset": [maria()]}))
            .expect("person");
        invoke(
            &engine,
            &ledger,
            "org1MSP",
            "updateAsset",
            json!({"update": {"@assetType": "person", "@key": PERSON_KEY, "height": 1.8}}),
        )
        .expect("update");

        let out = invoke(
            &engine,
            &ledger,
            "org1MSP",
            "readAssetHistory",
            json!({"key": {"@assetType": "person", "@key": PERSON_KEY}}),
        )
        .expect("history");
        let versions = out.as_array().expect("versions");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0]["height"], json!(0));
        assert_eq!(versions[1]["height"], json!(1.8));
        assert_eq!(versions[1]["_isDelete"], json!(false));
    }

    fn invoke_at(
        engine: &tessera_core::Engine,
        ledger: &tessera_core::Ledger<MemoryBackend>,
        at: &str,
        tx: &str,
        args: serde_json::Value,
    ) {
        let at = chrono::DateTime::parse_from_rfc3339(at)
            .expect("time")
            .with_timezone(&chrono::Utc);
        let mut ltx = ledger.begin(Identity::new("org1MSP")).with_timestamp(at);
        engine.invoke(&mut ltx, tx, &args).expect(tx);
        ltx.commit().expect("commit");
    }

    #[test]
    fn history_time_target_picks_latest_earlier_version() {
        let engine = engine();
        let ledger = ledger(&engine, MemoryBackend::new());
        invoke_at(&engine, &ledger, "2024-01-01T00:00:00Z", "createAsset", json!({"asset": [maria()]}));
        for (at, height) in [("2024-02-01T00:00:00Z", 1.6), ("2024-03-01T00:00:00Z", 1.7)] {
            invoke_at(
                &engine,
                &ledger,
                at,
                "updateAsset",
                json!({"update": {"@assetType": "person", "@key": PERSON_KEY, "height": height}}),
            );
        }
        let at = |target: &str| {
            invoke(
                &engine,
                &ledger,
                "org1MSP",
                "readAssetHistory",
                json!({"key": {"@assetType": "person", "@key": PERSON_KEY}, "timeTarget": target}),
            )
        };

        let version = at("2024-02-15T00:00:00Z").expect("between second and third");
        assert_eq!(version["height"], json!(1.6));
        assert_eq!(version["_timestamp"], json!("2024-02-01T00:00:00Z"));

        // A version written exactly at the target is not before it.
        let version = at("2024-02-01T00:00:00Z").expect("at second");
        assert_eq!(version["height"], json!(0));

        let version = at("2025-01-01T00:00:00Z").expect("after all");
        assert_eq!(version["height"], json!(1.7));

        assert_eq!(at("2023-12-31T00:00:00Z").expect_err("before first").code(), 404);
    }
}
