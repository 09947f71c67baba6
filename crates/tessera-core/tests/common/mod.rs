//! Shared fixtures: the library schema used across integration tests.

#![allow(dead_code)]

use serde_json::{Map, Value, json};
use tessera_core::{
    AssetProp, AssetType, Backend, DataType, DynamicConfig, Engine, EngineConfig, Identity, Ledger,
    TesseraError,
};

/// Eleven-digit document number; punctuation is stripped.
pub fn cpf() -> DataType {
    DataType::new("CPF (Brazilian ID)", &["string"], |value| {
        let raw = value
            .as_str()
            .ok_or_else(|| TesseraError::bad_request("CPF must be a string"))?;
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.len() != 11 {
            return Err(TesseraError::bad_request(format!(
                "CPF must have 11 digits, got {}",
                digits.len()
            )));
        }
        Ok((digits.clone(), Value::String(digits)))
    })
}

pub fn person() -> AssetType {
    AssetType::new("person", "Person")
        .description("Personal data of someone")
        .prop(
            AssetProp::new("id", "cpf")
                .expect("prop")
                .label("CPF (Brazilian ID)")
                .key()
                .writers(&["org1MSP"])
                .expect("writers"),
        )
        .prop(
            AssetProp::new("name", "string")
                .expect("prop")
                .label("Name of the person")
                .required()
                .writers(&["$org\\dMSP"])
                .expect("writers"),
        )
        .prop(
            AssetProp::new("height", "number")
                .expect("prop")
                .label("Person's height")
                .default_value(json!(0)),
        )
}

pub fn book() -> AssetType {
    AssetType::new("book", "Book")
        .prop(AssetProp::new("title", "string").expect("prop").label("Book Title").key())
        .prop(AssetProp::new("author", "string").expect("prop").label("Book Author").key())
        .prop(AssetProp::new("currentTenant", "->person").expect("prop").label("Current Tenant"))
        .prop(AssetProp::new("genres", "[]string").expect("prop").label("Genres"))
        .prop(AssetProp::new("published", "datetime").expect("prop").label("Publishment Date"))
}

pub fn library() -> AssetType {
    AssetType::new("library", "Library")
        .prop(AssetProp::new("name", "string").expect("prop").key())
        .prop(AssetProp::new("books", "[]->book").expect("prop"))
        .prop(AssetProp::new("entranceCode", "->secret").expect("prop"))
}

pub fn secret() -> AssetType {
    AssetType::new("secret", "Secret")
        .readers(&["org1MSP"])
        .prop(AssetProp::new("secretName", "string").expect("prop").key())
        .prop(AssetProp::new("secret", "string").expect("prop").required())
}

/// Engine over the library schema, dynamic registry enabled.
pub fn engine() -> Engine {
    Engine::builder()
        .data_type("cpf", cpf())
        .expect("cpf")
        .asset_types(vec![person(), book(), library(), secret()])
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

/// Ledger whose private collections follow the engine's readers.
pub fn ledger<B: Backend>(engine: &Engine, backend: B) -> Ledger<B> {
    let ledger = Ledger::new(backend);
    ledger.configure_collections(engine.private_collections());
    ledger
}

/// Run an operation in its own transaction; commit only on success.
pub fn invoke<B: Backend>(
    engine: &Engine,
    ledger: &Ledger<B>,
    msp: &str,
    tx: &str,
    args: Value,
) -> Result<Value, TesseraError> {
    let mut ltx = ledger.begin(Identity::new(msp));
    let out = engine.invoke(&mut ltx, tx, &args)?;
    ltx.commit()?;
    Ok(out)
}

pub fn map(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap_or_default()
}

pub const PERSON_KEY: &str = "person:47061146-c642-51a1-844a-bf0b17cb5e19";
pub const BOOK_KEY: &str = "book:a36a2920-c405-51c3-b584-dcd758338cb5";

pub fn maria() -> Value {
    json!({"@assetType": "person", "name": "Maria", "id": "318.207.920-48"})
}

pub fn maria_book() -> Value {
    json!({
        "@assetType": "book",
        "title": "Meu Nome é Maria",
        "author": "Maria Viana",
        "currentTenant": {"id": "318.207.920-48"},
        "genres": ["biography", "non-fiction"],
        "published": "2019-05-06T22:12:41Z",
    })
}
