//! # Data Types
//!
//! Primitive and custom scalar types. Each type exposes a pure `parse`
//! returning `(canonical key form, canonical value)`.
//!
//! | Type       | Key form                    | Value       |
//! |------------|-----------------------------|-------------|
//! | `string`   | the string                  | the string  |
//! | `number`   | IEEE-754 bit pattern (hex)  | f64         |
//! | `integer`  | decimal                     | i64         |
//! | `boolean`  | `"t"` / `"f"`               | bool        |
//! | `datetime` | RFC3339                     | RFC3339     |
//!
//! The key form is stable under re-parsing: parsing a canonical value yields
//! the same key form again.

use crate::types::{Result, TesseraError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Parse function of a data type.
pub type ParseFn = Arc<dyn Fn(&Value) -> Result<(String, Value)> + Send + Sync>;

// =============================================================================
// DATA TYPE
// =============================================================================

/// A scalar data type usable as a property `dataType`.
#[derive(Clone)]
pub struct DataType {
    description: String,
    accepted_formats: Vec<String>,
    drop_down_values: Option<BTreeMap<String, Value>>,
    parse: ParseFn,
}

impl DataType {
    /// Create a type from its parse function.
    pub fn new<F>(description: impl Into<String>, accepted_formats: &[&str], parse: F) -> Self
    where
        F: Fn(&Value) -> Result<(String, Value)> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            accepted_formats: accepted_formats.iter().map(|s| (*s).to_string()).collect(),
            drop_down_values: None,
            parse: Arc::new(parse),
        }
    }

    /// Enumerated type: accepts only the listed labels (or their values)
    /// and stores the associated value.
    pub fn enumeration(description: impl Into<String>, values: &[(&str, Value)]) -> Self {
        let options: BTreeMap<String, Value> = values
            .iter()
            .map(|(label, value)| ((*label).to_string(), value.clone()))
            .collect();
        let lookup = options.clone();
        let mut dt = Self::new(description, &["string"], move |value| {
            let hit = lookup
                .iter()
                .find(|(label, v)| value.as_str() == Some(label.as_str()) || *v == value);
            match hit {
                Some((_, v)) => Ok((key_form_of(v), v.clone())),
                None => Err(TesseraError::bad_request(format!(
                    "value {} is not one of the allowed options",
                    value
                ))),
            }
        });
        dt.drop_down_values = Some(options);
        dt
    }

    /// Parse a raw value into `(canonical key form, canonical value)`.
    pub fn parse(&self, value: &Value) -> Result<(String, Value)> {
        (self.parse)(value)
    }

    /// Acceptance check.
    #[must_use]
    pub fn validate(&self, value: &Value) -> bool {
        self.parse(value).is_ok()
    }

    /// Human description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// JSON descriptor used by `getDataTypes`.
    #[must_use]
    pub fn descriptor(&self) -> Value {
        let mut out = Map::new();
        out.insert("description".into(), json!(self.description));
        out.insert("acceptedFormats".into(), json!(self.accepted_formats));
        if let Some(options) = &self.drop_down_values {
            out.insert("DropDownValues".into(), json!(options));
        }
        Value::Object(out)
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataType")
            .field("description", &self.description)
            .field("accepted_formats", &self.accepted_formats)
            .finish_non_exhaustive()
    }
}

fn key_form_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// BUILT-IN PARSERS
// =============================================================================

fn parse_string(value: &Value) -> Result<(String, Value)> {
    match value {
        Value::String(s) => Ok((s.clone(), Value::String(s.clone()))),
        _ => Err(TesseraError::bad_request("property must be a string")),
    }
}

fn parse_number(value: &Value) -> Result<(String, Value)> {
    let number = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| TesseraError::bad_request("number out of range"))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| TesseraError::bad_request(format!("'{}' is not a number", s)))?,
        _ => return Err(TesseraError::bad_request("property must be a number")),
    };
    let canonical = Number::from_f64(number)
        .ok_or_else(|| TesseraError::bad_request("number must be finite"))?;
    // Integral values render without a fraction, as JSON encoders of
    // doubles do; the key form is the bit pattern either way.
    let value = match integral_f64(number) {
        Some(i) if i.unsigned_abs() <= MAX_SAFE_INTEGER => json!(i),
        _ => Value::Number(canonical),
    };
    Ok((format!("{:x}", (number + 0.0).to_bits()), value))
}

const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

fn integral_f64(number: f64) -> Option<i64> {
    let in_range = number >= i64::MIN as f64 && number < i64::MAX as f64;
    (number.is_finite() && number.fract() == 0.0 && in_range).then_some(number as i64)
}

fn parse_integer(value: &Value) -> Result<(String, Value)> {
    let integer = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(integral_f64))
            .ok_or_else(|| TesseraError::bad_request(format!("{} is not an integer", n)))?,
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().and_then(integral_f64))
                .ok_or_else(|| TesseraError::bad_request(format!("'{}' is not an integer", s)))?
        }
        _ => return Err(TesseraError::bad_request("property must be an integer")),
    };
    Ok((integer.to_string(), json!(integer)))
}

fn parse_boolean(value: &Value) -> Result<(String, Value)> {
    let flag = match value {
        Value::Bool(b) => *b,
        Value::String(s) if s == "true" => true,
        Value::String(s) if s == "false" => false,
        _ => return Err(TesseraError::bad_request("property must be a boolean")),
    };
    Ok((if flag { "t" } else { "f" }.to_string(), Value::Bool(flag)))
}

/// Parse an RFC3339 timestamp into UTC.
pub fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TesseraError::bad_request(format!("invalid RFC3339 datetime '{}': {}", raw, e)))
}

/// Render a timestamp the way the engine stores it.
#[must_use]
pub fn format_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_datetime(value: &Value) -> Result<(String, Value)> {
    match value {
        Value::String(s) => {
            let rendered = format_rfc3339(&parse_rfc3339(s)?);
            Ok((rendered.clone(), Value::String(rendered)))
        }
        _ => Err(TesseraError::bad_request(
            "property must be an RFC3339 datetime string",
        )),
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Names of the built-in primitives.
pub const PRIMITIVES: [&str; 5] = ["string", "number", "integer", "boolean", "datetime"];

/// Registry of scalar data types.
///
/// Custom types are added at boot, before the registry is handed to an
/// `Engine`; the engine only ever holds it behind a shared reference.
#[derive(Debug, Clone)]
pub struct DataTypeRegistry {
    types: BTreeMap<String, DataType>,
}

impl Default for DataTypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl DataTypeRegistry {
    /// Registry holding the built-in primitives.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut types = BTreeMap::new();
        types.insert(
            "string".to_string(),
            DataType::new("any string", &["string"], parse_string),
        );
        types.insert(
            "number".to_string(),
            DataType::new(
                "IEEE-754 double",
                &["number", "numeric string"],
                parse_number,
            ),
        );
        types.insert(
            "integer".to_string(),
            DataType::new(
                "64-bit signed integer",
                &["integer", "integral number", "numeric string"],
                parse_integer,
            ),
        );
        types.insert(
            "boolean".to_string(),
            DataType::new("true or false", &["boolean", "\"true\"/\"false\""], parse_boolean),
        );
        types.insert(
            "datetime".to_string(),
            DataType::new("RFC3339 timestamp", &["RFC3339 string"], parse_datetime),
        );
        Self { types }
    }

    /// Add a custom type. Fails 409 if the tag is taken.
    pub fn register(&mut self, tag: &str, data_type: DataType) -> Result<()> {
        if tag.is_empty() || tag.starts_with('@') || tag.starts_with("->") || tag.starts_with("[]")
        {
            return Err(TesseraError::bad_request(format!(
                "invalid data type tag '{}'",
                tag
            )));
        }
        if self.types.contains_key(tag) {
            return Err(TesseraError::conflict(format!(
                "data type '{}' already registered",
                tag
            )));
        }
        self.types.insert(tag.to_string(), data_type);
        Ok(())
    }

    /// Look up a type.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&DataType> {
        self.types.get(tag)
    }

    /// Check a tag.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.types.contains_key(tag)
    }

    /// Parse a value with the named type.
    pub fn parse(&self, tag: &str, value: &Value) -> Result<(String, Value)> {
        let dt = self
            .get(tag)
            .ok_or_else(|| TesseraError::bad_request(format!("unknown data type '{}'", tag)))?;
        dt.parse(value)
    }

    /// Descriptor map used by `getDataTypes`.
    #[must_use]
    pub fn describe(&self) -> Value {
        let map: Map<String, Value> = self
            .types
            .iter()
            .map(|(tag, dt)| (tag.clone(), dt.descriptor()))
            .collect();
        Value::Object(map)
    }

    /// Registered tags in order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DataTypeRegistry {
        DataTypeRegistry::with_builtins()
    }

    #[test]
    fn string_is_identity() {
        let (key, value) = registry().parse("string", &json!("Maria")).expect("parse");
        assert_eq!(key, "Maria");
        assert_eq!(value, json!("Maria"));
        assert!(registry().parse("string", &json!(1)).is_err());
    }

    #[test]
    fn number_key_is_bit_pattern() {
        let (key, value) = registry().parse("number", &json!(1.67)).expect("parse");
        assert_eq!(key, format!("{:x}", 1.67f64.to_bits()));
        assert_eq!(value, json!(1.67));

        let (from_str, _) = registry().parse("number", &json!("1.67")).expect("parse");
        assert_eq!(from_str, key);

        let (zero, zero_value) = registry().parse("number", &json!(0)).expect("parse");
        assert_eq!(zero, "0");
        assert_eq!(zero_value, json!(0));

        let (neg_zero, _) = registry().parse("number", &json!(-0.0)).expect("parse");
        assert_eq!(neg_zero, "0");
    }

    #[test]
    fn number_rejects_garbage() {
        let err = registry().parse("number", &json!("abc")).expect_err("garbage");
        assert_eq!(err.code(), 400);
        assert!(registry().parse("number", &json!(true)).is_err());
    }

    #[test]
    fn integer_accepts_integral_forms() {
        let reg = registry();
        assert_eq!(reg.parse("integer", &json!(42)).expect("int").0, "42");
        assert_eq!(reg.parse("integer", &json!(42.0)).expect("float").0, "42");
        assert_eq!(reg.parse("integer", &json!("-7")).expect("str").1, json!(-7));
        assert!(reg.parse("integer", &json!(4.5)).is_err());
        assert!(reg.parse("integer", &json!("4.5")).is_err());
    }

    #[test]
    fn boolean_forms() {
        let reg = registry();
        assert_eq!(reg.parse("boolean", &json!(true)).expect("bool").0, "t");
        assert_eq!(reg.parse("boolean", &json!("false")).expect("str").0, "f");
        assert!(reg.parse("boolean", &json!("yes")).is_err());
    }

    #[test]
    fn datetime_normalizes_to_utc() {
        let (key, value) = registry()
            .parse("datetime", &json!("2019-05-06T19:12:41-03:00"))
            .expect("parse");
        assert_eq!(key, "2019-05-06T22:12:41Z");
        assert_eq!(value, json!("2019-05-06T22:12:41Z"));
        assert!(registry().parse("datetime", &json!("06/05/2019")).is_err());
    }

    #[test]
    fn enumeration_accepts_labels_and_values() {
        let dt = DataType::enumeration(
            "book genre",
            &[("fiction", json!(0)), ("non-fiction", json!(1))],
        );
        assert_eq!(dt.parse(&json!("non-fiction")).expect("label").1, json!(1));
        assert_eq!(dt.parse(&json!(0)).expect("value").1, json!(0));
        assert!(dt.parse(&json!("poetry")).is_err());
        assert!(dt.descriptor().get("DropDownValues").is_some());
    }

    #[test]
    fn register_rejects_duplicates_and_reserved_tags() {
        let mut reg = registry();
        let dt = DataType::new("custom", &["string"], parse_string);
        assert_eq!(
            reg.register("string", dt.clone()).expect_err("dup").code(),
            409
        );
        assert_eq!(reg.register("@x", dt.clone()).expect_err("@").code(), 400);
        reg.register("cpf", dt).expect("register");
        assert!(reg.contains("cpf"));
    }

    #[test]
    fn describe_lists_every_type() {
        let described = registry().describe();
        for tag in PRIMITIVES {
            assert!(described.get(tag).is_some(), "{} missing", tag);
        }
    }
}
