//! # Asset Types
//!
//! The metamodel: property definitions (`AssetProp`), asset types
//! (`AssetType`) and the registry that holds them (`SchemaRegistry`).
//!
//! Invariants enforced by [`SchemaRegistry::check`]:
//! - type `tag` and `label` are unique in the registry
//! - property `tag` and `label` are unique within a type
//! - every type has at least one key property
//! - every `dataType` resolves to a scalar or to a registered asset type
//! - reference properties carry no `defaultValue`

mod datatype_ref;
mod registry;

pub use datatype_ref::DataTypeRef;
pub use registry::SchemaRegistry;

use crate::access::IdentityPattern;
use crate::types::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// VALIDATORS
// =============================================================================

/// Per-value validator attached to a property. Runs after parsing.
#[derive(Clone)]
pub struct PropValidator(Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>);

impl PropValidator {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Run the validator.
    pub fn check(&self, value: &Value) -> Result<()> {
        (self.0)(value)
    }
}

/// Post-parse validator attached to an asset type. Sees the whole asset map.
#[derive(Clone)]
pub struct AssetValidator(Arc<dyn Fn(&serde_json::Map<String, Value>) -> Result<()> + Send + Sync>);

impl AssetValidator {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&serde_json::Map<String, Value>) -> Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Run the validator.
    pub fn check(&self, asset: &serde_json::Map<String, Value>) -> Result<()> {
        (self.0)(asset)
    }
}

macro_rules! opaque_validator {
    ($ty:ident) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($ty), "(..)"))
            }
        }

        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }
        }
    };
}

opaque_validator!(PropValidator);
opaque_validator!(AssetValidator);

// =============================================================================
// PROPERTY
// =============================================================================

/// A named attribute of an asset type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetProp {
    /// Property tag (the JSON attribute name).
    pub tag: String,
    /// Human label.
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Part of the primary key.
    #[serde(default)]
    pub is_key: bool,
    #[serde(default)]
    pub required: bool,
    /// Cannot be changed by updates.
    #[serde(default)]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    /// Declared type, see [`DataTypeRef`].
    pub data_type: DataTypeRef,
    /// MSP patterns allowed to set this property. Empty means anyone.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writers: Vec<IdentityPattern>,
    #[serde(skip)]
    pub validate: Option<PropValidator>,
}

impl AssetProp {
    /// Property with the given tag and type; label defaults to the tag.
    pub fn new(tag: &str, data_type: &str) -> Result<Self> {
        Ok(Self {
            tag: tag.to_string(),
            label: tag.to_string(),
            description: String::new(),
            is_key: false,
            required: false,
            read_only: false,
            default_value: None,
            data_type: DataTypeRef::parse(data_type)?,
            writers: Vec::new(),
            validate: None,
        })
    }

    #[must_use]
    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Mark as primary key (keys are always required).
    #[must_use]
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self.required = true;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Restrict writers. Patterns are compiled here.
    pub fn writers(mut self, patterns: &[&str]) -> Result<Self> {
        self.writers = patterns
            .iter()
            .map(|p| IdentityPattern::parse(p))
            .collect::<Result<_>>()?;
        Ok(self)
    }

    #[must_use]
    pub fn validator(mut self, validator: PropValidator) -> Self {
        self.validate = Some(validator);
        self
    }
}

// =============================================================================
// ASSET TYPE
// =============================================================================

/// A named schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetType {
    pub tag: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// MSP ids allowed to read. Non-empty marks the type as private.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readers: Vec<String>,
    pub props: Vec<AssetProp>,
    /// Created at runtime through the dynamic registry.
    #[serde(default)]
    pub dynamic: bool,
    #[serde(skip)]
    pub validate: Option<AssetValidator>,
}

impl AssetType {
    /// Empty type; add properties with [`AssetType::prop`].
    pub fn new(tag: &str, label: &str) -> Self {
        Self {
            tag: tag.to_string(),
            label: label.to_string(),
            description: String::new(),
            readers: Vec::new(),
            props: Vec::new(),
            dynamic: false,
            validate: None,
        }
    }

    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Make the type private to the given MSPs.
    #[must_use]
    pub fn readers(mut self, readers: &[&str]) -> Self {
        self.readers = readers.iter().map(|r| (*r).to_string()).collect();
        self
    }

    #[must_use]
    pub fn prop(mut self, prop: AssetProp) -> Self {
        self.props.push(prop);
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: AssetValidator) -> Self {
        self.validate = Some(validator);
        self
    }

    /// Private types live in their own collection.
    #[must_use]
    pub fn is_private(&self) -> bool {
        !self.readers.is_empty()
    }

    /// Collection name of a private type.
    #[must_use]
    pub fn collection(&self) -> Option<&str> {
        self.is_private().then_some(self.tag.as_str())
    }

    /// Find a property by tag.
    #[must_use]
    pub fn get_prop(&self, tag: &str) -> Option<&AssetProp> {
        self.props.iter().find(|p| p.tag == tag)
    }

    /// Primary-key properties in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &AssetProp> {
        self.props.iter().filter(|p| p.is_key)
    }

    /// Reference-valued properties.
    pub fn ref_props(&self) -> impl Iterator<Item = &AssetProp> {
        self.props.iter().filter(|p| p.data_type.is_reference())
    }

    /// Asset types this type references, in declaration order, without repeats.
    #[must_use]
    pub fn sub_asset_types(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for target in self.props.iter().filter_map(|p| p.data_type.ref_target()) {
            if !out.contains(&target) {
                out.push(target);
            }
        }
        out
    }

    /// Short descriptor used when listing the schema.
    #[must_use]
    pub fn summary(&self) -> Value {
        serde_json::json!({
            "tag": self.tag,
            "label": self.label,
            "description": self.description,
            "readers": self.readers,
            "dynamic": self.dynamic,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> AssetType {
        AssetType::new("person", "Person")
            .prop(AssetProp::new("id", "string").expect("prop").key())
            .prop(AssetProp::new("name", "string").expect("prop").required())
            .prop(AssetProp::new("friend", "->person").expect("prop"))
            .prop(AssetProp::new("pets", "[]->pet").expect("prop"))
    }

    #[test]
    fn keys_and_references() {
        let t = person();
        let keys: Vec<_> = t.keys().map(|p| p.tag.as_str()).collect();
        assert_eq!(keys, vec!["id"]);
        assert_eq!(t.sub_asset_types(), vec!["person", "pet"]);
        assert_eq!(t.ref_props().count(), 2);
        assert!(!t.is_private());
        assert_eq!(t.collection(), None);
    }

    #[test]
    fn private_type_has_collection() {
        let t = person().readers(&["org1MSP"]);
        assert!(t.is_private());
        assert_eq!(t.collection(), Some("person"));
    }

    #[test]
    fn serde_uses_camel_case_and_skips_validators() {
        let t = AssetType::new("secret", "Secret").prop(
            AssetProp::new("code", "string")
                .expect("prop")
                .key()
                .validator(PropValidator::new(|_| Ok(()))),
        );
        let encoded = serde_json::to_value(&t).expect("ser");
        assert_eq!(encoded["props"][0]["isKey"], json!(true));
        assert_eq!(encoded["props"][0]["dataType"], json!("string"));
        assert!(encoded["props"][0].get("validate").is_none());

        let decoded: AssetType = serde_json::from_value(encoded).expect("de");
        assert!(decoded.props[0].validate.is_none());
        assert_eq!(decoded.props[0].tag, "code");
    }

    #[test]
    fn writers_are_compiled() {
        let prop = AssetProp::new("name", "string")
            .and_then(|p| p.writers(&[r"$org\dMSP"]))
            .expect("prop");
        assert!(prop.writers[0].matches("org7MSP"));
        assert!(AssetProp::new("name", "string")
            .and_then(|p| p.writers(&["$("]))
            .is_err());
    }
}
