//! `dataType` grammar.
//!
//! ```text
//! type := primitive | custom | "->" typeTag | "[]" type
//!       | "@object" | "@asset" | "@key" | "@update" | "@query"
//! ```

use crate::types::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parsed `dataType` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataTypeRef {
    /// Primitive or custom scalar, resolved through the data-type registry.
    Scalar(String),
    /// Reference to an asset of the given type (stored as a Key).
    Ref(String),
    /// Ordered sequence.
    Array(Box<DataTypeRef>),
    /// Opaque JSON object.
    Object,
    /// Full asset map (operation arguments only).
    Asset,
    /// Key handle (operation arguments only).
    Key,
    /// Update patch (operation arguments only).
    Update,
    /// Rich query selector (operation arguments only).
    Query,
}

impl DataTypeRef {
    /// Parse a declaration string.
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some(inner) = raw.strip_prefix("[]") {
            return Ok(Self::Array(Box::new(Self::parse(inner)?)));
        }
        if let Some(target) = raw.strip_prefix("->") {
            if target.is_empty() || target.starts_with('@') || target.starts_with("[]") {
                return Err(TesseraError::bad_request(format!(
                    "invalid reference target in '{}'",
                    raw
                )));
            }
            return Ok(Self::Ref(target.to_string()));
        }
        match raw {
            "@object" => Ok(Self::Object),
            "@asset" => Ok(Self::Asset),
            "@key" => Ok(Self::Key),
            "@update" => Ok(Self::Update),
            "@query" => Ok(Self::Query),
            "" => Err(TesseraError::bad_request("empty dataType")),
            other if other.starts_with('@') => Err(TesseraError::bad_request(format!(
                "unknown special dataType '{}'",
                other
            ))),
            other => Ok(Self::Scalar(other.to_string())),
        }
    }

    /// Strip `[]` layers. Returns the element type and whether any were stripped.
    #[must_use]
    pub fn element(&self) -> (&Self, bool) {
        let mut current = self;
        let mut is_array = false;
        while let Self::Array(inner) = current {
            current = inner;
            is_array = true;
        }
        (current, is_array)
    }

    /// The referenced asset type, looking through arrays.
    #[must_use]
    pub fn ref_target(&self) -> Option<&str> {
        match self.element().0 {
            Self::Ref(target) => Some(target),
            _ => None,
        }
    }

    /// True for `->T` and `[]->T`.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.ref_target().is_some()
    }

    /// True for argument-only kinds (`@asset`, `@key`, `@update`, `@query`).
    #[must_use]
    pub fn is_argument_only(&self) -> bool {
        matches!(
            self.element().0,
            Self::Asset | Self::Key | Self::Update | Self::Query
        )
    }
}

impl fmt::Display for DataTypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(tag) => write!(f, "{}", tag),
            Self::Ref(target) => write!(f, "->{}", target),
            Self::Array(inner) => write!(f, "[]{}", inner),
            Self::Object => f.write_str("@object"),
            Self::Asset => f.write_str("@asset"),
            Self::Key => f.write_str("@key"),
            Self::Update => f.write_str("@update"),
            Self::Query => f.write_str("@query"),
        }
    }
}

impl Serialize for DataTypeRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DataTypeRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_form() {
        assert_eq!(
            DataTypeRef::parse("string").expect("scalar"),
            DataTypeRef::Scalar("string".into())
        );
        assert_eq!(
            DataTypeRef::parse("->person").expect("ref"),
            DataTypeRef::Ref("person".into())
        );
        assert_eq!(
            DataTypeRef::parse("[]->book").expect("array of refs"),
            DataTypeRef::Array(Box::new(DataTypeRef::Ref("book".into())))
        );
        assert_eq!(
            DataTypeRef::parse("[][]integer").expect("nested"),
            DataTypeRef::Array(Box::new(DataTypeRef::Array(Box::new(
                DataTypeRef::Scalar("integer".into())
            ))))
        );
        assert_eq!(
            DataTypeRef::parse("@object").expect("object"),
            DataTypeRef::Object
        );
        assert_eq!(DataTypeRef::parse("@key").expect("key"), DataTypeRef::Key);
    }

    #[test]
    fn rejects_malformed() {
        for raw in ["", "->", "->@object", "@bogus", "[]"] {
            assert!(DataTypeRef::parse(raw).is_err(), "{:?} accepted", raw);
        }
    }

    #[test]
    fn display_round_trips() {
        for raw in ["string", "->person", "[]->book", "[]@object", "@update", "[][]number"] {
            let parsed = DataTypeRef::parse(raw).expect("parse");
            assert_eq!(parsed.to_string(), raw);
        }
    }

    #[test]
    fn element_and_target() {
        let t = DataTypeRef::parse("[]->book").expect("parse");
        assert_eq!(t.ref_target(), Some("book"));
        assert!(t.element().1);
        assert!(!DataTypeRef::parse("@object").expect("parse").is_reference());
        assert!(DataTypeRef::parse("[]@asset").expect("parse").is_argument_only());
    }
}
