//! # Access Control
//!
//! Caller patterns and the predicate that evaluates them against an `Identity`.
//!
//! A pattern string starting with `$` is a regular expression (the `$` is
//! stripped); anything else is an exact match. Patterns are compiled once,
//! when they are constructed or deserialized, so an invalid expression is
//! rejected at boot and the hot path never compiles a regex.

use crate::types::{Identity, Result, TesseraError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// IDENTITY PATTERN
// =============================================================================

/// A literal or regex pattern over one identity field.
#[derive(Clone)]
pub enum IdentityPattern {
    /// Exact string match.
    Exact(String),
    /// Precompiled expression. `source` keeps the raw `$`-prefixed text.
    Regex { source: String, regex: Regex },
}

impl IdentityPattern {
    /// Parse and compile a pattern.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.strip_prefix('$') {
            Some(expr) => {
                // Anchored: `$org\dMSP` must not accept `org1MSPx`.
                let regex = Regex::new(&format!("^(?:{})$", expr)).map_err(|e| {
                    TesseraError::bad_request(format!("invalid pattern '{}': {}", raw, e))
                })?;
                Ok(Self::Regex {
                    source: raw.to_string(),
                    regex,
                })
            }
            None => Ok(Self::Exact(raw.to_string())),
        }
    }

    /// Check a single value against the pattern.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == value,
            Self::Regex { regex, .. } => regex.is_match(value),
        }
    }

    /// The raw pattern text as written in the schema.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(s) => s,
            Self::Regex { source, .. } => source,
        }
    }
}

impl fmt::Debug for IdentityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IdentityPattern").field(&self.as_str()).finish()
    }
}

impl PartialEq for IdentityPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for IdentityPattern {}

impl TryFrom<String> for IdentityPattern {
    type Error = TesseraError;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<IdentityPattern> for String {
    fn from(pattern: IdentityPattern) -> Self {
        pattern.as_str().to_string()
    }
}

impl Serialize for IdentityPattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IdentityPattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// CALLER PATTERN
// =============================================================================

/// `(msp, organizational-unit, attributes)` pattern. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerPattern {
    /// Pattern over the caller's MSP id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msp: Option<IdentityPattern>,
    /// Pattern over the caller's organizational unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ou: Option<IdentityPattern>,
    /// Patterns over named credential attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, IdentityPattern>,
}

impl CallerPattern {
    /// Pattern over the MSP field only.
    pub fn msp(pattern: &str) -> Result<Self> {
        Ok(Self {
            msp: Some(IdentityPattern::parse(pattern)?),
            ..Self::default()
        })
    }

    /// Add an organizational unit constraint.
    pub fn with_ou(mut self, pattern: &str) -> Result<Self> {
        self.ou = Some(IdentityPattern::parse(pattern)?);
        Ok(self)
    }

    /// Add an attribute constraint.
    pub fn with_attribute(mut self, name: &str, pattern: &str) -> Result<Self> {
        self.attributes
            .insert(name.to_string(), IdentityPattern::parse(pattern)?);
        Ok(self)
    }

    /// True if every constrained field of the identity matches.
    #[must_use]
    pub fn matches(&self, identity: &Identity) -> bool {
        if self.msp.as_ref().is_some_and(|msp| !msp.matches(&identity.msp)) {
            return false;
        }
        if let Some(ou) = &self.ou {
            match &identity.ou {
                Some(value) if ou.matches(value) => {}
                _ => return false,
            }
        }
        self.attributes.iter().all(|(name, pattern)| {
            identity
                .attributes
                .get(name)
                .is_some_and(|value| pattern.matches(value))
        })
    }
}

// =============================================================================
// PREDICATES
// =============================================================================

/// Evaluate an allow-list of caller patterns.
///
/// `None` is an open list (any caller). `Some(&[])` admits nobody.
#[must_use]
pub fn allows_caller(patterns: Option<&[CallerPattern]>, identity: &Identity) -> bool {
    match patterns {
        None => true,
        Some(list) => list.iter().any(|p| p.matches(identity)),
    }
}

/// Evaluate a property's writers list against the caller's MSP.
///
/// An empty list means any writer.
#[must_use]
pub fn allows_writer(writers: &[IdentityPattern], msp: &str) -> bool {
    writers.is_empty() || writers.iter().any(|w| w.matches(msp))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_is_exact() {
        let p = IdentityPattern::parse("org1MSP").expect("parse");
        assert!(p.matches("org1MSP"));
        assert!(!p.matches("org1MSPx"));
        assert!(!p.matches("org2MSP"));
    }

    #[test]
    fn regex_pattern_is_anchored() {
        let p = IdentityPattern::parse(r"$org\dMSP").expect("parse");
        assert!(p.matches("org1MSP"));
        assert!(p.matches("org2MSP"));
        assert!(!p.matches("org12MSP"));
        assert!(!p.matches("xorg1MSP"));
        assert_eq!(p.as_str(), r"$org\dMSP");
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err = IdentityPattern::parse("$org(").expect_err("invalid");
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn pattern_serde_keeps_raw_text() {
        let p: IdentityPattern = serde_json::from_str(r#""$org\\dMSP""#).expect("de");
        assert_eq!(serde_json::to_string(&p).expect("ser"), r#""$org\\dMSP""#);

        let bad: std::result::Result<IdentityPattern, _> = serde_json::from_str(r#""$[""#);
        assert!(bad.is_err());
    }

    #[test]
    fn caller_pattern_checks_every_field() {
        let pattern = CallerPattern::msp(r"$org\dMSP")
            .and_then(|p| p.with_ou("admin"))
            .and_then(|p| p.with_attribute("role", "$(auditor|manager)"))
            .expect("pattern");

        let ok = Identity::new("org1MSP")
            .with_ou("admin")
            .with_attribute("role", "auditor");
        assert!(pattern.matches(&ok));

        let wrong_ou = Identity::new("org1MSP")
            .with_ou("client")
            .with_attribute("role", "auditor");
        assert!(!pattern.matches(&wrong_ou));

        let missing_attr = Identity::new("org1MSP").with_ou("admin");
        assert!(!pattern.matches(&missing_attr));
    }

    #[test]
    fn empty_pattern_matches_anyone() {
        assert!(CallerPattern::default().matches(&Identity::new("anyMSP")));
    }

    #[test]
    fn open_and_closed_allow_lists() {
        let id = Identity::new("org3MSP");
        assert!(allows_caller(None, &id));
        assert!(!allows_caller(Some(&[]), &id));

        let list = vec![CallerPattern::msp("org3MSP").expect("pattern")];
        assert!(allows_caller(Some(&list), &id));
        assert!(!allows_caller(Some(&list), &Identity::new("org1MSP")));
    }

    #[test]
    fn writers_default_open() {
        assert!(allows_writer(&[], "org9MSP"));
        let writers = vec![IdentityPattern::parse("org1MSP").expect("parse")];
        assert!(allows_writer(&writers, "org1MSP"));
        assert!(!allows_writer(&writers, "org2MSP"));
    }
}
