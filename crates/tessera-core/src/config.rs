//! # Engine Configuration
//!
//! Boot-time settings of an `Engine`. Deserializable so hosts can embed
//! the section in their own configuration files.

use crate::access::CallerPattern;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Version of the engine crate, reported by `getHeader`.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `@`-attributes removed from query results.
    pub strip_metadata: Vec<String>,
    /// Runtime schema evolution.
    pub dynamic: DynamicConfig,
    /// Boot header.
    pub header: Header,
}

/// Settings of the dynamic asset-type registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicConfig {
    /// When false, the registry operations fail with 501.
    pub enabled: bool,
    /// Callers allowed to mutate the registry. `None` admits anyone.
    pub admins: Option<Vec<CallerPattern>>,
}

/// Application header declared at boot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Header {
    pub name: String,
    pub version: String,
    /// Per-MSP color triple.
    pub colors: BTreeMap<String, [String; 3]>,
    /// Per-MSP title.
    pub title: BTreeMap<String, String>,
}

impl Header {
    /// Descriptor returned by `getHeader`.
    #[must_use]
    pub fn describe(&self) -> Value {
        json!({
            "name": self.name,
            "version": self.version,
            "colors": self.colors,
            "title": self.title,
            "engineVersion": ENGINE_VERSION,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_closed_and_empty() {
        let config = EngineConfig::default();
        assert!(!config.dynamic.enabled);
        assert!(config.dynamic.admins.is_none());
        assert!(config.strip_metadata.is_empty());
    }

    #[test]
    fn deserializes_partial_sections() {
        let config: EngineConfig = serde_json::from_value(json!({
            "strip_metadata": ["@lastTx"],
            "dynamic": {"enabled": true, "admins": [{"msp": "org1MSP"}]},
            "header": {"name": "library", "colors": {"org1MSP": ["#000", "#fff", "#f00"]}},
        }))
        .expect("config");
        assert!(config.dynamic.enabled);
        assert_eq!(config.header.name, "library");
        assert_eq!(config.header.colors["org1MSP"][2], "#f00");
    }

    #[test]
    fn header_reports_engine_version() {
        let described = Header::default().describe();
        assert_eq!(described["engineVersion"], json!(ENGINE_VERSION));
    }
}
