//! # Engine Primitives
//!
//! Reserved attribute names and fixed constants of the engine.
//!
//! These values are part of the persisted object shape and of the
//! reference index layout. Changing any of them invalidates stored data.

/// Type tag of an asset.
pub const ATTR_ASSET_TYPE: &str = "@assetType";

/// Derived identity of an asset: `"<typeTag>:<uuidv5>"`.
pub const ATTR_KEY: &str = "@key";

/// MSP id of the caller at the last write.
pub const ATTR_LAST_TOUCH_BY: &str = "@lastTouchBy";

/// Tag of the operation that performed the last write.
pub const ATTR_LAST_TX: &str = "@lastTx";

/// RFC3339 timestamp of the last write.
pub const ATTR_LAST_UPDATED: &str = "@lastUpdated";

/// Hash of an unreadable private sub-asset (recursive reads only).
pub const ATTR_HASH: &str = "@hash";

/// Every reserved attribute an asset may carry at rest.
pub const RESERVED_ATTRIBUTES: [&str; 5] = [
    ATTR_ASSET_TYPE,
    ATTR_KEY,
    ATTR_LAST_TOUCH_BY,
    ATTR_LAST_TX,
    ATTR_LAST_UPDATED,
];

/// Metadata injected by the engine immediately before a write.
pub const WRITE_METADATA: [&str; 3] = [ATTR_LAST_TOUCH_BY, ATTR_LAST_TX, ATTR_LAST_UPDATED];

/// Pseudo asset type carried by opaque JSON objects.
pub const OBJECT_TYPE_TAG: &str = "@object";

/// Payload of a reference index record.
pub const REFERENCE_SENTINEL: &[u8] = &[0x00];

/// Separator of composite keys (`\0<objectType>\0<attr>\0...`).
pub const COMPOSITE_KEY_SEPARATOR: char = '\u{0000}';

/// Type tag of the registry meta-asset.
pub const REGISTRY_ASSET_TYPE: &str = "assetTypeListData";

/// Primary key value of the registry meta-asset singleton.
pub const REGISTRY_ASSET_ID: &str = "primary";

/// Maximum depth of recursive reads and writes.
///
/// Cycles are cut by the branch-scoped expanded set; this bound only guards
/// against pathological (acyclic but very deep) graphs.
pub const MAX_RESOLVE_DEPTH: usize = 64;

/// Default page size for paginated rich queries.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_attributes_are_at_prefixed() {
        for attr in RESERVED_ATTRIBUTES {
            assert!(attr.starts_with('@'));
        }
        assert!(ATTR_HASH.starts_with('@'));
    }

    #[test]
    fn sentinel_is_one_byte() {
        assert_eq!(REFERENCE_SENTINEL, &[0u8]);
    }
}
