//! # Query Layer
//!
//! Pass-through of structured selectors to the substrate's rich query,
//! with post-processing:
//!
//! - optional resolution of references, as in `Session::get_recursive`
//! - removal of the configured `@`-attributes
//!
//! A query on a private asset type (`selector["@assetType"]`) runs against
//! that type's collection. Private collections cannot be paginated.
//!
//! Aggregations (`count`, `sum`, `first`, `fold`) walk the whole unpaginated
//! result, since the substrate has no server-side reduction. Asset history
//! lives here too.

use crate::asset::Asset;
use crate::datatype::format_rfc3339;
use crate::key::Key;
use crate::ledger::{PageRequest, QueryPage};
use crate::primitives::{ATTR_ASSET_TYPE, DEFAULT_PAGE_SIZE};
use crate::session::Session;
use crate::types::{Result, TesseraError};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

/// One page of search results.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub records: Vec<Value>,
    /// Position of the next page; empty when exhausted or unpaginated.
    pub bookmark: String,
}

impl SearchResult {
    /// Wire form returned by the `search` operation.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "result": self.records,
            "metadata": {
                "bookmark": self.bookmark,
                "fetchedRecordsCount": self.records.len(),
            },
        })
    }
}

/// Split a request into the substrate query and its page, if any.
///
/// A request is paginated when it carries a `bookmark` member; the page
/// size is its `limit`, or the default page size.
fn prepare(request: &Value) -> Result<(Value, Option<PageRequest>)> {
    let doc = request
        .as_object()
        .ok_or_else(|| TesseraError::bad_request("query must be a JSON object"))?;
    if !matches!(doc.get("selector"), Some(Value::Object(_))) {
        return Err(TesseraError::bad_request(
            "query must carry a 'selector' object",
        ));
    }

    let mut query: Map<String, Value> = doc.clone();
    let page = match query.remove("bookmark") {
        None => None,
        Some(Value::String(bookmark)) => {
            let page_size = match query.remove("limit") {
                None => DEFAULT_PAGE_SIZE as usize,
                Some(v) => v
                    .as_u64()
                    .filter(|n| *n > 0)
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| TesseraError::bad_request("limit must be a positive integer"))?,
            };
            Some(PageRequest { page_size, bookmark })
        }
        Some(_) => return Err(TesseraError::bad_request("bookmark must be a string")),
    };
    Ok((Value::Object(query), page))
}

impl Session<'_> {
    /// Run a query and decode its records.
    fn run_query(&self, query: &Value, page: Option<&PageRequest>) -> Result<QueryPage> {
        let collection = query
            .get("selector")
            .and_then(|s| s.get(ATTR_ASSET_TYPE))
            .and_then(Value::as_str)
            .and_then(|tag| self.registry().fetch(tag))
            .and_then(|t| t.collection().map(str::to_string));

        match collection {
            Some(collection) => {
                if page.is_some() {
                    return Err(TesseraError::not_implemented(
                        "pagination is not supported on private collections",
                    ));
                }
                self.stub().get_private_query_result(&collection, query)
            }
            None => self.stub().get_query_result(query, page),
        }
    }

    fn strip(&self, value: Value) -> Value {
        let stripped = &self.engine().config().strip_metadata;
        match value {
            Value::Object(mut map) if !stripped.is_empty() => {
                for attr in stripped {
                    map.remove(attr);
                }
                Value::Object(map)
            }
            other => other,
        }
    }

    /// Search with the request's own pagination.
    pub fn search(&self, request: &Value, resolve: bool) -> Result<SearchResult> {
        let (query, page) = prepare(request)?;
        self.collect(&query, page.as_ref(), resolve)
    }

    /// Search one explicit page.
    pub fn search_page(
        &self,
        request: &Value,
        page_size: usize,
        bookmark: &str,
        resolve: bool,
    ) -> Result<SearchResult> {
        let (query, _) = prepare(request)?;
        let page = PageRequest {
            page_size,
            bookmark: bookmark.to_string(),
        };
        self.collect(&query, Some(&page), resolve)
    }

    fn collect(&self, query: &Value, page: Option<&PageRequest>, resolve: bool) -> Result<SearchResult> {
        let result = self.run_query(query, page)?;
        let records = result
            .records
            .iter()
            .map(|(_, bytes)| {
                let asset = Asset::from_bytes(bytes)?;
                let value = if resolve {
                    let mut branch = BTreeSet::from([asset.key_str().to_string()]);
                    self.resolve_asset(asset, &mut branch, 0)?
                } else {
                    asset.into_map().into()
                };
                Ok(self.strip(value))
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(records = records.len(), tx = self.tx(), "query executed");
        Ok(SearchResult {
            records,
            bookmark: result.bookmark,
        })
    }

    /// Fold every matching record, in result order.
    pub fn fold<C, F>(&self, request: &Value, init: C, mut f: F) -> Result<C>
    where
        F: FnMut(C, &Value) -> Result<C>,
    {
        let (query, _) = prepare(request)?;
        let result = self.run_query(&query, None)?;
        let mut acc = init;
        for (_, bytes) in &result.records {
            let asset = Asset::from_bytes(bytes)?;
            acc = f(acc, &asset.to_value())?;
        }
        Ok(acc)
    }

    /// Number of matching records.
    pub fn count(&self, request: &Value) -> Result<usize> {
        self.fold(request, 0, |n, _| Ok(n + 1))
    }

    /// Sum of a numeric property over matching records; other values are ignored.
    pub fn sum(&self, request: &Value, prop: &str) -> Result<f64> {
        self.fold(request, 0.0, |total, record| {
            Ok(total + record.get(prop).and_then(Value::as_f64).unwrap_or(0.0))
        })
    }

    /// First matching record.
    pub fn first(&self, request: &Value) -> Result<Option<Value>> {
        self.fold(request, None, |found, record| {
            Ok(found.or_else(|| Some(record.clone())))
        })
    }

    // =========================================================================
    // HISTORY
    // =========================================================================

    /// Every committed version of a public asset, oldest first, each merged
    /// with `_txId`, `_timestamp` and `_isDelete`.
    ///
    /// With `before`, only the latest version strictly older than it; 404
    /// when there is none.
    pub fn history(&self, key: &Key, before: Option<DateTime<Utc>>) -> Result<Vec<Value>> {
        if self.registry().require(&key.asset_type)?.is_private() {
            return Err(TesseraError::not_implemented(
                "history is not available for private assets",
            ));
        }
        let entries = self.stub().get_history_for_key(&key.key)?;

        let selected: Vec<_> = match before {
            None => entries.iter().collect(),
            Some(target) => {
                let latest = entries
                    .iter()
                    .filter(|e| e.timestamp < target)
                    .max_by_key(|e| e.timestamp)
                    .ok_or_else(|| {
                        TesseraError::not_found(format!(
                            "no version of '{}' before {}",
                            key,
                            format_rfc3339(&target)
                        ))
                    })?;
                vec![latest]
            }
        };

        selected
            .into_iter()
            .map(|entry| {
                let mut version = if entry.is_delete || entry.value.is_empty() {
                    Map::new()
                } else {
                    Asset::from_bytes(&entry.value)?.into_map()
                };
                version.insert("_txId".into(), Value::String(entry.tx_id.clone()));
                version.insert(
                    "_timestamp".into(),
                    Value::String(format_rfc3339(&entry.timestamp)),
                );
                version.insert("_isDelete".into(), Value::Bool(entry.is_delete));
                Ok(Value::Object(version))
            })
            .collect()
    }
}
