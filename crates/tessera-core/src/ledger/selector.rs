//! Mango-style rich query evaluation.
//!
//! Supported: implicit equality, nested field objects, dotted paths,
//! `$eq $ne $gt $gte $lt $lte $in $nin $exists $regex $and $or $nor $not`,
//! `sort`, `limit`, and bookmark pagination. `use_index` is accepted and
//! ignored.

use super::{PageRequest, QueryPage};
use crate::types::StoreError;
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

// =============================================================================
// SELECTOR
// =============================================================================

/// Compiled selector tree.
#[derive(Debug, Clone)]
pub enum Selector {
    And(Vec<Selector>),
    Or(Vec<Selector>),
    Nor(Vec<Selector>),
    Not(Box<Selector>),
    Field { path: Vec<String>, condition: Condition },
}

/// Condition over one field.
#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    Not(Box<Condition>),
    All(Vec<Condition>),
}

fn invalid(msg: impl Into<String>) -> StoreError {
    StoreError::InvalidQuery(msg.into())
}

impl Selector {
    /// Compile a selector object.
    pub fn parse(value: &Value) -> Result<Self, StoreError> {
        let map = value
            .as_object()
            .ok_or_else(|| invalid("selector must be an object"))?;
        Self::parse_map(map, &[])
    }

    fn parse_map(map: &Map<String, Value>, prefix: &[String]) -> Result<Self, StoreError> {
        let mut clauses = Vec::with_capacity(map.len());
        for (name, value) in map {
            let clause = match name.as_str() {
                "$and" => Self::And(Self::parse_list(value, prefix)?),
                "$or" => Self::Or(Self::parse_list(value, prefix)?),
                "$nor" => Self::Nor(Self::parse_list(value, prefix)?),
                "$not" => {
                    let inner = value
                        .as_object()
                        .ok_or_else(|| invalid("$not expects an object"))?;
                    Self::Not(Box::new(Self::parse_map(inner, prefix)?))
                }
                op if op.starts_with('$') => {
                    return Err(invalid(format!("unsupported operator {}", op)));
                }
                field => {
                    let mut path = prefix.to_vec();
                    path.extend(field.split('.').map(str::to_string));
                    Self::parse_field(path, value)?
                }
            };
            clauses.push(clause);
        }
        Ok(match clauses.len() {
            1 => clauses.remove(0),
            _ => Self::And(clauses),
        })
    }

    fn parse_list(value: &Value, prefix: &[String]) -> Result<Vec<Self>, StoreError> {
        value
            .as_array()
            .ok_or_else(|| invalid("combination operators expect an array"))?
            .iter()
            .map(|item| {
                item.as_object()
                    .ok_or_else(|| invalid("combination members must be objects"))
                    .and_then(|m| Self::parse_map(m, prefix))
            })
            .collect()
    }

    fn parse_field(path: Vec<String>, value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => Ok(Self::Field {
                path,
                condition: Condition::parse_ops(map)?,
            }),
            // Sub-field selector: {"a": {"b": 1}} means a.b == 1.
            Value::Object(map) if !map.is_empty() => Self::parse_map(map, &path),
            other => Ok(Self::Field {
                path,
                condition: Condition::Eq(other.clone()),
            }),
        }
    }

    /// Evaluate against a document.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::And(all) => all.iter().all(|s| s.matches(doc)),
            Self::Or(any) => any.iter().any(|s| s.matches(doc)),
            Self::Nor(none) => !none.iter().any(|s| s.matches(doc)),
            Self::Not(inner) => !inner.matches(doc),
            Self::Field { path, condition } => condition.matches(lookup(doc, path)),
        }
    }
}

impl Condition {
    fn parse_ops(map: &Map<String, Value>) -> Result<Self, StoreError> {
        let mut all = map
            .iter()
            .map(|(op, arg)| Self::parse_op(op, arg))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match all.len() {
            1 => all.remove(0),
            _ => Self::All(all),
        })
    }

    fn parse_op(op: &str, arg: &Value) -> Result<Self, StoreError> {
        let list = |arg: &Value| {
            arg.as_array()
                .cloned()
                .ok_or_else(|| invalid(format!("{} expects an array", op)))
        };
        Ok(match op {
            "$eq" => Self::Eq(arg.clone()),
            "$ne" => Self::Ne(arg.clone()),
            "$gt" => Self::Gt(arg.clone()),
            "$gte" => Self::Gte(arg.clone()),
            "$lt" => Self::Lt(arg.clone()),
            "$lte" => Self::Lte(arg.clone()),
            "$in" => Self::In(list(arg)?),
            "$nin" => Self::Nin(list(arg)?),
            "$exists" => Self::Exists(
                arg.as_bool()
                    .ok_or_else(|| invalid("$exists expects a boolean"))?,
            ),
            "$regex" => {
                let pattern = arg
                    .as_str()
                    .ok_or_else(|| invalid("$regex expects a string"))?;
                Self::Regex(
                    Regex::new(pattern).map_err(|e| invalid(format!("bad $regex: {}", e)))?,
                )
            }
            "$not" => {
                let inner = arg
                    .as_object()
                    .ok_or_else(|| invalid("$not expects an object"))?;
                Self::Not(Box::new(Self::parse_ops(inner)?))
            }
            other => return Err(invalid(format!("unsupported operator {}", other))),
        })
    }

    fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            Self::Exists(expected) => field.is_some() == *expected,
            Self::Not(inner) => !inner.matches(field),
            Self::All(all) => all.iter().all(|c| c.matches(field)),
            Self::Ne(expected) => field.is_none_or(|v| !json_eq(v, expected)),
            Self::Nin(options) => field.is_none_or(|v| !options.iter().any(|o| json_eq(v, o))),
            _ => field.is_some_and(|v| self.matches_present(v)),
        }
    }

    fn matches_present(&self, v: &Value) -> bool {
        match self {
            Self::Eq(expected) => json_eq(v, expected),
            Self::Gt(bound) => compare(v, bound) == Some(Ordering::Greater),
            Self::Gte(bound) => matches!(
                compare(v, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt(bound) => compare(v, bound) == Some(Ordering::Less),
            Self::Lte(bound) => {
                matches!(compare(v, bound), Some(Ordering::Less | Ordering::Equal))
            }
            Self::In(options) => options.iter().any(|o| json_eq(v, o)),
            Self::Regex(re) => v.as_str().is_some_and(|s| re.is_match(s)),
            _ => false,
        }
    }
}

fn lookup<'v>(doc: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter().try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Order of two scalars of the same JSON kind.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

// Missing and mixed-kind values sort first.
fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
    }
}

// =============================================================================
// RICH QUERY
// =============================================================================

/// A parsed query document: `{selector, sort?, limit?, use_index?}`.
#[derive(Debug, Clone)]
pub struct RichQuery {
    selector: Selector,
    sort: Vec<(Vec<String>, bool)>,
    limit: Option<usize>,
}

impl RichQuery {
    /// Parse a query document.
    pub fn parse(query: &Value) -> Result<Self, StoreError> {
        let doc = query
            .as_object()
            .ok_or_else(|| invalid("query must be an object"))?;
        let selector = Selector::parse(
            doc.get("selector")
                .ok_or_else(|| invalid("query has no selector"))?,
        )?;

        let mut sort = Vec::new();
        if let Some(spec) = doc.get("sort") {
            let items = spec
                .as_array()
                .ok_or_else(|| invalid("sort must be an array"))?;
            for item in items {
                let (field, ascending) = match item {
                    Value::String(field) => (field.as_str(), true),
                    Value::Object(m) if m.len() == 1 => {
                        let (field, dir) = m
                            .iter()
                            .next()
                            .ok_or_else(|| invalid("empty sort entry"))?;
                        match dir.as_str() {
                            Some("asc") => (field.as_str(), true),
                            Some("desc") => (field.as_str(), false),
                            _ => return Err(invalid("sort direction must be asc or desc")),
                        }
                    }
                    _ => return Err(invalid("malformed sort entry")),
                };
                sort.push((field.split('.').map(str::to_string).collect(), ascending));
            }
        }

        let limit = match doc.get("limit") {
            None => None,
            Some(v) => Some(
                v.as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| invalid("limit must be a non-negative integer"))?,
            ),
        };

        Ok(Self {
            selector,
            sort,
            limit,
        })
    }

    /// Evaluate over `(key, value)` records in key order.
    ///
    /// Values that are not JSON objects are skipped. A page request
    /// overrides `limit`; the bookmark is the offset of the next page.
    pub fn run(
        &self,
        records: Vec<(String, Vec<u8>)>,
        page: Option<&PageRequest>,
    ) -> Result<QueryPage, StoreError> {
        let mut hits: Vec<(String, Vec<u8>, Value)> = records
            .into_iter()
            .filter_map(|(key, bytes)| {
                let doc: Value = serde_json::from_slice(&bytes).ok()?;
                (doc.is_object() && self.selector.matches(&doc)).then_some((key, bytes, doc))
            })
            .collect();

        if !self.sort.is_empty() {
            hits.sort_by(|(_, _, a), (_, _, b)| {
                self.sort
                    .iter()
                    .map(|(path, ascending)| {
                        let ord = sort_order(lookup(a, path), lookup(b, path));
                        if *ascending { ord } else { ord.reverse() }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let (start, take) = match page {
            Some(p) => {
                let start = if p.bookmark.is_empty() {
                    0
                } else {
                    p.bookmark
                        .parse::<usize>()
                        .map_err(|_| invalid(format!("invalid bookmark {:?}", p.bookmark)))?
                };
                (start, p.page_size.max(1))
            }
            None => (0, self.limit.unwrap_or(usize::MAX)),
        };

        let total = hits.len();
        let records: Vec<(String, Vec<u8>)> = hits
            .into_iter()
            .skip(start)
            .take(take)
            .map(|(k, v, _)| (k, v))
            .collect();

        let next = start.saturating_add(records.len());
        let bookmark = if page.is_some() && next < total {
            next.to_string()
        } else {
            String::new()
        };
        Ok(QueryPage { records, bookmark })
    }
}
