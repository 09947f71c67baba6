//! # Operation Catalog
//!
//! Router-visible operations. Each declares its method, whether it is
//! read-only, who may call it, and a typed argument list validated before
//! the routine runs.

mod args;
mod builtin;

pub use args::validate_args;
pub use builtin::builtins;

use crate::access::CallerPattern;
use crate::schema::{DataTypeRef, SchemaRegistry};
use crate::session::Session;
use crate::types::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// HTTP-style method hint for routers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// One declared argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arg {
    pub tag: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub data_type: DataTypeRef,
    #[serde(default)]
    pub required: bool,
    /// Read from the transient channel instead of the argument map.
    #[serde(default)]
    pub private: bool,
}

impl Arg {
    pub fn new(tag: &str, data_type: &str) -> Result<Self> {
        Ok(Self {
            tag: tag.to_string(),
            label: tag.to_string(),
            description: String::new(),
            data_type: DataTypeRef::parse(data_type)?,
            required: false,
            private: false,
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

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }
}

/// Body of an operation.
#[derive(Clone)]
pub struct Routine(Arc<dyn Fn(&mut Session<'_>, &Map<String, Value>) -> Result<Value> + Send + Sync>);

impl fmt::Debug for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Routine(..)")
    }
}

/// A catalog operation.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub tag: String,
    pub label: String,
    pub description: String,
    pub method: Method,
    pub read_only: bool,
    /// Allowed callers. `None` means anyone.
    pub callers: Option<Vec<CallerPattern>>,
    pub args: Vec<Arg>,
    routine: Routine,
}

impl Transaction {
    pub fn new<F>(tag: &str, method: Method, routine: F) -> Self
    where
        F: Fn(&mut Session<'_>, &Map<String, Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            tag: tag.to_string(),
            label: tag.to_string(),
            description: String::new(),
            method,
            read_only: false,
            callers: None,
            args: Vec::new(),
            routine: Routine(Arc::new(routine)),
        }
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

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub fn callers(mut self, callers: Vec<CallerPattern>) -> Self {
        self.callers = Some(callers);
        self
    }

    #[must_use]
    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    pub(crate) fn run(&self, session: &mut Session<'_>, args: &Map<String, Value>) -> Result<Value> {
        (self.routine.0)(session, args)
    }

    /// Argument tags are unique and every argument type resolves.
    pub(crate) fn check(&self, registry: &SchemaRegistry) -> Result<()> {
        let mut seen = BTreeSet::new();
        for arg in &self.args {
            if !seen.insert(arg.tag.as_str()) {
                return Err(TesseraError::bad_request(format!(
                    "duplicate argument '{}'",
                    arg.tag
                )));
            }
            let (element, _) = arg.data_type.element();
            let known = match element {
                DataTypeRef::Scalar(tag) => registry.datatypes().contains(tag),
                DataTypeRef::Ref(target) => registry.fetch(target).is_some(),
                _ => true,
            };
            if !known {
                return Err(TesseraError::bad_request(format!(
                    "argument '{}' has unknown data type '{}'",
                    arg.tag, arg.data_type
                )));
            }
        }
        Ok(())
    }

    /// Descriptor returned by `getTx`.
    #[must_use]
    pub fn descriptor(&self) -> Value {
        json!({
            "tag": self.tag,
            "label": self.label,
            "description": self.description,
            "method": self.method,
            "readOnly": self.read_only,
            "callers": self.callers,
            "args": self.args,
        })
    }

    /// Short descriptor used when listing the catalog.
    #[must_use]
    pub fn summary(&self) -> Value {
        json!({
            "tag": self.tag,
            "label": self.label,
            "description": self.description,
            "method": self.method,
            "readOnly": self.read_only,
        })
    }
}
