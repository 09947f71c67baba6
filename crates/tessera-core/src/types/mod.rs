//! # Core Type Definitions
//!
//! This module contains the types shared by every layer of the engine:
//! - Failure statuses and the wrapped engine error (`Status`, `TesseraError`)
//! - Ledger backend failures (`StoreError`)
//! - Caller identity as extracted from the substrate (`Identity`)
//!
//! ## Error Propagation
//!
//! Every public operation returns `Result<T, TesseraError>`. Each layer wraps
//! lower-layer failures with context while keeping the originating status, so
//! the user-visible failure is the wrap chain plus the first status raised.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// STATUS
// =============================================================================

/// Failure classes, numbered after their HTTP counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Malformed input, missing required property, type mismatch, bad selector.
    BadRequest,
    /// Writer or caller not permitted.
    Forbidden,
    /// Asset, type, event or transaction not found.
    NotFound,
    /// Create collides with an existing key.
    Conflict,
    /// Substrate or serialization failure, invariant violation.
    Internal,
    /// Unimplemented path.
    NotImplemented,
}

impl Status {
    /// Numeric status code.
    #[must_use]
    pub const fn code(self) -> i16 {
        match self {
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Internal => 500,
            Self::NotImplemented => 501,
        }
    }

    /// Map a numeric code back to a status. Unknown codes are `None`.
    #[must_use]
    pub const fn from_code(code: i16) -> Option<Self> {
        match code {
            400 => Some(Self::BadRequest),
            403 => Some(Self::Forbidden),
            404 => Some(Self::NotFound),
            409 => Some(Self::Conflict),
            500 => Some(Self::Internal),
            501 => Some(Self::NotImplemented),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// =============================================================================
// ENGINE ERROR
// =============================================================================

/// Typed failure returned by every engine operation.
///
/// - No silent failures
/// - `wrap` prepends context and never changes the status
/// - The engine never panics; all errors are values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TesseraError {
    status: Status,
    message: String,
}

impl TesseraError {
    /// Create an error with an explicit status.
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 400: malformed input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, message)
    }

    /// 403: caller not permitted.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(Status::Forbidden, message)
    }

    /// 404: not found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Status::NotFound, message)
    }

    /// 409: key collision.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(Status::Conflict, message)
    }

    /// 500: internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Status::Internal, message)
    }

    /// 501: unimplemented path.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(Status::NotImplemented, message)
    }

    /// Prepend context, preserving the originating status.
    #[must_use]
    pub fn wrap(self, context: impl fmt::Display) -> Self {
        Self {
            status: self.status,
            message: format!("{}: {}", context, self.message),
        }
    }

    /// The originating status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// The originating status as a number.
    #[must_use]
    pub const fn code(&self) -> i16 {
        self.status.code()
    }

    /// The full wrap chain, outermost context first.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Shorthand used across the crate.
pub type Result<T, E = TesseraError> = std::result::Result<T, E>;

/// Wrap the error side of a `Result` with context.
pub trait ResultExt<T> {
    /// Prepend a fixed context string.
    fn wrap_err(self, context: &str) -> Result<T>;

    /// Prepend lazily built context.
    fn wrap_with<F, C>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: fmt::Display;
}

impl<T> ResultExt<T> for Result<T> {
    fn wrap_err(self, context: &str) -> Result<T> {
        self.map_err(|e| e.wrap(context))
    }

    fn wrap_with<F, C>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: fmt::Display,
    {
        self.map_err(|e| e.wrap(context()))
    }
}

// =============================================================================
// STORE ERROR
// =============================================================================

/// Errors raised by ledger backends.
///
/// Backends speak in these terms; the engine converts them into
/// `TesseraError` at the `Stub` boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O or database error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The caller is not a member of the private collection.
    #[error("access denied to collection {0}")]
    AccessDenied(String),

    /// A key or composite key part is malformed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A rich query could not be parsed or evaluated.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The backend does not support the requested capability.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<StoreError> for TesseraError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::Io(_) | StoreError::Serialization(_) => Status::Internal,
            StoreError::AccessDenied(_) => Status::Forbidden,
            StoreError::InvalidKey(_) | StoreError::InvalidQuery(_) => Status::BadRequest,
            StoreError::Unsupported(_) => Status::NotImplemented,
        };
        Self::new(status, err.to_string())
    }
}

// =============================================================================
// CALLER IDENTITY
// =============================================================================

/// Identity of the caller of an operation, as resolved by the substrate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Membership service provider id (the caller's organization).
    pub msp: String,
    /// Organizational unit, if the credential carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ou: Option<String>,
    /// Named credential attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Identity {
    /// Identity with only an MSP id.
    pub fn new(msp: impl Into<String>) -> Self {
        Self {
            msp: msp.into(),
            ou: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Set the organizational unit.
    #[must_use]
    pub fn with_ou(mut self, ou: impl Into<String>) -> Self {
        self.ou = Some(ou.into());
        self
    }

    /// Add a credential attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================
