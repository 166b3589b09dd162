//! # Core Type Definitions
//!
//! This module contains the types shared by every layer of the engine:
//! - Node identifiers (`Uid`)
//! - Scalar values carried by postings (`Value`)
//! - Error types (`TesseraError`)
//!
//! ## Identifier Rendering
//!
//! UIDs render as lowercase hexadecimal with a `0x` prefix everywhere they
//! leave the engine (query responses, CLI output, log fields). Parsing accepts
//! both the hex form and plain decimal.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// NODE IDENTIFIERS
// =============================================================================

/// Unique identifier of a node, allocated by the `Authority`.
///
/// Zero is never a valid UID; the allocator starts at `INITIAL_UID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Uid(pub u64);

impl Uid {
    /// Parse `0x1f` (hex) or `31` (decimal). Returns `None` for zero or garbage.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let raw = match text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16).ok()?,
            None => text.parse::<u64>().ok()?,
        };
        (raw != 0).then_some(Self(raw))
    }

    /// Get the raw identifier value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// =============================================================================
// SCALAR VALUES
// =============================================================================

/// A scalar value attached to a node through a predicate.
///
/// Deserializes untagged, so JSON mutations can use plain literals:
/// `"Alice"`, `42`, `1.5`, `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Render the value as a JSON value for query responses.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Str(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Short lowercase name of the variant, used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors returned by the Tessera engine.
///
/// - No silent failures: every fallible operation returns `Result<T, TesseraError>`
/// - No internal retries: the caller decides whether to retry the whole operation
/// - Internal consistency faults are assertions, not variants of this enum
#[derive(Debug, Error)]
pub enum TesseraError {
    /// Another engine is already open in this process.
    #[error("only one instance of the engine can exist in a process")]
    SingletonOnly,

    /// The configuration has no data directory.
    #[error("data directory is required")]
    EmptyDataDir,

    /// The configuration is present but not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine was closed (or never finished opening).
    #[error("engine is closed")]
    ClosedEngine,

    /// The namespace ID is beyond the highest ID ever allocated.
    #[error("namespace does not exist: {0}")]
    NamespaceNotFound(u64),

    /// A mutation statement could not be parsed or validated.
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    /// A schema document could not be parsed, or a value did not fit a schema type.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A query could not be parsed or evaluated.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A query touched more nodes than the configured limit.
    #[error("query result exceeds the node limit of {0}")]
    QueryLimitExceeded(usize),

    /// A caller-supplied argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Persisting or reading the lease record failed.
    #[error("lease error: {0}")]
    Lease(String),

    /// The storage layer reported an I/O or transaction failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Encoding or decoding a persisted record failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The caller's context was cancelled or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_parses_hex_and_decimal() {
        assert_eq!(Uid::parse("0x1f"), Some(Uid(31)));
        assert_eq!(Uid::parse("0X1F"), Some(Uid(31)));
        assert_eq!(Uid::parse("31"), Some(Uid(31)));
        assert_eq!(Uid::parse(" 7 "), Some(Uid(7)));
    }

    #[test]
    fn uid_rejects_zero_and_garbage() {
        assert_eq!(Uid::parse("0"), None);
        assert_eq!(Uid::parse("0x0"), None);
        assert_eq!(Uid::parse("_:a"), None);
        assert_eq!(Uid::parse(""), None);
    }

    #[test]
    fn uid_displays_as_hex() {
        assert_eq!(Uid(255).to_string(), "0xff");
    }

    #[test]
    fn value_deserializes_untagged() {
        let values: Vec<Value> = serde_json::from_str(r#"["A", 42, 1.5, true]"#).expect("parse");
        assert_eq!(
            values,
            vec![
                Value::Str("A".into()),
                Value::Int(42),
                Value::Float(1.5),
                Value::Bool(true)
            ]
        );
    }

    #[test]
    fn value_renders_json() {
        assert_eq!(Value::from("x").to_json(), serde_json::json!("x"));
        assert_eq!(Value::from(3i64).to_json(), serde_json::json!(3));
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);
    }
}
