//! # Predicate Schema
//!
//! Parses schema documents and converts scalar values to a predicate's type.
//!
//! A document holds one statement per line, terminated by ` .`:
//!
//! ```text
//! # comment
//! name: string @index(exact) .
//! age: int .
//! friend: [uid] @reverse .
//! ```
//!
//! Predicates that are written before any schema exists get an inferred
//! schema from the first value they receive.

use crate::primitives::{INITIAL_SCHEMA, MAX_PREDICATE_LENGTH, REVERSE_PREFIX};
use crate::{TesseraError, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Storage type of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Untyped: values are stored as given.
    Default,
    String,
    Int,
    Float,
    Bool,
    /// Edges to other nodes.
    Uid,
}

impl ValueType {
    fn parse(name: &str) -> Result<Self, TesseraError> {
        match name {
            "default" => Ok(Self::Default),
            "string" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "bool" => Ok(Self::Bool),
            "uid" => Ok(Self::Uid),
            other => Err(TesseraError::InvalidSchema(format!("unknown type '{other}'"))),
        }
    }

    /// Type inferred from the first value written to an unknown predicate.
    #[must_use]
    pub const fn infer(value: &Value) -> Self {
        match value {
            Value::Str(_) => Self::String,
            Value::Int(_) => Self::Int,
            Value::Float(_) => Self::Float,
            Value::Bool(_) => Self::Bool,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Uid => "uid",
        }
    }

    /// Convert `value` to this type.
    ///
    /// Strings are parsed into numbers and booleans; ints widen to floats.
    /// Anything else that does not fit is an `InvalidSchema` error.
    pub fn convert(self, value: &Value) -> Result<Value, TesseraError> {
        let mismatch = || {
            TesseraError::InvalidSchema(format!(
                "cannot store {} value '{}' as {}",
                value.kind(),
                value,
                self.name()
            ))
        };
        match (self, value) {
            // NaN never compares equal, so it could never be deleted again.
            (_, Value::Float(x)) if !x.is_finite() => Err(mismatch()),
            (Self::Default, v) => Ok(v.clone()),
            (Self::String, Value::Str(s)) => Ok(Value::Str(s.clone())),
            (Self::String, v) => Ok(Value::Str(v.to_string())),
            (Self::Int, Value::Int(i)) => Ok(Value::Int(*i)),
            (Self::Int, Value::Str(s)) => s.trim().parse().map(Value::Int).map_err(|_| mismatch()),
            (Self::Float, Value::Float(x)) => Ok(Value::Float(*x)),
            (Self::Float, Value::Int(i)) => Ok(Value::Float(*i as f64)),
            (Self::Float, Value::Str(s)) => match s.trim().parse::<f64>() {
                Ok(x) if x.is_finite() => Ok(Value::Float(x)),
                _ => Err(mismatch()),
            },
            (Self::Bool, Value::Bool(b)) => Ok(Value::Bool(*b)),
            (Self::Bool, Value::Str(s)) => match s.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        }
    }
}

/// Schema of a single predicate in one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateSchema {
    pub predicate: String,
    pub value_type: ValueType,
    /// Whether the predicate holds a set of values instead of one.
    pub list: bool,
    /// Index tokenizers, in declaration order.
    pub index: Vec<String>,
    /// Maintain `~predicate` edges from objects back to subjects.
    pub reverse: bool,
    pub upsert: bool,
}

impl PredicateSchema {
    /// A plain schema of the given type with no directives.
    #[must_use]
    pub fn new(predicate: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            predicate: predicate.into(),
            value_type,
            list: false,
            index: Vec::new(),
            reverse: false,
            upsert: false,
        }
    }

    /// Schema inferred for an unknown predicate. Node edges are lists so
    /// repeated writes accumulate, as they would for `[uid]`.
    #[must_use]
    pub fn inferred(predicate: &str, object: Option<&Value>) -> Self {
        match object {
            Some(value) => Self::new(predicate, ValueType::infer(value)),
            None => {
                let mut schema = Self::new(predicate, ValueType::Uid);
                schema.list = true;
                schema
            }
        }
    }

    /// The bootstrap schema applied to every new namespace.
    pub fn initial() -> Result<Vec<Self>, TesseraError> {
        parse_schema(INITIAL_SCHEMA)
    }
}

impl fmt::Display for PredicateSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.predicate)?;
        if self.list {
            write!(f, "[{}]", self.value_type.name())?;
        } else {
            f.write_str(self.value_type.name())?;
        }
        if !self.index.is_empty() {
            write!(f, " @index({})", self.index.join(", "))?;
        }
        if self.reverse {
            f.write_str(" @reverse")?;
        }
        if self.upsert {
            f.write_str(" @upsert")?;
        }
        f.write_str(" .")
    }
}

/// Check a predicate name as written by a caller.
///
/// Names may contain `.` (`dgraph.type`) but never start with the reverse
/// prefix, which is reserved for derived edges.
pub fn validate_predicate(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty predicate".to_string());
    }
    if name.len() > MAX_PREDICATE_LENGTH {
        return Err(format!(
            "predicate exceeds {MAX_PREDICATE_LENGTH} bytes"
        ));
    }
    if name.starts_with(REVERSE_PREFIX) {
        return Err(format!("predicate '{name}' uses the reserved '~' prefix"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(format!("predicate '{name}' contains invalid character '{bad}'"));
    }
    Ok(())
}

// =============================================================================
// DOCUMENT PARSER
// =============================================================================

/// Parse a schema document into one entry per predicate.
pub fn parse_schema(text: &str) -> Result<Vec<PredicateSchema>, TesseraError> {
    let mut out = Vec::new();
    let mut seen = BTreeSet::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let schema = parse_statement(line)
            .map_err(|msg| TesseraError::InvalidSchema(format!("line {}: {msg}", index + 1)))?;
        if !seen.insert(schema.predicate.clone()) {
            return Err(TesseraError::InvalidSchema(format!(
                "line {}: predicate '{}' declared twice",
                index + 1,
                schema.predicate
            )));
        }
        out.push(schema);
    }

    Ok(out)
}

fn parse_statement(line: &str) -> Result<PredicateSchema, String> {
    let body = line
        .strip_suffix('.')
        .ok_or_else(|| "statement must end with '.'".to_string())?
        .trim_end();
    let (name, rest) = body
        .split_once(':')
        .ok_or_else(|| "expected 'predicate: type'".to_string())?;
    let name = name.trim();
    validate_predicate(name)?;

    let rest = rest.trim();
    let (type_part, mut directives) = match rest.find('@') {
        Some(at) => (rest[..at].trim(), &rest[at..]),
        None => (rest, ""),
    };

    let (list, type_name) = match type_part
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
    {
        Some(inner) => (true, inner.trim()),
        None => (false, type_part),
    };
    let value_type = ValueType::parse(type_name).map_err(|e| e.to_string())?;

    let mut schema = PredicateSchema::new(name, value_type);
    schema.list = list;

    while !directives.is_empty() {
        let after_at = directives
            .strip_prefix('@')
            .ok_or_else(|| format!("unexpected '{directives}'"))?;
        let end = after_at
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(after_at.len());
        let directive = &after_at[..end];
        let mut tail = after_at[end..].trim_start();

        match directive {
            "index" => {
                let args = tail
                    .strip_prefix('(')
                    .ok_or_else(|| "@index requires tokenizers".to_string())?;
                let close = args
                    .find(')')
                    .ok_or_else(|| "unterminated @index(".to_string())?;
                schema.index = args[..close]
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
                if schema.index.is_empty() {
                    return Err("@index requires tokenizers".to_string());
                }
                tail = args[close + 1..].trim_start();
            }
            "reverse" => schema.reverse = true,
            "upsert" => schema.upsert = true,
            other => return Err(format!("unknown directive '@{other}'")),
        }
        directives = tail;
    }

    if schema.reverse && schema.value_type != ValueType::Uid {
        return Err("@reverse is only valid on uid predicates".to_string());
    }
    if !schema.index.is_empty() && schema.value_type == ValueType::Uid {
        return Err("uid predicates cannot be indexed".to_string());
    }
    Ok(schema)
}

// =============================================================================
// TESTS
// =============================================================================
