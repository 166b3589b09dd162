//! # Mutation Batches
//!
//! Caller-facing mutation types and their parse into `Statement`s.
//!
//! A `Mutation` carries structured `NQuad`s and/or N-Quad text. Parsing a
//! batch is all-or-nothing and happens before any UID or timestamp is
//! allocated, so a malformed batch never consumes ID space.
//!
//! Node references in subjects and objects are either blank (`_:alice`),
//! resolved to fresh UIDs by the commit pipeline, or explicit UIDs (`0x2a`),
//! which must already have been handed out by the authority.

pub mod rdf;

use crate::primitives::{BLANK_PREFIX, MAX_BATCH_STATEMENTS};
use crate::schema::validate_predicate;
use crate::{TesseraError, Uid, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// CALLER-FACING TYPES
// =============================================================================

/// Object position of an `NQuad`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Object {
    /// A node: `_:blank` or an explicit UID.
    Id(String),
    /// A scalar literal.
    Value(Value),
    /// Every value of the predicate. Deletes only.
    Star,
}

/// One subject-predicate-object statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NQuad {
    pub subject: String,
    pub predicate: String,
    pub object: Object,
}

impl NQuad {
    /// Attach a scalar value to `subject`.
    pub fn value(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: Object::Value(value.into()),
        }
    }

    /// Link `subject` to another node.
    pub fn edge(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: Object::Id(object.into()),
        }
    }

    /// Match every value of `predicate` on `subject`.
    pub fn star(subject: impl Into<String>, predicate: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: Object::Star,
        }
    }
}

/// One mutation: statements to set and statements to delete.
///
/// Deserializes from JSON with every field optional:
/// `{"set": [...], "delete": [...], "set_nquads": "...", "del_nquads": "..."}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mutation {
    pub set: Vec<NQuad>,
    pub delete: Vec<NQuad>,
    pub set_nquads: String,
    pub del_nquads: String,
}

impl Mutation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, quad: NQuad) -> Self {
        self.set.push(quad);
        self
    }

    #[must_use]
    pub fn delete(mut self, quad: NQuad) -> Self {
        self.delete.push(quad);
        self
    }

    #[must_use]
    pub fn with_set_nquads(mut self, text: impl Into<String>) -> Self {
        self.set_nquads = text.into();
        self
    }

    #[must_use]
    pub fn with_del_nquads(mut self, text: impl Into<String>) -> Self {
        self.del_nquads = text.into();
        self
    }

    /// Whether the mutation carries no statements at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.delete.is_empty()
            && self.set_nquads.trim().is_empty()
            && self.del_nquads.trim().is_empty()
    }
}

// =============================================================================
// PARSED STATEMENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatementOp {
    Set,
    Del,
}

/// A resolved or still-symbolic node reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeRef {
    /// Blank node label, without the `_:` prefix.
    Blank(String),
    Uid(Uid),
}

impl NodeRef {
    fn parse(text: &str, uid_bound: u64) -> Result<Self, String> {
        let text = text.trim();
        if let Some(label) = text.strip_prefix(BLANK_PREFIX) {
            if label.is_empty() || label.chars().any(char::is_whitespace) {
                return Err(format!("invalid blank node '{text}'"));
            }
            return Ok(Self::Blank(label.to_string()));
        }
        let uid = Uid::parse(text).ok_or_else(|| format!("invalid node reference '{text}'"))?;
        if uid.value() >= uid_bound {
            return Err(format!("uid {uid} has not been allocated"));
        }
        Ok(Self::Uid(uid))
    }

    const fn is_blank(&self) -> bool {
        matches!(self, Self::Blank(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRef {
    Node(NodeRef),
    Value(Value),
    Star,
}

/// A validated statement of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub op: StatementOp,
    pub subject: NodeRef,
    pub predicate: String,
    pub object: ObjectRef,
}

impl Statement {
    fn from_quad(op: StatementOp, quad: &NQuad, uid_bound: u64) -> Result<Self, String> {
        validate_predicate(&quad.predicate)?;
        let subject = NodeRef::parse(&quad.subject, uid_bound)?;
        let object = match &quad.object {
            Object::Id(id) => ObjectRef::Node(NodeRef::parse(id, uid_bound)?),
            Object::Value(v) => ObjectRef::Value(v.clone()),
            Object::Star => ObjectRef::Star,
        };

        match op {
            StatementOp::Set => {
                if object == ObjectRef::Star {
                    return Err("'*' is only valid in deletes".to_string());
                }
            }
            StatementOp::Del => {
                let blank_object = matches!(&object, ObjectRef::Node(n) if n.is_blank());
                if subject.is_blank() || blank_object {
                    return Err("blank nodes cannot be deleted".to_string());
                }
            }
        }

        Ok(Self {
            op,
            subject,
            predicate: quad.predicate.clone(),
            object,
        })
    }
}

/// Parse and validate every statement of a batch.
///
/// `uid_bound` is the exclusive upper bound of UIDs handed out so far; any
/// explicit UID at or above it is rejected.
pub fn parse_mutations(
    mutations: &[Mutation],
    uid_bound: u64,
) -> Result<Vec<Statement>, TesseraError> {
    let mut statements = Vec::new();

    for (m, mutation) in mutations.iter().enumerate() {
        let text_sets = rdf::parse_nquads(&mutation.set_nquads)?;
        let text_dels = rdf::parse_nquads(&mutation.del_nquads)?;

        let sets = mutation.set.iter().chain(&text_sets);
        let dels = mutation.delete.iter().chain(&text_dels);
        for (op, quad) in sets
            .map(|q| (StatementOp::Set, q))
            .chain(dels.map(|q| (StatementOp::Del, q)))
        {
            let statement = Statement::from_quad(op, quad, uid_bound).map_err(|msg| {
                TesseraError::InvalidMutation(format!(
                    "mutation {m}: <{}> <{}>: {msg}",
                    quad.subject, quad.predicate
                ))
            })?;
            statements.push(statement);
            if statements.len() > MAX_BATCH_STATEMENTS {
                return Err(TesseraError::InvalidMutation(format!(
                    "batch exceeds {MAX_BATCH_STATEMENTS} statements"
                )));
            }
        }
    }

    Ok(statements)
}

/// Distinct blank labels of a batch, in the order UIDs are assigned to them.
#[must_use]
pub fn blank_labels(statements: &[Statement]) -> BTreeSet<String> {
    let mut labels = BTreeSet::new();
    for statement in statements {
        if let NodeRef::Blank(label) = &statement.subject {
            labels.insert(label.clone());
        }
        if let ObjectRef::Node(NodeRef::Blank(label)) = &statement.object {
            labels.insert(label.clone());
        }
    }
    labels
}

// =============================================================================
// TESTS
// =============================================================================
