//! # Storage Collaborator
//!
//! The verbs the engine consumes from its storage/query layer, and the edge
//! and proposal types that cross that boundary.
//!
//! The engine never touches postings directly. It builds a `Proposal`, stamps
//! it with a start timestamp, hands it to `apply_mutations`, and makes it
//! visible with an explicit `apply_committed` record. The one concrete
//! implementation is `RedbStore`.

pub mod redb_store;

pub use redb_store::RedbStore;

use crate::mutation::Statement;
use crate::query::QueryResponse;
use crate::schema::PredicateSchema;
use crate::{Context, TesseraError, Uid, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// EDGES & PROPOSALS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeOp {
    Set,
    Del,
}

/// Object of a directed edge.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeObject {
    Uid(Uid),
    Value(Value),
    /// Every current object of the predicate. Deletes only.
    Star,
}

/// A single fully resolved write: `entity --attr--> object`.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectedEdge {
    pub entity: Uid,
    pub attr: String,
    pub op: EdgeOp,
    pub object: EdgeObject,
}

impl DirectedEdge {
    pub fn new(entity: Uid, attr: impl Into<String>, op: EdgeOp, object: EdgeObject) -> Self {
        Self {
            entity,
            attr: attr.into(),
            op,
            object,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOp {
    /// Every namespace: postings, schema and tablets.
    All,
    /// Postings of the proposal's namespace. Its schema stays.
    Data,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProposalPayload {
    Edges(Vec<DirectedEdge>),
    Schema(Vec<PredicateSchema>),
    Drop(DropOp),
}

/// A unit of work submitted at `start_ts`.
///
/// Edge proposals stay pending until a matching commit record arrives.
/// Schema and drop proposals take effect when applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub namespace: u64,
    pub start_ts: u64,
    pub payload: ProposalPayload,
}

/// Commit record of one transaction window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnStatus {
    pub start_ts: u64,
    pub commit_ts: u64,
}

/// A read-only query stamped with a read timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub namespace: u64,
    pub query: String,
    pub vars: BTreeMap<String, String>,
    pub start_ts: u64,
    pub node_limit: usize,
}

// =============================================================================
// COLLABORATOR TRAITS
// =============================================================================

/// Receives every timestamp the authority publishes.
pub trait Watermark: Send + Sync {
    /// `max_assigned` and everything below it may now be used to stamp reads.
    fn process_delta(&self, max_assigned: u64);
}

/// Storage and query verbs consumed by the engine.
///
/// Calls arrive serialized: every mutating verb is invoked under the engine's
/// exclusive lock, queries under its shared lock.
pub trait StorageEngine: Send + Sync {
    /// Stage or apply a proposal.
    fn apply_mutations(&self, ctx: &Context, proposal: Proposal) -> Result<(), TesseraError>;

    /// Make the proposal staged at `status.start_ts` visible at `status.commit_ts`.
    fn apply_committed(&self, ctx: &Context, status: TxnStatus) -> Result<(), TesseraError>;

    /// Discard whatever is still staged at `start_ts`. Called when a commit
    /// fails; a no-op if nothing is staged.
    fn abort_proposal(&self, start_ts: u64);

    /// Run a query against the snapshot at `request.start_ts`.
    fn query_read_only(
        &self,
        ctx: &Context,
        request: QueryRequest,
    ) -> Result<QueryResponse, TesseraError>;

    /// Register a predicate of a namespace. Idempotent.
    fn init_tablet(&self, namespace: u64, predicate: &str) -> Result<(), TesseraError>;

    /// Seed the bootstrap schema of `namespace`, stamped `ts`.
    fn apply_initial_schema(&self, namespace: u64, ts: u64) -> Result<(), TesseraError>;

    /// Every `(namespace, predicate)` with a stored schema.
    fn predicates(&self) -> Result<Vec<(u64, String)>, TesseraError>;

    /// Current schema of a namespace, sorted by predicate.
    fn schema(&self, namespace: u64) -> Result<Vec<PredicateSchema>, TesseraError>;

    /// Resolve parsed statements into typed edges. `uids` maps every blank
    /// label of the batch to its allocated UID.
    fn to_directed_edges(
        &self,
        namespace: u64,
        statements: &[Statement],
        uids: &BTreeMap<String, Uid>,
    ) -> Result<Vec<DirectedEdge>, TesseraError>;

    /// Add the derived edges a write implies: reverse edges and the
    /// replacement of single-valued predicates.
    fn expand_edges(
        &self,
        namespace: u64,
        edges: Vec<DirectedEdge>,
    ) -> Result<Vec<DirectedEdge>, TesseraError>;
}
