//! # redb-backed Storage
//!
//! The concrete storage/query collaborator: MVCC postings in a redb file.
//!
//! ## Layout
//!
//! - `postings`: `(namespace, predicate, subject)` -> postcard `Vec<Version>`,
//!   an append-only log of set/delete operations stamped with commit
//!   timestamps. A read at `ts` replays the versions with `commit_ts <= ts`.
//! - `schema`: `(namespace, predicate)` -> postcard `SchemaRecord`.
//!
//! Reverse edges are stored as ordinary postings under `~predicate`.
//!
//! ## Transactions
//!
//! Edge proposals are staged in memory at their start timestamp and written
//! in a single redb transaction when the commit record arrives. Nothing is
//! visible to readers before that. Staged proposals do not survive a restart,
//! which is consistent with the engine committing every batch before it
//! returns.

use super::{
    DirectedEdge, DropOp, EdgeObject, EdgeOp, Proposal, ProposalPayload, QueryRequest,
    StorageEngine, TxnStatus, Watermark,
};
use crate::mutation::{NodeRef, ObjectRef, Statement, StatementOp};
use crate::primitives::REVERSE_PREFIX;
use crate::query::{self, GraphReader, QueryResponse};
use crate::schema::{PredicateSchema, ValueType};
use crate::{Context, TesseraError, Uid, Value};
use parking_lot::Mutex;
use redb::{Database, ReadOnlyTable, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Table for postings: (namespace, predicate, subject) -> serialized versions
const POSTINGS: TableDefinition<(u64, &str, u64), &[u8]> = TableDefinition::new("postings");

/// Table for schema: (namespace, predicate) -> serialized SchemaRecord
const SCHEMA: TableDefinition<(u64, &str), &[u8]> = TableDefinition::new("schema");

type PostingsTable = ReadOnlyTable<(u64, &'static str, u64), &'static [u8]>;
type SchemaTable = ReadOnlyTable<(u64, &'static str), &'static [u8]>;

fn storage_err(e: impl std::fmt::Display) -> TesseraError {
    TesseraError::Storage(e.to_string())
}

// =============================================================================
// PERSISTED RECORDS
// =============================================================================

/// Persisted form of an edge object. `Value` deserializes untagged, which
/// postcard cannot decode, so the stored enum is tagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum StoredObject {
    Uid(u64),
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Star,
}

impl From<&EdgeObject> for StoredObject {
    fn from(object: &EdgeObject) -> Self {
        match object {
            EdgeObject::Uid(uid) => Self::Uid(uid.value()),
            EdgeObject::Value(Value::Bool(b)) => Self::Bool(*b),
            EdgeObject::Value(Value::Int(i)) => Self::Int(*i),
            EdgeObject::Value(Value::Float(x)) => Self::Float(*x),
            EdgeObject::Value(Value::Str(s)) => Self::Str(s.clone()),
            EdgeObject::Star => Self::Star,
        }
    }
}

impl From<StoredObject> for EdgeObject {
    fn from(object: StoredObject) -> Self {
        match object {
            StoredObject::Uid(uid) => Self::Uid(Uid(uid)),
            StoredObject::Bool(b) => Self::Value(Value::Bool(b)),
            StoredObject::Int(i) => Self::Value(Value::Int(i)),
            StoredObject::Float(x) => Self::Value(Value::Float(x)),
            StoredObject::Str(s) => Self::Value(Value::Str(s)),
            StoredObject::Star => Self::Star,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Version {
    commit_ts: u64,
    op: EdgeOp,
    object: StoredObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaRecord {
    applied_ts: u64,
    schema: PredicateSchema,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, TesseraError> {
    postcard::to_allocvec(value).map_err(|e| TesseraError::Serialization(e.to_string()))
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, TesseraError> {
    postcard::from_bytes(bytes).map_err(|e| TesseraError::Serialization(e.to_string()))
}

/// Replay a version log up to `ts`.
fn materialize(versions: &[Version], ts: u64) -> Vec<StoredObject> {
    let mut live: Vec<StoredObject> = Vec::new();
    for version in versions.iter().filter(|v| v.commit_ts <= ts) {
        match (version.op, &version.object) {
            (EdgeOp::Del, StoredObject::Star) => live.clear(),
            (EdgeOp::Del, object) => live.retain(|o| o != object),
            (EdgeOp::Set, object) => {
                if !live.contains(object) {
                    live.push(object.clone());
                }
            }
        }
    }
    live
}

fn reverse_attr(attr: &str) -> String {
    format!("{REVERSE_PREFIX}{attr}")
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug)]
struct PendingTxn {
    namespace: u64,
    edges: Vec<DirectedEdge>,
}

/// Disk-backed storage collaborator.
pub struct RedbStore {
    db: Arc<Database>,
    pending: Mutex<BTreeMap<u64, PendingTxn>>,
    tablets: Mutex<BTreeSet<(u64, String)>>,
    /// Highest timestamp published by the authority.
    max_assigned: AtomicU64,
    /// Highest commit timestamp applied.
    max_committed: AtomicU64,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("pending", &self.pending.lock().len())
            .field("tablets", &self.tablets.lock().len())
            .field("max_assigned", &self.max_assigned.load(Ordering::Acquire))
            .field("max_committed", &self.max_committed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TesseraError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(storage_err)?;
            let _ = write_txn.open_table(POSTINGS).map_err(storage_err)?;
            let _ = write_txn.open_table(SCHEMA).map_err(storage_err)?;
            write_txn.commit().map_err(storage_err)?;
        }

        Ok(Self {
            db: Arc::new(db),
            pending: Mutex::new(BTreeMap::new()),
            tablets: Mutex::new(BTreeSet::new()),
            max_assigned: AtomicU64::new(0),
            max_committed: AtomicU64::new(0),
        })
    }

    /// Shared handle to the underlying database, for the lease store.
    #[must_use]
    pub fn database(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    /// Registered tablets, sorted.
    #[must_use]
    pub fn tablets(&self) -> Vec<(u64, String)> {
        self.tablets.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn max_assigned(&self) -> u64 {
        self.max_assigned.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn max_committed(&self) -> u64 {
        self.max_committed.load(Ordering::Acquire)
    }

    /// Number of staged proposals waiting for a commit record.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Timestamp at which the current schema of `predicate` was applied.
    pub fn schema_applied_at(
        &self,
        namespace: u64,
        predicate: &str,
    ) -> Result<Option<u64>, TesseraError> {
        let (_, table) = self.open_read()?;
        match table.get((namespace, predicate)).map_err(storage_err)? {
            Some(data) => decode::<SchemaRecord>(data.value()).map(|r| Some(r.applied_ts)),
            None => Ok(None),
        }
    }

    fn open_read(&self) -> Result<(PostingsTable, SchemaTable), TesseraError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let postings = read_txn.open_table(POSTINGS).map_err(storage_err)?;
        let schema = read_txn.open_table(SCHEMA).map_err(storage_err)?;
        Ok((postings, schema))
    }

    fn write_schema(
        &self,
        namespace: u64,
        ts: u64,
        entries: &[PredicateSchema],
    ) -> Result<(), TesseraError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(SCHEMA).map_err(storage_err)?;
            for schema in entries {
                let bytes = encode(&SchemaRecord {
                    applied_ts: ts,
                    schema: schema.clone(),
                })?;
                table
                    .insert((namespace, schema.predicate.as_str()), bytes.as_slice())
                    .map_err(storage_err)?;
            }
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn drop_all(&self) -> Result<(), TesseraError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        write_txn.delete_table(POSTINGS).map_err(storage_err)?;
        write_txn.delete_table(SCHEMA).map_err(storage_err)?;
        let _ = write_txn.open_table(POSTINGS).map_err(storage_err)?;
        let _ = write_txn.open_table(SCHEMA).map_err(storage_err)?;
        write_txn.commit().map_err(storage_err)?;

        self.pending.lock().clear();
        self.tablets.lock().clear();
        Ok(())
    }

    fn drop_data(&self, namespace: u64) -> Result<(), TesseraError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(POSTINGS).map_err(storage_err)?;
            let mut keys = Vec::new();
            for entry in table
                .range((namespace, "", 0u64)..)
                .map_err(storage_err)?
            {
                let (key, _) = entry.map_err(storage_err)?;
                let (ns, predicate, subject) = key.value();
                if ns != namespace {
                    break;
                }
                keys.push((predicate.to_string(), subject));
            }
            for (predicate, subject) in &keys {
                table
                    .remove((namespace, predicate.as_str(), *subject))
                    .map_err(storage_err)?;
            }
        }
        write_txn.commit().map_err(storage_err)?;

        self.pending.lock().retain(|_, txn| txn.namespace != namespace);
        Ok(())
    }
}

impl Watermark for RedbStore {
    fn process_delta(&self, max_assigned: u64) {
        self.max_assigned.fetch_max(max_assigned, Ordering::AcqRel);
    }
}

// =============================================================================
// SNAPSHOT READER
// =============================================================================

/// Read view of one namespace at one timestamp.
struct SnapshotReader {
    namespace: u64,
    ts: u64,
    postings: PostingsTable,
    schema: SchemaTable,
}

impl SnapshotReader {
    fn versions(&self, predicate: &str, subject: u64) -> Result<Vec<Version>, TesseraError> {
        match self
            .postings
            .get((self.namespace, predicate, subject))
            .map_err(storage_err)?
        {
            Some(data) => decode(data.value()),
            None => Ok(Vec::new()),
        }
    }
}

fn lookup_schema(
    table: &SchemaTable,
    namespace: u64,
    predicate: &str,
) -> Result<Option<PredicateSchema>, TesseraError> {
    match table.get((namespace, predicate)).map_err(storage_err)? {
        Some(data) => decode::<SchemaRecord>(data.value()).map(|r| Some(r.schema)),
        None => Ok(None),
    }
}

impl GraphReader for SnapshotReader {
    fn schema(&self, predicate: &str) -> Result<Option<PredicateSchema>, TesseraError> {
        lookup_schema(&self.schema, self.namespace, predicate)
    }

    fn objects(&self, subject: Uid, predicate: &str) -> Result<Vec<EdgeObject>, TesseraError> {
        let versions = self.versions(predicate, subject.value())?;
        Ok(materialize(&versions, self.ts)
            .into_iter()
            .map(EdgeObject::from)
            .collect())
    }

    fn subjects_with(&self, predicate: &str) -> Result<Vec<Uid>, TesseraError> {
        let mut subjects = Vec::new();
        let range = (self.namespace, predicate, 0u64)..=(self.namespace, predicate, u64::MAX);
        for entry in self.postings.range(range).map_err(storage_err)? {
            let (key, value) = entry.map_err(storage_err)?;
            let versions: Vec<Version> = decode(value.value())?;
            if !materialize(&versions, self.ts).is_empty() {
                subjects.push(Uid(key.value().2));
            }
        }
        Ok(subjects)
    }
}

// =============================================================================
// COLLABORATOR IMPLEMENTATION
// =============================================================================

impl StorageEngine for RedbStore {
    fn apply_mutations(&self, ctx: &Context, proposal: Proposal) -> Result<(), TesseraError> {
        ctx.check()?;
        if proposal.start_ts > self.max_assigned() {
            return Err(TesseraError::Storage(format!(
                "start_ts {} was never assigned",
                proposal.start_ts
            )));
        }

        match proposal.payload {
            ProposalPayload::Edges(edges) => {
                let mut pending = self.pending.lock();
                if pending.contains_key(&proposal.start_ts) {
                    return Err(TesseraError::Storage(format!(
                        "a proposal is already staged at start_ts {}",
                        proposal.start_ts
                    )));
                }
                pending.insert(
                    proposal.start_ts,
                    PendingTxn {
                        namespace: proposal.namespace,
                        edges,
                    },
                );
                Ok(())
            }
            ProposalPayload::Schema(entries) => {
                self.write_schema(proposal.namespace, proposal.start_ts, &entries)
            }
            ProposalPayload::Drop(DropOp::All) => self.drop_all(),
            ProposalPayload::Drop(DropOp::Data) => self.drop_data(proposal.namespace),
        }
    }

    fn apply_committed(&self, ctx: &Context, status: TxnStatus) -> Result<(), TesseraError> {
        if status.commit_ts <= status.start_ts {
            return Err(TesseraError::Storage(format!(
                "commit_ts {} does not follow start_ts {}",
                status.commit_ts, status.start_ts
            )));
        }
        // Taken out first: a commit that fails from here on leaves nothing staged.
        let txn = self
            .pending
            .lock()
            .remove(&status.start_ts)
            .ok_or_else(|| {
                TesseraError::Storage(format!(
                    "no proposal staged at start_ts {}",
                    status.start_ts
                ))
            })?;
        ctx.check()?;
        let namespace = txn.namespace;

        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut postings = write_txn.open_table(POSTINGS).map_err(storage_err)?;
            let mut schema = write_txn.open_table(SCHEMA).map_err(storage_err)?;

            for edge in &txn.edges {
                let derived = edge.attr.starts_with(REVERSE_PREFIX);
                if !derived && edge.op == EdgeOp::Set {
                    let known = schema
                        .get((namespace, edge.attr.as_str()))
                        .map_err(storage_err)?
                        .is_some();
                    if !known {
                        let object = match &edge.object {
                            EdgeObject::Value(v) => Some(v),
                            _ => None,
                        };
                        let bytes = encode(&SchemaRecord {
                            applied_ts: status.commit_ts,
                            schema: PredicateSchema::inferred(&edge.attr, object),
                        })?;
                        schema
                            .insert((namespace, edge.attr.as_str()), bytes.as_slice())
                            .map_err(storage_err)?;
                    }
                }

                let key = (namespace, edge.attr.as_str(), edge.entity.value());
                let mut versions: Vec<Version> =
                    match postings.get(key).map_err(storage_err)? {
                        Some(data) => decode(data.value())?,
                        None => Vec::new(),
                    };
                versions.push(Version {
                    commit_ts: status.commit_ts,
                    op: edge.op,
                    object: StoredObject::from(&edge.object),
                });
                let bytes = encode(&versions)?;
                postings
                    .insert(key, bytes.as_slice())
                    .map_err(storage_err)?;
            }
        }
        write_txn.commit().map_err(storage_err)?;

        self.max_committed
            .fetch_max(status.commit_ts, Ordering::AcqRel);
        Ok(())
    }

    fn abort_proposal(&self, start_ts: u64) {
        if self.pending.lock().remove(&start_ts).is_some() {
            tracing::debug!(start_ts, "staged proposal discarded");
        }
    }

    fn query_read_only(
        &self,
        ctx: &Context,
        request: QueryRequest,
    ) -> Result<QueryResponse, TesseraError> {
        ctx.check()?;
        if request.start_ts > self.max_assigned() {
            return Err(TesseraError::Storage(format!(
                "read timestamp {} is ahead of the watermark",
                request.start_ts
            )));
        }

        let parsed = query::parse(&request.query, &request.vars)?;
        let (postings, schema) = self.open_read()?;
        let reader = SnapshotReader {
            namespace: request.namespace,
            ts: request.start_ts,
            postings,
            schema,
        };
        let json = query::execute(&parsed, &reader, request.node_limit, ctx)?;
        Ok(QueryResponse {
            json,
            start_ts: request.start_ts,
        })
    }

    fn init_tablet(&self, namespace: u64, predicate: &str) -> Result<(), TesseraError> {
        self.tablets
            .lock()
            .insert((namespace, predicate.to_string()));
        Ok(())
    }

    fn apply_initial_schema(&self, namespace: u64, ts: u64) -> Result<(), TesseraError> {
        self.write_schema(namespace, ts, &PredicateSchema::initial()?)
    }

    fn predicates(&self) -> Result<Vec<(u64, String)>, TesseraError> {
        let (_, schema) = self.open_read()?;
        let mut out = Vec::new();
        for entry in schema.iter().map_err(storage_err)? {
            let (key, _) = entry.map_err(storage_err)?;
            let (namespace, predicate) = key.value();
            out.push((namespace, predicate.to_string()));
        }
        Ok(out)
    }

    fn schema(&self, namespace: u64) -> Result<Vec<PredicateSchema>, TesseraError> {
        let (_, schema) = self.open_read()?;
        let mut out = Vec::new();
        for entry in schema.range((namespace, "")..).map_err(storage_err)? {
            let (key, value) = entry.map_err(storage_err)?;
            if key.value().0 != namespace {
                break;
            }
            out.push(decode::<SchemaRecord>(value.value())?.schema);
        }
        Ok(out)
    }

    fn to_directed_edges(
        &self,
        namespace: u64,
        statements: &[Statement],
        uids: &BTreeMap<String, Uid>,
    ) -> Result<Vec<DirectedEdge>, TesseraError> {
        let (_, table) = self.open_read()?;
        // Schemas inferred earlier in this batch bind the statements after them.
        let mut inferred: BTreeMap<String, PredicateSchema> = BTreeMap::new();

        let resolve = |node: &NodeRef| match node {
            NodeRef::Uid(uid) => Ok(*uid),
            NodeRef::Blank(label) => uids.get(label).copied().ok_or_else(|| {
                TesseraError::InvalidMutation(format!("unresolved blank node _:{label}"))
            }),
        };

        let mut edges = Vec::with_capacity(statements.len());
        for statement in statements {
            let entity = resolve(&statement.subject)?;
            let stored = match inferred.get(&statement.predicate) {
                Some(schema) => Some(schema.clone()),
                None => lookup_schema(&table, namespace, &statement.predicate)?,
            };

            let object = match &statement.object {
                ObjectRef::Star => EdgeObject::Star,
                ObjectRef::Node(node) => {
                    let schema = stored.unwrap_or_else(|| {
                        PredicateSchema::inferred(&statement.predicate, None)
                    });
                    if schema.value_type != ValueType::Uid {
                        return Err(TesseraError::InvalidSchema(format!(
                            "predicate '{}' is {}, not uid",
                            statement.predicate,
                            schema.value_type.name()
                        )));
                    }
                    inferred
                        .entry(statement.predicate.clone())
                        .or_insert(schema);
                    EdgeObject::Uid(resolve(node)?)
                }
                ObjectRef::Value(value) => {
                    let schema = stored.unwrap_or_else(|| {
                        PredicateSchema::inferred(&statement.predicate, Some(value))
                    });
                    if schema.value_type == ValueType::Uid {
                        return Err(TesseraError::InvalidSchema(format!(
                            "predicate '{}' is uid, got {} value",
                            statement.predicate,
                            value.kind()
                        )));
                    }
                    let converted = schema.value_type.convert(value)?;
                    inferred
                        .entry(statement.predicate.clone())
                        .or_insert(schema);
                    EdgeObject::Value(converted)
                }
            };

            edges.push(DirectedEdge::new(
                entity,
                statement.predicate.clone(),
                match statement.op {
                    StatementOp::Set => EdgeOp::Set,
                    StatementOp::Del => EdgeOp::Del,
                },
                object,
            ));
        }
        Ok(edges)
    }

    fn expand_edges(
        &self,
        namespace: u64,
        edges: Vec<DirectedEdge>,
    ) -> Result<Vec<DirectedEdge>, TesseraError> {
        let (postings, table) = self.open_read()?;
        let latest = SnapshotReader {
            namespace,
            ts: u64::MAX,
            postings,
            schema: table,
        };

        let mut schemas: BTreeMap<String, Option<PredicateSchema>> = BTreeMap::new();
        // Current uid objects of reverse predicates, updated as the batch is expanded.
        let mut current: BTreeMap<(Uid, String), Vec<Uid>> = BTreeMap::new();
        let mut out = Vec::with_capacity(edges.len());

        for edge in edges {
            if !schemas.contains_key(&edge.attr) {
                schemas.insert(edge.attr.clone(), latest.schema(&edge.attr)?);
            }
            let (list, reverse) = match schemas.get(&edge.attr).and_then(Option::as_ref) {
                Some(schema) => (schema.list, schema.reverse),
                None => (matches!(edge.object, EdgeObject::Uid(_)), false),
            };

            let key = (edge.entity, edge.attr.clone());
            if reverse && !current.contains_key(&key) {
                let objects = latest
                    .objects(edge.entity, &edge.attr)?
                    .into_iter()
                    .filter_map(|o| match o {
                        EdgeObject::Uid(uid) => Some(uid),
                        _ => None,
                    })
                    .collect();
                current.insert(key.clone(), objects);
            }
            let rev = reverse_attr(&edge.attr);
            let back = EdgeObject::Uid(edge.entity);
            let target = match &edge.object {
                EdgeObject::Uid(uid) => Some(*uid),
                _ => None,
            };
            let star = edge.object == EdgeObject::Star;

            match edge.op {
                EdgeOp::Set => {
                    if !list {
                        out.push(DirectedEdge::new(
                            edge.entity,
                            edge.attr.clone(),
                            EdgeOp::Del,
                            EdgeObject::Star,
                        ));
                        if let Some(old) = current.get_mut(&key) {
                            for uid in old.drain(..) {
                                out.push(DirectedEdge::new(uid, &rev, EdgeOp::Del, back.clone()));
                            }
                        }
                    }
                    out.push(edge);
                    if let (true, Some(target)) = (reverse, target) {
                        out.push(DirectedEdge::new(target, &rev, EdgeOp::Set, back));
                        if let Some(objects) = current.get_mut(&key) {
                            if !objects.contains(&target) {
                                objects.push(target);
                            }
                        }
                    }
                }
                EdgeOp::Del => {
                    out.push(edge);
                    if star {
                        if let Some(old) = current.get_mut(&key) {
                            for uid in old.drain(..) {
                                out.push(DirectedEdge::new(uid, &rev, EdgeOp::Del, back.clone()));
                            }
                        }
                    } else if let (true, Some(target)) = (reverse, target) {
                        out.push(DirectedEdge::new(target, &rev, EdgeOp::Del, back));
                        if let Some(objects) = current.get_mut(&key) {
                            objects.retain(|uid| *uid != target);
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

// =============================================================================
// TESTS
// =============================================================================
