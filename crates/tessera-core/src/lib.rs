//! # tessera-core
//!
//! The embedded graph engine for Tessera - THE ENGINE.
//!
//! One process, one data directory, one writer. The crate provides:
//! - an in-process identity and timestamp authority that leases UID,
//!   timestamp and namespace windows ahead of use and never reissues a value,
//!   even across a crash
//! - namespace-scoped, atomic mutation batches with blank-node resolution
//! - snapshot queries stamped with the last allocated timestamp
//! - bulk loading of schema and data files
//! - a redb-backed storage collaborator with MVCC postings
//!
//! ## Usage
//!
//! ```no_run
//! use tessera_core::{Config, Context, Engine, Mutation, NQuad};
//!
//! # fn main() -> Result<(), tessera_core::TesseraError> {
//! let engine = Engine::open(Config::new("/tmp/tessera"))?;
//! let ns = engine.default_namespace()?;
//! let ctx = Context::background();
//!
//! let uids = ns.mutate(&ctx, &[Mutation::new().set(NQuad::value("_:a", "name", "Alice"))])?;
//! let response = ns.query(&ctx, "{ q(func: has(name)) { uid name } }")?;
//! println!("{} -> {}", uids["a"], response.json);
//! engine.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architectural Constraints
//!
//! - NO async, NO network dependencies (pure Rust)
//! - Everything iterated is a `BTreeMap`/`BTreeSet`, so output is deterministic
//! - Lease windows are durable before any value from them is handed out

// =============================================================================
// MODULES
// =============================================================================

pub mod authority;
mod commit;
pub mod config;
pub mod context;
pub mod engine;
pub mod lease;
pub mod loader;
pub mod mutation;
pub mod namespace;
pub mod primitives;
pub mod query;
pub mod schema;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{TesseraError, Uid, Value};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use authority::{AssignedIds, Authority, Bootstrap, LeaseBlocks, LeaseSnapshot};
pub use config::Config;
pub use context::Context;
pub use engine::Engine;
pub use lease::{LeaseRecord, LeaseStore, MemoryLeaseStore, RedbLeaseStore};
pub use loader::{LoadedFile, parse_mutation_file, read_input};
pub use namespace::Namespace;

// =============================================================================
// RE-EXPORTS: Mutations, Queries & Schema
// =============================================================================

pub use mutation::{Mutation, NQuad, Object};
pub use query::QueryResponse;
pub use schema::{PredicateSchema, ValueType, parse_schema};

// =============================================================================
// RE-EXPORTS: Storage
// =============================================================================

pub use storage::{
    DirectedEdge, DropOp, EdgeObject, EdgeOp, Proposal, ProposalPayload, QueryRequest,
    RedbStore, StorageEngine, TxnStatus, Watermark,
};
