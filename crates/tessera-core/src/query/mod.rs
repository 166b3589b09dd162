//! # Read-only Queries
//!
//! A small DQL-style query language evaluated against a snapshot:
//!
//! ```text
//! query people($name: string) {
//!   q(func: eq(name, $name)) {
//!     uid
//!     name
//!     friend { name }
//!     ~friend { uid }
//!   }
//! }
//! ```
//!
//! Responses are JSON objects keyed by block alias. UIDs render as `0x..`
//! strings, list predicates as arrays, nodes with nothing to show are
//! omitted.

mod executor;
mod parser;

pub use executor::{GraphReader, execute};
pub use parser::{Block, Field, Query, RootFunc, parse};

use serde::Serialize;

/// Result of a read-only query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    /// Rendered result: `{ alias: [node, ...] }`.
    pub json: serde_json::Value,
    /// Timestamp the query read at.
    pub start_ts: u64,
}
