//! # Engine Primitives
//!
//! Fixed constants of the Tessera engine. These are compiled into the binary
//! and shared by the authority, the storage layer and the registry.
//!
//! ## Reserved Space
//!
//! 1. **UIDs**: `0` is invalid and `1` is reserved for internal state, so
//!    application nodes start at `INITIAL_UID`.
//! 2. **Timestamps**: `SCHEMA_TS` stamps the bootstrap schema and `2` is
//!    reserved, so transactions start at `INITIAL_TS`.
//! 3. **Namespaces**: `DEFAULT_NAMESPACE` always exists and is never leased.

/// First UID handed to application data on a fresh data directory.
pub const INITIAL_UID: u64 = 2;

/// Fixed timestamp at which the bootstrap schema of namespace 0 is applied.
pub const SCHEMA_TS: u64 = 1;

/// First transaction timestamp on a fresh data directory.
pub const INITIAL_TS: u64 = 3;

/// The default namespace. Created with the engine, never leased.
pub const DEFAULT_NAMESPACE: u64 = 0;

/// First namespace ID handed out by `create_namespace`.
pub const INITIAL_NAMESPACE: u64 = 1;

/// Default number of UIDs reserved per lease extension.
pub const UID_LEASE_BLOCK: u64 = 10_000;

/// Default number of timestamps reserved per lease extension.
pub const TS_LEASE_BLOCK: u64 = 10_000;

/// Default number of namespace IDs reserved per lease extension.
///
/// Namespaces are rare; a small block keeps the recorded watermark close to
/// the real allocation count.
pub const NAMESPACE_LEASE_BLOCK: u64 = 100;

/// Default upper bound on nodes rendered by a single query.
pub const QUERY_NODE_LIMIT: usize = 10_000;

/// Maximum nesting depth of a query selection.
///
/// Parsing and rendering recurse once per level, so the bound keeps caller
/// input from exhausting the stack.
pub const MAX_QUERY_DEPTH: usize = 64;

/// Predicate holding the type names of a node.
pub const TYPE_PREDICATE: &str = "dgraph.type";

/// Schema applied to every namespace when it is created.
pub const INITIAL_SCHEMA: &str = "dgraph.type: [string] @index(exact) .";

/// Prefix that marks a subject or object as a blank node.
pub const BLANK_PREFIX: &str = "_:";

/// Prefix of reverse predicates in queries and stored reverse postings.
pub const REVERSE_PREFIX: char = '~';

/// Maximum length of a predicate name.
pub const MAX_PREDICATE_LENGTH: usize = 256;

/// Maximum number of statements accepted in a single mutation batch.
pub const MAX_BATCH_STATEMENTS: usize = 100_000;

/// Maximum size of a schema, data or query file read from disk (100 MB).
pub const MAX_INPUT_FILE_SIZE: u64 = 100 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_timestamps_precede_transactions() {
        assert!(SCHEMA_TS < INITIAL_TS);
    }

    #[test]
    fn initial_uid_skips_reserved_ids() {
        assert_eq!(INITIAL_UID, 2);
    }
}
