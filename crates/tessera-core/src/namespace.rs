//! # Namespace Registry
//!
//! Namespaces are logical partitions of one engine. Namespace `0` exists from
//! the moment the engine opens; the others are allocated by the authority
//! and seeded with the bootstrap schema.
//!
//! Existence is approximate: any ID up to the highest ever allocated is
//! accepted by `get_namespace`. Namespaces are never deleted, only emptied.

use crate::commit::commit_batch;
use crate::engine::EngineState;
use crate::mutation::Mutation;
use crate::primitives::DEFAULT_NAMESPACE;
use crate::query::QueryResponse;
use crate::schema::{PredicateSchema, parse_schema};
use crate::storage::{DropOp, Proposal, ProposalPayload, QueryRequest};
use crate::{Context, Engine, TesseraError, Uid};
use std::collections::BTreeMap;

// =============================================================================
// REGISTRY
// =============================================================================

impl Engine {
    /// Allocate a new namespace and seed its bootstrap schema.
    ///
    /// The ID is consumed even if seeding fails; IDs are never reclaimed.
    pub fn create_namespace(&self) -> Result<Namespace, TesseraError> {
        let mut state = self.write_open()?;
        let start_ts = state.authority.next_ts()?;
        let id = state.authority.next_namespace()?;

        let store = &state.store;
        store.apply_initial_schema(id, start_ts)?;
        for schema in store.schema(id)? {
            store.init_tablet(id, &schema.predicate)?;
        }

        tracing::info!(namespace = id, start_ts, "namespace created");
        Ok(Namespace {
            id,
            engine: self.clone(),
        })
    }

    /// Look up a namespace by ID.
    pub fn get_namespace(&self, id: u64) -> Result<Namespace, TesseraError> {
        let state = self.read_open()?;
        if id != DEFAULT_NAMESPACE && id > state.authority.last_namespace() {
            return Err(TesseraError::NamespaceNotFound(id));
        }
        Ok(Namespace {
            id,
            engine: self.clone(),
        })
    }

    /// Namespace `0`.
    pub fn default_namespace(&self) -> Result<Namespace, TesseraError> {
        self.get_namespace(DEFAULT_NAMESPACE)
    }
}

// =============================================================================
// NAMESPACE HANDLE
// =============================================================================

/// Handle to one namespace of an engine.
#[derive(Debug, Clone)]
pub struct Namespace {
    id: u64,
    engine: Engine,
}

impl Namespace {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Apply a batch of mutations atomically.
    ///
    /// Returns the UID allocated for every blank label (keyed without the
    /// `_:` prefix). The batch is visible to every query stamped after this
    /// call returns.
    pub fn mutate(
        &self,
        ctx: &Context,
        mutations: &[Mutation],
    ) -> Result<BTreeMap<String, Uid>, TesseraError> {
        let mut guard = self.engine.write_open()?;
        let state = &mut *guard;
        commit_batch(
            &mut state.authority,
            state.store.as_ref(),
            ctx,
            self.id,
            mutations,
        )
    }

    /// Run a read-only query at the current read timestamp.
    pub fn query(&self, ctx: &Context, text: &str) -> Result<QueryResponse, TesseraError> {
        self.query_with_vars(ctx, text, &BTreeMap::new())
    }

    /// Run a read-only query with `$variable` values.
    pub fn query_with_vars(
        &self,
        ctx: &Context,
        text: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<QueryResponse, TesseraError> {
        let state = self.engine.read_open()?;
        let start_ts = state.authority.read_ts();
        self.run_query(&state, ctx, text, vars, start_ts)
    }

    /// Run a read-only query against an earlier snapshot.
    ///
    /// `ts` may not be ahead of the current read timestamp.
    pub fn query_at(
        &self,
        ctx: &Context,
        text: &str,
        vars: &BTreeMap<String, String>,
        ts: u64,
    ) -> Result<QueryResponse, TesseraError> {
        let state = self.engine.read_open()?;
        let read_ts = state.authority.read_ts();
        if ts > read_ts {
            return Err(TesseraError::InvalidArgument(format!(
                "timestamp {ts} is ahead of the read timestamp {read_ts}"
            )));
        }
        self.run_query(&state, ctx, text, vars, ts)
    }

    fn run_query(
        &self,
        state: &EngineState,
        ctx: &Context,
        text: &str,
        vars: &BTreeMap<String, String>,
        start_ts: u64,
    ) -> Result<QueryResponse, TesseraError> {
        state.store.query_read_only(
            ctx,
            QueryRequest {
                namespace: self.id,
                query: text.to_string(),
                vars: vars.clone(),
                start_ts,
                node_limit: self.engine.inner.config.query_node_limit,
            },
        )
    }

    /// Parse and apply a schema document.
    pub fn alter_schema(&self, ctx: &Context, text: &str) -> Result<(), TesseraError> {
        let entries = parse_schema(text)?;
        let mut guard = self.engine.write_open()?;
        let state = &mut *guard;
        for schema in &entries {
            state.store.init_tablet(self.id, &schema.predicate)?;
        }
        let start_ts = state.authority.next_ts()?;
        let count = entries.len();
        state.store.apply_mutations(
            ctx,
            Proposal {
                namespace: self.id,
                start_ts,
                payload: ProposalPayload::Schema(entries),
            },
        )?;
        tracing::debug!(namespace = self.id, start_ts, predicates = count, "schema altered");
        Ok(())
    }

    /// Current schema of this namespace, sorted by predicate.
    pub fn schema(&self) -> Result<Vec<PredicateSchema>, TesseraError> {
        self.engine.read_open()?.store.schema(self.id)
    }

    /// Remove every posting of this namespace. Schema and ID stay.
    pub fn drop_data(&self, ctx: &Context) -> Result<(), TesseraError> {
        let mut guard = self.engine.write_open()?;
        let state = &mut *guard;
        let start_ts = state.authority.next_ts()?;
        state.store.apply_mutations(
            ctx,
            Proposal {
                namespace: self.id,
                start_ts,
                payload: ProposalPayload::Drop(DropOp::Data),
            },
        )?;
        tracing::info!(namespace = self.id, start_ts, "dropped namespace data");
        Ok(())
    }

    /// Drop the data of every namespace. See `Engine::drop_all`.
    pub fn drop_all(&self, ctx: &Context) -> Result<(), TesseraError> {
        self.engine.drop_all(ctx)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use crate::engine::TEST_ENGINE_LOCK;
    use crate::mutation::NQuad;
    use serde_json::json;
    use tempfile::tempdir;

    fn with_engine(f: impl FnOnce(&Engine)) {
        let _lock = TEST_ENGINE_LOCK.lock();
        let temp = tempdir().expect("temp dir");
        let engine = Engine::open(Config::new(temp.path())).expect("open");
        f(&engine);
        engine.close();
    }

    #[test]
    fn default_namespace_always_exists() {
        with_engine(|engine| {
            assert_eq!(engine.default_namespace().expect("ns0").id(), 0);
            assert!(matches!(
                engine.get_namespace(1),
                Err(TesseraError::NamespaceNotFound(1))
            ));
        });
    }

    #[test]
    fn create_namespace_allocates_sequential_ids() {
        with_engine(|engine| {
            let a = engine.create_namespace().expect("create");
            let b = engine.create_namespace().expect("create");
            assert_eq!((a.id(), b.id()), (1, 2));
            assert_eq!(engine.get_namespace(2).expect("lookup").id(), 2);
            assert!(a.schema().expect("schema").iter().any(|s| s.predicate == "dgraph.type"));
        });
    }

    #[test]
    fn namespaces_are_isolated() {
        with_engine(|engine| {
            let ctx = Context::background();
            let ns0 = engine.default_namespace().expect("ns0");
            let ns1 = engine.create_namespace().expect("ns1");
            ns0.mutate(&ctx, &[Mutation::new().set(NQuad::value("_:a", "name", "zero"))])
                .expect("mutate");
            ns1.mutate(&ctx, &[Mutation::new().set(NQuad::value("_:a", "name", "one"))])
                .expect("mutate");

            let q = "{ q(func: has(name)) { name } }";
            assert_eq!(ns0.query(&ctx, q).expect("query").json, json!({"q": [{"name": "zero"}]}));
            assert_eq!(ns1.query(&ctx, q).expect("query").json, json!({"q": [{"name": "one"}]}));
        });
    }

    #[test]
    fn alter_schema_enables_reverse_edges() {
        with_engine(|engine| {
            let ctx = Context::background();
            let ns = engine.default_namespace().expect("ns0");
            ns.alter_schema(&ctx, "name: string @index(exact) .\nfollows: [uid] @reverse .")
                .expect("schema");
            ns.mutate(
                &ctx,
                &[Mutation::new().with_set_nquads(
                    "_:a <name> \"A\" .\n_:b <name> \"B\" .\n_:a <follows> _:b .",
                )],
            )
            .expect("mutate");

            let out = ns
                .query(&ctx, "{ q(func: eq(name, \"B\")) { name ~follows { name } } }")
                .expect("query");
            assert_eq!(out.json, json!({"q": [{"name": "B", "~follows": [{"name": "A"}]}]}));
        });
    }

    #[test]
    fn invalid_schema_consumes_no_timestamp() {
        with_engine(|engine| {
            let ns = engine.default_namespace().expect("ns0");
            let before = engine.read_ts().expect("ts");
            assert!(matches!(
                ns.alter_schema(&Context::background(), "name string"),
                Err(TesseraError::InvalidSchema(_))
            ));
            assert_eq!(engine.read_ts().expect("ts"), before);
        });
    }

    #[test]
    fn drop_data_keeps_schema_and_other_namespaces() {
        with_engine(|engine| {
            let ctx = Context::background();
            let ns0 = engine.default_namespace().expect("ns0");
            let ns1 = engine.create_namespace().expect("ns1");
            ns1.alter_schema(&ctx, "tag: string .").expect("schema");
            for ns in [&ns0, &ns1] {
                ns.mutate(&ctx, &[Mutation::new().set(NQuad::value("_:x", "tag", "t"))])
                    .expect("mutate");
            }

            ns1.drop_data(&ctx).expect("drop");
            let q = "{ q(func: has(tag)) { tag } }";
            assert_eq!(ns1.query(&ctx, q).expect("query").json, json!({"q": []}));
            assert_eq!(ns0.query(&ctx, q).expect("query").json, json!({"q": [{"tag": "t"}]}));
            assert!(ns1.schema().expect("schema").iter().any(|s| s.predicate == "tag"));
        });
    }

    #[test]
    fn query_at_reads_older_snapshot() {
        with_engine(|engine| {
            let ctx = Context::background();
            let ns = engine.default_namespace().expect("ns0");
            let before = engine.read_ts().expect("ts");
            ns.mutate(&ctx, &[Mutation::new().set(NQuad::value("_:a", "name", "A"))])
                .expect("mutate");

            let q = "{ q(func: has(name)) { name } }";
            let old = ns.query_at(&ctx, q, &BTreeMap::new(), before).expect("query");
            assert_eq!(old.json, json!({"q": []}));
            assert_eq!(old.start_ts, before);

            let ahead = engine.read_ts().expect("ts") + 1;
            assert!(matches!(
                ns.query_at(&ctx, q, &BTreeMap::new(), ahead),
                Err(TesseraError::InvalidArgument(_))
            ));
        });
    }

    #[test]
    fn handles_fail_after_close() {
        let _lock = TEST_ENGINE_LOCK.lock();
        let temp = tempdir().expect("temp dir");
        let engine = Engine::open(Config::new(temp.path())).expect("open");
        let ns = engine.default_namespace().expect("ns0");
        engine.close();

        let ctx = Context::background();
        assert!(matches!(ns.query(&ctx, "{ }"), Err(TesseraError::ClosedEngine)));
        assert!(matches!(ns.mutate(&ctx, &[]), Err(TesseraError::ClosedEngine)));
        assert!(matches!(engine.create_namespace(), Err(TesseraError::ClosedEngine)));
    }
}
