//! # Mutation Commit Pipeline
//!
//! Turns one batch of mutations into a committed transaction. Runs strictly
//! sequentially under the engine's exclusive lock:
//!
//! 1. parse every statement (no allocation on failure)
//! 2. assign UIDs to blank labels from one contiguous range
//! 3. convert to directed edges and expand them
//! 4. register every touched predicate
//! 5. allocate `start_ts`, then `commit_ts`
//! 6. apply the edges as a proposal at `start_ts`
//! 7. commit `start_ts -> commit_ts`
//!
//! Any error aborts the batch. Values already allocated stay consumed. A
//! failed commit discards the proposal staged in step 6.

use crate::authority::Authority;
use crate::mutation::{Mutation, blank_labels, parse_mutations};
use crate::storage::{Proposal, ProposalPayload, StorageEngine, TxnStatus};
use crate::{Context, TesseraError, Uid};
use std::collections::{BTreeMap, BTreeSet};

/// Commit one batch in `namespace`. Returns blank label -> allocated UID.
pub(crate) fn commit_batch(
    authority: &mut Authority,
    store: &dyn StorageEngine,
    ctx: &Context,
    namespace: u64,
    mutations: &[Mutation],
) -> Result<BTreeMap<String, Uid>, TesseraError> {
    let statements = parse_mutations(mutations, authority.uid_bound())?;
    if statements.is_empty() {
        return Ok(BTreeMap::new());
    }

    let labels = blank_labels(&statements);
    let mut uids = BTreeMap::new();
    if !labels.is_empty() {
        let range = authority.next_uids(labels.len() as u64)?;
        for (label, id) in labels.into_iter().zip(range.start_id..=range.end_id) {
            assert!(
                id != 0 && range.contains(id),
                "blank node _:{label} resolved to {id:#x} outside {range:?}"
            );
            uids.insert(label, Uid(id));
        }
        assert_eq!(
            uids.len() as u64,
            range.count(),
            "allocated range does not match blank labels"
        );
    }

    let edges = store.to_directed_edges(namespace, &statements, &uids)?;
    let edges = store.expand_edges(namespace, edges)?;

    let predicates: BTreeSet<&str> = edges.iter().map(|e| e.attr.as_str()).collect();
    for predicate in predicates {
        store.init_tablet(namespace, predicate)?;
    }

    let start_ts = authority.next_ts()?;
    let commit_ts = authority.next_ts()?;

    let edge_count = edges.len();
    store.apply_mutations(
        ctx,
        Proposal {
            namespace,
            start_ts,
            payload: ProposalPayload::Edges(edges),
        },
    )?;
    if let Err(e) = store.apply_committed(
        ctx,
        TxnStatus {
            start_ts,
            commit_ts,
        },
    ) {
        store.abort_proposal(start_ts);
        tracing::warn!(namespace, start_ts, error = %e, "commit failed, batch discarded");
        return Err(e);
    }

    tracing::debug!(
        namespace,
        start_ts,
        commit_ts,
        edges = edge_count,
        blanks = uids.len(),
        "mutation committed"
    );
    Ok(uids)
}

// =============================================================================
// TESTS
// =============================================================================
