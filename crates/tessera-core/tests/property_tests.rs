//! # Property-Based Tests
//!
//! Allocation invariants of the authority, checked with proptest over random
//! request sequences, block sizes and crash points.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use proptest::collection::vec;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_core::{
    Authority, Bootstrap, LeaseBlocks, LeaseRecord, LeaseStore, MemoryLeaseStore, Watermark,
};

#[derive(Debug, Default)]
struct MaxWatermark(AtomicU64);

impl Watermark for MaxWatermark {
    fn process_delta(&self, max_assigned: u64) {
        self.0.fetch_max(max_assigned, Ordering::AcqRel);
    }
}

fn blocks(uid: u64, ts: u64) -> LeaseBlocks {
    LeaseBlocks {
        uid,
        ts,
        namespace: 3,
    }
}

fn open(store: &Arc<MemoryLeaseStore>, blocks: LeaseBlocks) -> (Authority, Bootstrap) {
    Authority::open(
        Box::new(Arc::clone(store)),
        Arc::new(MaxWatermark::default()),
        blocks,
    )
    .expect("open")
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Ranges from any request sequence are disjoint and strictly increasing.
    #[test]
    fn uid_ranges_are_disjoint_and_increasing(
        counts in vec(1u64..500, 1..60),
        block in 1u64..1000
    ) {
        let store = Arc::new(MemoryLeaseStore::new());
        let (mut authority, _) = open(&store, blocks(block, block));

        let mut last_end = None;
        for count in counts {
            let range = authority.next_uids(count).expect("lease");
            prop_assert_eq!(range.count(), count);
            if let Some(end) = last_end {
                prop_assert!(range.start_id > end);
            }
            last_end = Some(range.end_id);
        }
    }

    /// A restarted authority never returns a UID at or below one already
    /// returned, wherever the previous process stopped.
    #[test]
    fn restart_never_reissues_uids(
        before in vec(1u64..300, 0..30),
        after in vec(1u64..300, 1..30),
        block in 1u64..500
    ) {
        let store = Arc::new(MemoryLeaseStore::new());
        let mut issued_max = 0;
        {
            let (mut authority, _) = open(&store, blocks(block, block));
            for count in before {
                issued_max = issued_max.max(authority.next_uids(count).expect("lease").end_id);
            }
        }

        let (mut authority, bootstrap) = open(&store, blocks(block, block));
        prop_assert_eq!(bootstrap, Bootstrap::Restart);
        for count in after {
            let range = authority.next_uids(count).expect("lease");
            prop_assert!(range.start_id > issued_max);
            issued_max = range.end_id;
        }
    }

    /// With a persisted watermark `M`, a fresh authority starts exactly at `M`.
    #[test]
    fn first_uid_after_restart_is_the_persisted_watermark(m in 2u64..1_000_000) {
        let store = Arc::new(MemoryLeaseStore::with_record(LeaseRecord {
            max_leased_uid: m,
            max_leased_ts: 3,
            max_leased_namespace: 1,
        }));
        let (mut authority, _) = open(&store, blocks(10_000, 10_000));
        prop_assert_eq!(authority.next_uid().expect("uid"), m);
    }

    /// A request larger than the remaining window costs exactly one lease
    /// write, and the persisted limit covers the whole range.
    #[test]
    fn oversized_request_extends_once(
        prefix in 0u64..100,
        count in 1u64..50_000,
        block in 1u64..20_000
    ) {
        let store = Arc::new(MemoryLeaseStore::new());
        let (mut authority, _) = open(&store, blocks(block, block));
        if prefix > 0 {
            authority.next_uids(prefix).expect("prefix");
        }
        let snap = authority.snapshot();
        let remaining = snap.max_leased_uid - snap.next_uid;
        prop_assume!(count > remaining);

        let writes = store.writes();
        let range = authority.next_uids(count).expect("lease");
        prop_assert_eq!(store.writes(), writes + 1);
        let record = store.read().expect("read").expect("record");
        prop_assert!(range.end_id < record.max_leased_uid);
    }

    /// Timestamps are strictly increasing and interleave with UID leases
    /// without either counter moving the other.
    #[test]
    fn timestamps_are_strictly_increasing(
        ops in vec(prop_oneof![Just(None), (1u64..50).prop_map(Some)], 1..100),
        block in 1u64..64
    ) {
        let store = Arc::new(MemoryLeaseStore::new());
        let (mut authority, _) = open(&store, blocks(block, block));

        let mut last_ts = authority.read_ts();
        for op in ops {
            match op {
                None => {
                    let ts = authority.next_ts().expect("ts");
                    prop_assert!(ts > last_ts);
                    prop_assert_eq!(authority.read_ts(), ts);
                    last_ts = ts;
                }
                Some(count) => {
                    authority.next_uids(count).expect("lease");
                    prop_assert_eq!(authority.read_ts(), last_ts);
                }
            }
        }
    }

    /// The persisted record never decreases.
    #[test]
    fn lease_record_is_monotonic(counts in vec(1u64..200, 1..40), block in 1u64..100) {
        let store = Arc::new(MemoryLeaseStore::new());
        let (mut authority, _) = open(&store, blocks(block, block));
        let mut prev = store.snapshot().expect("seed");
        for count in counts {
            authority.next_uids(count).expect("lease");
            authority.next_ts().expect("ts");
            let now = store.snapshot().expect("record");
            prop_assert!(now.max_leased_uid >= prev.max_leased_uid);
            prop_assert!(now.max_leased_ts >= prev.max_leased_ts);
            prop_assert!(now.max_leased_namespace >= prev.max_leased_namespace);
            prev = now;
        }
    }
}
