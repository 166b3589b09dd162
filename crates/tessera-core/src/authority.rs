//! # Identity & Timestamp Authority
//!
//! In-process replacement for a cluster's metadata coordinator. Hands out
//! node UIDs, namespace IDs and transaction timestamps from in-memory
//! windows, and re-leases ahead of exhaustion through the `LeaseStore`.
//!
//! ## Lease-Ahead Allocation
//!
//! Every counter is a `Window { next, limit }`: `next` is the next value to
//! hand out, `limit` is the first value not covered by a durable lease.
//! `next <= limit` always holds. When a request does not fit, a new limit of
//! `next + count + block` is written to the lease store BEFORE any value of
//! the new window is returned. The unused tail of a window is abandoned on
//! restart; that is the price of never reissuing a value.
//!
//! The authority is not internally synchronized. The engine mutates it only
//! under its exclusive write lock.

use crate::lease::{LeaseRecord, LeaseStore};
use crate::primitives::{INITIAL_NAMESPACE, INITIAL_TS, INITIAL_UID};
use crate::storage::Watermark;
use crate::{Config, TesseraError};
use std::sync::Arc;

/// A contiguous inclusive range of allocated IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignedIds {
    pub start_id: u64,
    pub end_id: u64,
}

impl AssignedIds {
    /// Number of IDs in the range. Never zero.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.end_id - self.start_id + 1
    }

    #[must_use]
    pub const fn contains(&self, id: u64) -> bool {
        self.start_id <= id && id <= self.end_id
    }
}

/// Outcome of recovering the authority from the lease store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bootstrap {
    /// No record existed: the data directory is new and the caller must seed
    /// the bootstrap schema.
    Fresh,
    /// A record existed: counters continue from it and the bootstrap schema
    /// is already in place.
    Restart,
}

/// Number of values reserved by one lease extension, per counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseBlocks {
    pub uid: u64,
    pub ts: u64,
    pub namespace: u64,
}

impl From<&Config> for LeaseBlocks {
    fn from(config: &Config) -> Self {
        Self {
            uid: config.uid_lease_block,
            ts: config.ts_lease_block,
            namespace: config.namespace_lease_block,
        }
    }
}

/// Point-in-time view of all three windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSnapshot {
    pub next_uid: u64,
    pub max_leased_uid: u64,
    pub next_ts: u64,
    pub max_leased_ts: u64,
    pub next_namespace: u64,
    pub max_leased_namespace: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    next: u64,
    limit: u64,
}

impl Window {
    const fn seeded(at: u64) -> Self {
        Self {
            next: at,
            limit: at,
        }
    }

    /// New limit required to serve `count` more values, or `None` if the
    /// current window already covers them.
    fn extension(&self, count: u64, block: u64) -> Result<Option<u64>, TesseraError> {
        let end = self
            .next
            .checked_add(count)
            .ok_or_else(|| TesseraError::Lease("id space exhausted".to_string()))?;
        if end <= self.limit {
            return Ok(None);
        }
        end.checked_add(block)
            .map(Some)
            .ok_or_else(|| TesseraError::Lease("id space exhausted".to_string()))
    }

    /// Take `count` values. The caller guarantees they fit.
    fn take(&mut self, count: u64) -> AssignedIds {
        debug_assert!(self.next + count <= self.limit);
        let start_id = self.next;
        self.next += count;
        AssignedIds {
            start_id,
            end_id: self.next - 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Uid,
    Ts,
    Namespace,
}

/// The identity and timestamp authority.
pub struct Authority {
    lease_store: Box<dyn LeaseStore>,
    watermark: Arc<dyn Watermark>,
    blocks: LeaseBlocks,
    uids: Window,
    timestamps: Window,
    namespaces: Window,
}

impl std::fmt::Debug for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authority")
            .field("blocks", &self.blocks)
            .field("uids", &self.uids)
            .field("timestamps", &self.timestamps)
            .field("namespaces", &self.namespaces)
            .finish_non_exhaustive()
    }
}

impl Authority {
    /// Create an authority seeded with the fresh defaults. No I/O happens
    /// until `recover` is called.
    pub fn new(
        lease_store: Box<dyn LeaseStore>,
        watermark: Arc<dyn Watermark>,
        blocks: LeaseBlocks,
    ) -> Self {
        Self {
            lease_store,
            watermark,
            blocks,
            uids: Window::seeded(INITIAL_UID),
            timestamps: Window::seeded(INITIAL_TS),
            namespaces: Window::seeded(INITIAL_NAMESPACE),
        }
    }

    /// Construct and recover in one step.
    pub fn open(
        lease_store: Box<dyn LeaseStore>,
        watermark: Arc<dyn Watermark>,
        blocks: LeaseBlocks,
    ) -> Result<(Self, Bootstrap), TesseraError> {
        let mut authority = Self::new(lease_store, watermark, blocks);
        let bootstrap = authority.recover()?;
        Ok((authority, bootstrap))
    }

    /// (Re)seed every window from the lease store, in place.
    ///
    /// With no record, the windows start at the fresh defaults and the seed
    /// is persisted immediately so the next start is detected as a restart.
    /// With a record, every window resumes at its persisted high-water mark.
    pub fn recover(&mut self) -> Result<Bootstrap, TesseraError> {
        let bootstrap = match self.lease_store.read()? {
            None => {
                self.uids = Window::seeded(INITIAL_UID);
                self.timestamps = Window::seeded(INITIAL_TS);
                self.namespaces = Window::seeded(INITIAL_NAMESPACE);
                self.lease_store.write(&self.record())?;
                Bootstrap::Fresh
            }
            Some(record) => {
                self.uids = Window::seeded(record.max_leased_uid);
                self.timestamps = Window::seeded(record.max_leased_ts);
                self.namespaces = Window::seeded(record.max_leased_namespace);
                Bootstrap::Restart
            }
        };
        self.watermark.process_delta(self.read_ts());
        tracing::debug!(
            ?bootstrap,
            next_uid = self.uids.next,
            next_ts = self.timestamps.next,
            next_namespace = self.namespaces.next,
            "authority recovered"
        );
        Ok(bootstrap)
    }

    /// Allocate a single UID.
    pub fn next_uid(&mut self) -> Result<u64, TesseraError> {
        Ok(self.next_uids(1)?.start_id)
    }

    /// Reserve `count` contiguous UIDs.
    pub fn next_uids(&mut self, count: u64) -> Result<AssignedIds, TesseraError> {
        if count == 0 {
            return Err(TesseraError::InvalidArgument(
                "cannot lease zero uids".to_string(),
            ));
        }
        self.reserve(Counter::Uid, count)
    }

    /// Allocate a transaction timestamp and publish it to the watermark.
    pub fn next_ts(&mut self) -> Result<u64, TesseraError> {
        let ts = self.allocate_ts()?;
        self.watermark.process_delta(ts);
        Ok(ts)
    }

    /// Allocate a timestamp without publishing it.
    pub fn allocate_ts(&mut self) -> Result<u64, TesseraError> {
        Ok(self.reserve(Counter::Ts, 1)?.start_id)
    }

    /// Allocate a namespace ID. Namespaces have their own counter, so they do
    /// not consume node UID space.
    pub fn next_namespace(&mut self) -> Result<u64, TesseraError> {
        Ok(self.reserve(Counter::Namespace, 1)?.start_id)
    }

    /// The last timestamp definitely allocated. Read-only queries are stamped
    /// with it.
    #[must_use]
    pub const fn read_ts(&self) -> u64 {
        self.timestamps.next - 1
    }

    /// The highest namespace ID that may have been allocated.
    #[must_use]
    pub const fn last_namespace(&self) -> u64 {
        self.namespaces.next - 1
    }

    /// Exclusive upper bound of UIDs that may have been handed out.
    #[must_use]
    pub const fn uid_bound(&self) -> u64 {
        self.uids.next
    }

    #[must_use]
    pub const fn snapshot(&self) -> LeaseSnapshot {
        LeaseSnapshot {
            next_uid: self.uids.next,
            max_leased_uid: self.uids.limit,
            next_ts: self.timestamps.next,
            max_leased_ts: self.timestamps.limit,
            next_namespace: self.namespaces.next,
            max_leased_namespace: self.namespaces.limit,
        }
    }

    fn record(&self) -> LeaseRecord {
        LeaseRecord {
            max_leased_uid: self.uids.limit,
            max_leased_ts: self.timestamps.limit,
            max_leased_namespace: self.namespaces.limit,
        }
    }

    fn reserve(&mut self, counter: Counter, count: u64) -> Result<AssignedIds, TesseraError> {
        let (window, block) = match counter {
            Counter::Uid => (self.uids, self.blocks.uid),
            Counter::Ts => (self.timestamps, self.blocks.ts),
            Counter::Namespace => (self.namespaces, self.blocks.namespace),
        };

        if let Some(limit) = window.extension(count, block)? {
            // The record always carries all current maxima, so extending one
            // counter re-persists the others unchanged.
            let mut record = self.record();
            match counter {
                Counter::Uid => record.max_leased_uid = limit,
                Counter::Ts => record.max_leased_ts = limit,
                Counter::Namespace => record.max_leased_namespace = limit,
            }
            self.lease_store.write(&record)?;
            tracing::debug!(?counter, limit, "lease extended");
            self.window_mut(counter).limit = limit;
        }

        Ok(self.window_mut(counter).take(count))
    }

    fn window_mut(&mut self, counter: Counter) -> &mut Window {
        match counter {
            Counter::Uid => &mut self.uids,
            Counter::Ts => &mut self.timestamps,
            Counter::Namespace => &mut self.namespaces,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::MemoryLeaseStore;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Default)]
    struct RecordingWatermark {
        max: AtomicU64,
    }

    impl Watermark for RecordingWatermark {
        fn process_delta(&self, max_assigned: u64) {
            self.max.fetch_max(max_assigned, Ordering::AcqRel);
        }
    }

    const BLOCKS: LeaseBlocks = LeaseBlocks {
        uid: 10_000,
        ts: 10_000,
        namespace: 100,
    };

    fn fresh() -> (Authority, Arc<MemoryLeaseStore>, Arc<RecordingWatermark>) {
        let store = Arc::new(MemoryLeaseStore::new());
        let watermark = Arc::new(RecordingWatermark::default());
        let (authority, bootstrap) =
            Authority::open(Box::new(store.clone()), watermark.clone(), BLOCKS).expect("open");
        assert_eq!(bootstrap, Bootstrap::Fresh);
        (authority, store, watermark)
    }

    #[test]
    fn bootstrap_seeds_defaults_and_persists() {
        let (authority, store, _) = fresh();
        let snap = authority.snapshot();
        assert_eq!((snap.next_uid, snap.max_leased_uid), (2, 2));
        assert_eq!((snap.next_ts, snap.max_leased_ts), (3, 3));
        assert_eq!(authority.read_ts(), 2);
        assert_eq!(authority.last_namespace(), 0);
        assert_eq!(store.writes(), 1);
        assert_eq!(
            store.snapshot(),
            Some(LeaseRecord {
                max_leased_uid: 2,
                max_leased_ts: 3,
                max_leased_namespace: 1,
            })
        );
    }

    #[test]
    fn uid_exhaustion_boundary() {
        let (mut authority, store, _) = fresh();
        let writes_before = store.writes();

        let range = authority.next_uids(10_000).expect("lease");
        assert_eq!(range, AssignedIds { start_id: 2, end_id: 10_001 });
        assert_eq!(store.writes(), writes_before + 1);
        let record = store.snapshot().expect("record");
        assert!(record.max_leased_uid >= 10_002);

        assert_eq!(authority.next_uid().expect("uid"), 10_002);
        assert_eq!(store.writes(), writes_before + 1);
    }

    #[test]
    fn extension_covers_request_larger_than_block() {
        let (mut authority, store, _) = fresh();
        let writes_before = store.writes();
        let range = authority.next_uids(25_000).expect("lease");
        assert_eq!(range.count(), 25_000);
        assert_eq!(store.writes(), writes_before + 1);
        let record = store.snapshot().expect("record");
        assert!(range.end_id < record.max_leased_uid);
    }

    #[test]
    fn restart_continues_from_watermark() {
        let store = Arc::new(MemoryLeaseStore::with_record(LeaseRecord {
            max_leased_uid: 50,
            max_leased_ts: 80,
            max_leased_namespace: 3,
        }));
        let watermark = Arc::new(RecordingWatermark::default());
        let (mut authority, bootstrap) =
            Authority::open(Box::new(store.clone()), watermark.clone(), BLOCKS).expect("open");

        assert_eq!(bootstrap, Bootstrap::Restart);
        assert_eq!(store.writes(), 0);
        assert_eq!(watermark.max.load(Ordering::Acquire), 79);
        assert_eq!(authority.next_uid().expect("uid"), 50);
        assert_eq!(authority.next_ts().expect("ts"), 80);
        assert_eq!(authority.next_namespace().expect("ns"), 3);
    }

    #[test]
    fn crash_abandons_unused_tail() {
        let store = Arc::new(MemoryLeaseStore::new());
        let watermark = Arc::new(RecordingWatermark::default());
        let handed_out = {
            let (mut authority, _) =
                Authority::open(Box::new(store.clone()), watermark.clone(), BLOCKS)
                    .expect("open");
            authority.next_uids(10).expect("lease");
            authority.next_uid().expect("uid")
        };

        // Simulated crash: the in-memory authority is gone, the record stays.
        let (mut authority, bootstrap) =
            Authority::open(Box::new(store.clone()), watermark, BLOCKS).expect("reopen");
        assert_eq!(bootstrap, Bootstrap::Restart);
        assert!(authority.next_uid().expect("uid") > handed_out);
    }

    #[test]
    fn next_ts_publishes_watermark() {
        let (mut authority, _, watermark) = fresh();
        let ts = authority.next_ts().expect("ts");
        assert_eq!(ts, 3);
        assert_eq!(watermark.max.load(Ordering::Acquire), 3);
        assert_eq!(authority.read_ts(), 3);
    }

    #[test]
    fn allocate_ts_does_not_publish() {
        let (mut authority, _, watermark) = fresh();
        authority.allocate_ts().expect("ts");
        assert_eq!(watermark.max.load(Ordering::Acquire), 2);
    }

    #[test]
    fn failed_lease_write_leaves_state_untouched() {
        let (mut authority, store, _) = fresh();
        let before = authority.snapshot();
        store.set_failing(true);

        assert!(matches!(
            authority.next_uids(5),
            Err(TesseraError::Lease(_))
        ));
        assert_eq!(authority.snapshot(), before);

        store.set_failing(false);
        assert_eq!(authority.next_uid().expect("uid"), before.next_uid);
    }

    #[test]
    fn extending_one_counter_repersists_the_others() {
        let (mut authority, store, _) = fresh();
        authority.next_uid().expect("uid");
        let after_uid = store.snapshot().expect("record");
        authority.next_ts().expect("ts");
        let after_ts = store.snapshot().expect("record");

        assert_eq!(after_ts.max_leased_uid, after_uid.max_leased_uid);
        assert!(after_ts.max_leased_ts > after_uid.max_leased_ts);
    }

    #[test]
    fn namespaces_do_not_consume_uids() {
        let (mut authority, _, _) = fresh();
        let before = authority.uid_bound();
        assert_eq!(authority.next_namespace().expect("ns"), 1);
        assert_eq!(authority.next_namespace().expect("ns"), 2);
        assert_eq!(authority.uid_bound(), before);
        assert_eq!(authority.last_namespace(), 2);
    }

    #[test]
    fn zero_count_is_rejected() {
        let (mut authority, _, _) = fresh();
        assert!(matches!(
            authority.next_uids(0),
            Err(TesseraError::InvalidArgument(_))
        ));
    }

    #[test]
    fn exhausted_space_is_an_error() {
        let store = Arc::new(MemoryLeaseStore::with_record(LeaseRecord {
            max_leased_uid: u64::MAX - 5,
            max_leased_ts: 3,
            max_leased_namespace: 1,
        }));
        let (mut authority, _) = Authority::open(
            Box::new(store),
            Arc::new(RecordingWatermark::default()),
            BLOCKS,
        )
        .expect("open");
        assert!(matches!(
            authority.next_uids(10),
            Err(TesseraError::Lease(_))
        ));
    }
}
