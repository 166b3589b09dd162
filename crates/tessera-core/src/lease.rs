//! # Lease Store
//!
//! Durable home of the single `LeaseRecord`: the highest UID, timestamp and
//! namespace ID ever leased from this data directory.
//!
//! The store holds no allocation logic. It reads and atomically replaces one
//! record, and a write must be durable before it returns, because the
//! `Authority` hands out values from a new window only after the window is
//! on disk.
//!
//! Two implementations:
//! - `RedbLeaseStore`: the record lives in its own unversioned table of the
//!   engine's redb file, so drop-all never touches it
//! - `MemoryLeaseStore`: volatile, counts writes, can be told to fail

use crate::TesseraError;
use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, TableDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Table holding the lease record: fixed key -> postcard bytes.
const LEASE: TableDefinition<&str, &[u8]> = TableDefinition::new("lease");

/// Fixed key of the lease record.
const LEASE_KEY: &str = "0-tessera.zero";

/// High-water marks of every leased counter.
///
/// Each field is the first value NOT covered by a durable lease. Values below
/// it may already have been handed out, so a restarted authority resumes at
/// exactly these values. All fields are non-decreasing over the record's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub max_leased_uid: u64,
    pub max_leased_ts: u64,
    pub max_leased_namespace: u64,
}

impl LeaseRecord {
    fn to_bytes(self) -> Result<Vec<u8>, TesseraError> {
        postcard::to_allocvec(&self).map_err(|e| TesseraError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, TesseraError> {
        postcard::from_bytes(bytes).map_err(|e| TesseraError::Serialization(e.to_string()))
    }
}

/// Atomic read/replace of the lease record.
///
/// Failures are returned to the allocation that triggered them; the store
/// never retries on its own.
pub trait LeaseStore: Send + Sync {
    /// The last persisted record, or `None` for a brand-new data directory.
    fn read(&self) -> Result<Option<LeaseRecord>, TesseraError>;

    /// Replace the record. Durable before returning.
    fn write(&self, record: &LeaseRecord) -> Result<(), TesseraError>;
}

// =============================================================================
// REDB-BACKED STORE
// =============================================================================

/// Lease store sharing the engine's redb database.
#[derive(Clone)]
pub struct RedbLeaseStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbLeaseStore").finish_non_exhaustive()
    }
}

impl RedbLeaseStore {
    /// Wrap an open database. The lease table is created on first write.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl LeaseStore for RedbLeaseStore {
    fn read(&self) -> Result<Option<LeaseRecord>, TesseraError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TesseraError::Lease(e.to_string()))?;
        let table = match read_txn.open_table(LEASE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(TesseraError::Lease(e.to_string())),
        };
        match table
            .get(LEASE_KEY)
            .map_err(|e| TesseraError::Lease(e.to_string()))?
        {
            Some(data) => LeaseRecord::from_bytes(data.value()).map(Some),
            None => Ok(None),
        }
    }

    fn write(&self, record: &LeaseRecord) -> Result<(), TesseraError> {
        let bytes = record.to_bytes()?;
        // redb write transactions commit with immediate (fsync) durability by default.
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| TesseraError::Lease(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(LEASE)
                .map_err(|e| TesseraError::Lease(e.to_string()))?;
            table
                .insert(LEASE_KEY, bytes.as_slice())
                .map_err(|e| TesseraError::Lease(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| TesseraError::Lease(e.to_string()))?;
        Ok(())
    }
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Volatile lease store.
///
/// Useful for exercising the authority without a database: it counts
/// successful writes and can be switched into a failing mode to simulate
/// a broken disk.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    record: Mutex<Option<LeaseRecord>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryLeaseStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `record`, as after a previous run.
    #[must_use]
    pub fn with_record(record: LeaseRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            ..Self::default()
        }
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }

    /// Make every subsequent `read`/`write` fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// The current record, bypassing failure injection.
    #[must_use]
    pub fn snapshot(&self) -> Option<LeaseRecord> {
        *self.record.lock()
    }

    fn check(&self) -> Result<(), TesseraError> {
        if self.failing.load(Ordering::Acquire) {
            Err(TesseraError::Lease("injected lease store failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn read(&self) -> Result<Option<LeaseRecord>, TesseraError> {
        self.check()?;
        Ok(*self.record.lock())
    }

    fn write(&self, record: &LeaseRecord) -> Result<(), TesseraError> {
        self.check()?;
        *self.record.lock() = Some(*record);
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

impl<T: LeaseStore + ?Sized> LeaseStore for Arc<T> {
    fn read(&self) -> Result<Option<LeaseRecord>, TesseraError> {
        (**self).read()
    }

    fn write(&self, record: &LeaseRecord) -> Result<(), TesseraError> {
        (**self).write(record)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_db(path: &std::path::Path) -> Arc<Database> {
        Arc::new(Database::create(path).expect("open db"))
    }

    #[test]
    fn fresh_database_has_no_record() {
        let temp = tempdir().expect("temp dir");
        let store = RedbLeaseStore::new(open_db(&temp.path().join("lease.redb")));
        assert_eq!(store.read().expect("read"), None);
    }

    #[test]
    fn write_then_read() {
        let temp = tempdir().expect("temp dir");
        let store = RedbLeaseStore::new(open_db(&temp.path().join("lease.redb")));
        let record = LeaseRecord {
            max_leased_uid: 10_002,
            max_leased_ts: 3,
            max_leased_namespace: 1,
        };
        store.write(&record).expect("write");
        assert_eq!(store.read().expect("read"), Some(record));
    }

    #[test]
    fn record_survives_reopen() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("lease.redb");
        let record = LeaseRecord {
            max_leased_uid: 50,
            max_leased_ts: 70,
            max_leased_namespace: 4,
        };
        {
            let store = RedbLeaseStore::new(open_db(&path));
            store.write(&record).expect("write");
        }
        let store = RedbLeaseStore::new(open_db(&path));
        assert_eq!(store.read().expect("read"), Some(record));
    }

    #[test]
    fn write_replaces_prior_record() {
        let temp = tempdir().expect("temp dir");
        let store = RedbLeaseStore::new(open_db(&temp.path().join("lease.redb")));
        store
            .write(&LeaseRecord {
                max_leased_uid: 1,
                max_leased_ts: 1,
                max_leased_namespace: 1,
            })
            .expect("write");
        let newer = LeaseRecord {
            max_leased_uid: 2,
            max_leased_ts: 3,
            max_leased_namespace: 4,
        };
        store.write(&newer).expect("write");
        assert_eq!(store.read().expect("read"), Some(newer));
    }

    #[test]
    fn memory_store_counts_writes_and_fails_on_demand() {
        let store = MemoryLeaseStore::new();
        store.write(&LeaseRecord::default()).expect("write");
        assert_eq!(store.writes(), 1);

        store.set_failing(true);
        assert!(matches!(
            store.write(&LeaseRecord::default()),
            Err(TesseraError::Lease(_))
        ));
        assert!(store.read().is_err());
        assert_eq!(store.writes(), 1);
    }
}
