//! # Engine Lifecycle Guard
//!
//! `Engine` is the explicit handle to an open data directory. It owns the
//! `Authority` and the storage collaborator, and guards both with a single
//! reader/writer lock:
//!
//! - mutations, schema changes, drops, namespace creation and UID leases take
//!   the lock exclusively
//! - queries take it shared
//! - open/close transitions take it exclusively
//!
//! At most one engine may be open per process. The guard is a bare atomic
//! flag taken before anything else is constructed, so a second `open` is
//! rejected without touching storage.

use crate::authority::{AssignedIds, Authority, Bootstrap, LeaseBlocks, LeaseSnapshot};
use crate::lease::{LeaseStore, RedbLeaseStore};
use crate::primitives::{DEFAULT_NAMESPACE, SCHEMA_TS};
use crate::storage::{DropOp, Proposal, ProposalPayload, RedbStore, StorageEngine, Watermark};
use crate::{Config, Context, TesseraError};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set while an engine is open in this process.
static ENGINE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Serializes tests that open an engine in this process.
#[cfg(test)]
pub(crate) static TEST_ENGINE_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

/// Holds the process-wide flag during construction. Releases it on drop
/// unless construction succeeded.
struct SingletonGuard {
    armed: bool,
}

impl SingletonGuard {
    fn acquire() -> Result<Self, TesseraError> {
        ENGINE_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TesseraError::SingletonOnly)?;
        Ok(Self { armed: true })
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        if self.armed {
            ENGINE_ACTIVE.store(false, Ordering::Release);
        }
    }
}

/// State of an open engine. Taken out of the lock by `close`, which drops
/// the authority and the storage collaborator and so releases the database.
pub(crate) struct EngineState {
    pub(crate) authority: Authority,
    pub(crate) store: Arc<dyn StorageEngine>,
}

pub(crate) struct EngineInner {
    /// `None` once closed.
    pub(crate) state: RwLock<Option<EngineState>>,
    pub(crate) config: Config,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        // Last handle dropped without `close`.
        if let Some(state) = self.state.get_mut().take() {
            drop(state);
            ENGINE_ACTIVE.store(false, Ordering::Release);
            tracing::info!("engine released without close");
        }
    }
}

/// Handle to an open engine. Clones share the same engine.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Engine")
            .field("data_dir", &self.inner.config.data_dir)
            .field("open", &state.is_some())
            .field("authority", &state.as_ref().map(|s| &s.authority))
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Open (or create) the engine rooted at `config.data_dir`.
    ///
    /// Fails with `SingletonOnly` if another engine is open in this process,
    /// with `EmptyDataDir`/`InvalidConfig` for a bad configuration, and with
    /// `Storage`/`Lease` if the database cannot be initialized. No partial
    /// engine is ever returned.
    pub fn open(config: Config) -> Result<Self, TesseraError> {
        let guard = SingletonGuard::acquire()?;
        let result = Self::build(config, guard);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "engine construction failed");
        }
        result
    }

    /// Open an engine over a caller-provided collaborator and lease store.
    pub fn with_storage<S>(
        config: Config,
        store: Arc<S>,
        lease_store: Box<dyn LeaseStore>,
    ) -> Result<Self, TesseraError>
    where
        S: StorageEngine + Watermark + 'static,
    {
        let guard = SingletonGuard::acquire()?;
        let result = config.validate().and_then(|()| {
            let watermark: Arc<dyn Watermark> = store.clone();
            Self::start(config, store, watermark, lease_store, guard)
        });
        if let Err(e) = &result {
            tracing::warn!(error = %e, "engine construction failed");
        }
        result
    }

    fn build(config: Config, guard: SingletonGuard) -> Result<Self, TesseraError> {
        config.validate()?;
        std::fs::create_dir_all(config.data_dir())
            .map_err(|e| TesseraError::Storage(e.to_string()))?;
        let store = Arc::new(RedbStore::open(config.database_path())?);
        let lease_store = RedbLeaseStore::new(store.database());
        let watermark: Arc<dyn Watermark> = store.clone();
        Self::start(config, store, watermark, Box::new(lease_store), guard)
    }

    fn start(
        config: Config,
        store: Arc<dyn StorageEngine>,
        watermark: Arc<dyn Watermark>,
        lease_store: Box<dyn LeaseStore>,
        guard: SingletonGuard,
    ) -> Result<Self, TesseraError> {
        let (authority, bootstrap) =
            Authority::open(lease_store, watermark, LeaseBlocks::from(&config))?;
        if bootstrap == Bootstrap::Fresh {
            store.apply_initial_schema(DEFAULT_NAMESPACE, SCHEMA_TS)?;
        }
        register_tablets(store.as_ref())?;

        tracing::info!(
            data_dir = %config.data_dir.display(),
            fresh = bootstrap == Bootstrap::Fresh,
            next_uid = authority.uid_bound(),
            read_ts = authority.read_ts(),
            "engine opened"
        );

        guard.disarm();
        Ok(Self {
            inner: Arc::new(EngineInner {
                state: RwLock::new(Some(EngineState { authority, store })),
                config,
            }),
        })
    }

    /// Close the engine and release its storage. Every operation afterwards
    /// fails with `ClosedEngine`, even through handles cloned earlier, and
    /// another engine may be opened on the same directory. Closing twice is a
    /// no-op.
    pub fn close(&self) {
        let mut slot = self.inner.state.write();
        let Some(state) = slot.take() else {
            return;
        };
        debug_assert!(
            ENGINE_ACTIVE.load(Ordering::Acquire),
            "open engine does not hold the process singleton"
        );
        // The database must be released before another open can win the flag.
        drop(state);
        ENGINE_ACTIVE.store(false, Ordering::Release);
        tracing::info!(data_dir = %self.inner.config.data_dir.display(), "engine closed");
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.state.read().is_some()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Drop every namespace's data and schema, then re-bootstrap.
    ///
    /// The authority is recovered in place from the lease record, so counters
    /// continue past every value already leased.
    pub fn drop_all(&self, ctx: &Context) -> Result<(), TesseraError> {
        let mut guard = self.write_open()?;
        let state = &mut *guard;
        let start_ts = state.authority.next_ts()?;
        state.store.apply_mutations(
            ctx,
            Proposal {
                namespace: DEFAULT_NAMESPACE,
                start_ts,
                payload: ProposalPayload::Drop(DropOp::All),
            },
        )?;

        state.authority.recover()?;
        state
            .store
            .apply_initial_schema(DEFAULT_NAMESPACE, SCHEMA_TS)?;
        register_tablets(state.store.as_ref())?;

        tracing::info!(start_ts, read_ts = state.authority.read_ts(), "dropped all data");
        Ok(())
    }

    /// Reserve `count` contiguous UIDs for callers that pre-assign IDs.
    pub fn lease_uids(&self, count: u64) -> Result<AssignedIds, TesseraError> {
        let mut state = self.write_open()?;
        state.authority.next_uids(count)
    }

    /// The timestamp read-only queries are currently stamped with.
    pub fn read_ts(&self) -> Result<u64, TesseraError> {
        Ok(self.read_open()?.authority.read_ts())
    }

    /// Current allocation windows.
    pub fn lease_state(&self) -> Result<LeaseSnapshot, TesseraError> {
        Ok(self.read_open()?.authority.snapshot())
    }

    pub(crate) fn write_open(
        &self,
    ) -> Result<MappedRwLockWriteGuard<'_, EngineState>, TesseraError> {
        RwLockWriteGuard::try_map(self.inner.state.write(), Option::as_mut)
            .map_err(|_| TesseraError::ClosedEngine)
    }

    pub(crate) fn read_open(
        &self,
    ) -> Result<MappedRwLockReadGuard<'_, EngineState>, TesseraError> {
        RwLockReadGuard::try_map(self.inner.state.read(), Option::as_ref)
            .map_err(|_| TesseraError::ClosedEngine)
    }
}

/// Register a tablet for every predicate that has a schema.
fn register_tablets(store: &dyn StorageEngine) -> Result<(), TesseraError> {
    for (namespace, predicate) in store.predicates()? {
        store.init_tablet(namespace, &predicate)?;
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
