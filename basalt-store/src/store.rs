//! The store facade: lifecycle, persistence wiring, and change events.
//!
//! [`MemoryGraphStore`] keeps all statements in memory and, when configured
//! with a data directory, uses a binary file as a durability log. Commits
//! mark the contents changed and either write through (`sync_delay_ms ==
//! 0`), re-arm a deferred sync (`> 0`), or leave durability to shutdown
//! (`< 0`). An advisory directory lock keeps two processes from sharing one
//! data directory; when an existing store's lock is held elsewhere, this
//! store opens read-only instead of failing.

use crate::config::StoreConfig;
use crate::connection::Connection;
use crate::cursor::{queue_cursor, QueueCursor, StatementCursor};
use crate::locks::{DirectoryLock, LockManager, StoreCore};
use crate::persist::scheduler::SyncScheduler;
use crate::persist::{fileio, DATA_FILE_NAME, SYNC_FILE_NAME};
use crate::snapshot::{SnapshotClock, SnapshotPin};
use crate::source::StatementSource;
use crate::terms::TermRegistry;
use basalt_core::{Error, IsolationLevel, Pattern, Result, Statement, Term, TermId, TermSpec};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Reclaimable-record count that triggers compaction after a removing
/// commit.
const AUTO_COMPACT_THRESHOLD: usize = 1024;

/// Emitted after every commit with a non-empty delta.
#[derive(Clone, Copy, Debug)]
pub struct ChangeEvent {
    pub added: usize,
    pub removed: usize,
    /// The snapshot version the commit advanced the clock to.
    pub version: u64,
}

type ChangeListener = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

struct IsolationPolicy {
    supported: Vec<IsolationLevel>,
    default: IsolationLevel,
}

/// State shared between the facade and every source, sink, dataset, and
/// connection.
pub(crate) struct StoreShared {
    pub locks: LockManager,
    pub terms: TermRegistry,
    pub clock: Arc<SnapshotClock>,
    pub next_tx: AtomicU64,
    pub contents_changed: AtomicBool,
    pub writable: AtomicBool,
    pub shutting_down: AtomicBool,
    isolation: RwLock<IsolationPolicy>,
}

impl StoreShared {
    fn new() -> Self {
        Self {
            locks: LockManager::new(StoreCore::new()),
            terms: TermRegistry::new(),
            clock: Arc::new(SnapshotClock::new()),
            next_tx: AtomicU64::new(1),
            contents_changed: AtomicBool::new(false),
            writable: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
            isolation: RwLock::new(IsolationPolicy {
                supported: IsolationLevel::ALL.to_vec(),
                default: IsolationLevel::SnapshotRead,
            }),
        }
    }

    pub fn check_isolation(&self, level: IsolationLevel) -> Result<()> {
        let policy = self.isolation.read();
        if policy.supported.contains(&level) {
            Ok(())
        } else {
            Err(Error::invalid_config(format!(
                "isolation level {level} is not enabled on this store"
            )))
        }
    }

    pub fn default_isolation(&self) -> IsolationLevel {
        self.isolation.read().default
    }

    fn set_isolation_policy(&self, supported: Vec<IsolationLevel>, default: IsolationLevel) {
        let mut policy = self.isolation.write();
        policy.supported = supported;
        policy.default = default;
    }
}

struct Lifecycle {
    initialised: bool,
    shut_down: bool,
}

pub(crate) struct StoreInner {
    config: Mutex<StoreConfig>,
    lifecycle: Mutex<Lifecycle>,
    pub(crate) shared: Arc<StoreShared>,
    /// `(data_file, sync_file)` when persistent.
    paths: Mutex<Option<(PathBuf, PathBuf)>>,
    dir_lock: Mutex<Option<DirectoryLock>>,
    listeners: Mutex<Vec<ChangeListener>>,
    /// Serialises concurrent `sync` calls.
    sync_gate: Mutex<()>,
    scheduler: Mutex<Option<SyncScheduler>>,
}

impl StoreInner {
    pub(crate) fn explicit_source(&self) -> StatementSource {
        StatementSource::new(Arc::clone(&self.shared), true)
    }

    pub(crate) fn inferred_source(&self) -> StatementSource {
        StatementSource::new(Arc::clone(&self.shared), false)
    }

    /// Post-commit duties: emit the change event, then hand durability to
    /// the persistence engine per the sync-delay policy. A write-through
    /// failure propagates to the committing caller; deferred failures are
    /// the scheduler's to log.
    pub(crate) fn after_commit(&self, added: usize, removed: usize, version: u64) -> Result<()> {
        let event = ChangeEvent {
            added,
            removed,
            version,
        };
        for listener in self.listeners.lock().iter() {
            listener(&event);
        }

        if removed > 0 {
            let reclaimable = self.shared.locks.read().reclaimable;
            if reclaimable >= AUTO_COMPACT_THRESHOLD {
                self.compact_now();
            }
        }

        let (persist, delay) = {
            let config = self.config.lock();
            (config.persist, config.sync_delay_ms)
        };
        if !persist || !self.shared.writable.load(Ordering::Acquire) {
            return Ok(());
        }
        if delay == 0 {
            self.sync()
        } else if delay > 0 {
            if let Some(scheduler) = self.scheduler.lock().as_ref() {
                scheduler.schedule_in(Duration::from_millis(delay as u64));
            }
            Ok(())
        } else {
            // Negative delay: durability deferred to shutdown.
            Ok(())
        }
    }

    /// Write the current contents to disk if they changed since the last
    /// sync. Serialised against concurrent syncs; commits are never blocked
    /// by an in-progress write beyond this gate.
    fn sync(&self) -> Result<()> {
        let _gate = self.sync_gate.lock();
        let Some((data_path, sync_path)) = self.paths.lock().clone() else {
            return Ok(());
        };
        if !self.shared.contents_changed.load(Ordering::Acquire) {
            return Ok(());
        }

        debug!("syncing store contents to file");
        let explicit = self
            .explicit_source()
            .dataset_unchecked(IsolationLevel::Snapshot);
        let inferred = self
            .inferred_source()
            .dataset_unchecked(IsolationLevel::Snapshot);
        fileio::write_snapshot(
            &sync_path,
            &data_path,
            &self.shared.terms,
            &explicit,
            &inferred,
        )?;
        self.shared.contents_changed.store(false, Ordering::Release);
        Ok(())
    }

    /// Physically reclaim records invisible to every live reader. Skipped
    /// while prepared transactions hold record reservations.
    fn compact_now(&self) -> usize {
        let mut guard = self.shared.locks.write();
        let core = &mut *guard;
        if core.prepared_txns > 0 {
            return 0;
        }
        let min_live = self.shared.clock.min_live();
        let result = core.statements.compact(min_live);
        if result.dropped > 0 {
            core.index.apply_remap(&result.remap);
            core.reclaimable = core.reclaimable.saturating_sub(result.dropped);
            debug!(dropped = result.dropped, min_live, "compacted statement arena");
        }
        result.dropped
    }
}

/// An in-memory, optionally file-persistent quad store.
///
/// # Example
///
/// ```
/// use basalt_store::MemoryGraphStore;
///
/// let store = MemoryGraphStore::new();
/// store.init()?;
///
/// let s = store.intern_iri("http://example.org/alice")?;
/// let p = store.intern_iri("http://example.org/knows")?;
/// let o = store.intern_iri("http://example.org/bob")?;
///
/// let mut conn = store.connection()?;
/// conn.add(s, p, o, None)?;
///
/// assert_eq!(store.size(false)?, 1);
/// store.shutdown()?;
/// # Ok::<(), basalt_core::Error>(())
/// ```
pub struct MemoryGraphStore {
    inner: Arc<StoreInner>,
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraphStore {
    /// A memory-only store with default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// A store with the given configuration (validated at `init`).
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config: Mutex::new(config),
                lifecycle: Mutex::new(Lifecycle {
                    initialised: false,
                    shut_down: false,
                }),
                shared: Arc::new(StoreShared::new()),
                paths: Mutex::new(None),
                dir_lock: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                sync_gate: Mutex::new(()),
                scheduler: Mutex::new(None),
            }),
        }
    }

    /// A persistent store rooted at `data_dir`, restored at `init` if the
    /// directory already contains one.
    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(StoreConfig::persistent(data_dir))
    }

    // -- configuration (pre-init only) -------------------------------------

    fn check_not_initialised(&self) -> Result<()> {
        if self.inner.lifecycle.lock().initialised {
            return Err(Error::AlreadyInitialised);
        }
        Ok(())
    }

    /// Enable or disable persistence.
    pub fn set_persist(&self, persist: bool) -> Result<()> {
        self.check_not_initialised()?;
        self.inner.config.lock().persist = persist;
        Ok(())
    }

    /// Set the persistence directory.
    pub fn set_data_dir(&self, data_dir: impl Into<PathBuf>) -> Result<()> {
        self.check_not_initialised()?;
        self.inner.config.lock().data_dir = Some(data_dir.into());
        Ok(())
    }

    /// Set the sync delay (see [`StoreConfig::sync_delay_ms`]).
    pub fn set_sync_delay_ms(&self, delay: i64) -> Result<()> {
        self.check_not_initialised()?;
        self.inner.config.lock().sync_delay_ms = delay;
        Ok(())
    }

    /// Restrict the isolation levels offered to callers.
    pub fn set_supported_isolation_levels(&self, levels: Vec<IsolationLevel>) -> Result<()> {
        self.check_not_initialised()?;
        self.inner.config.lock().supported_isolation_levels = levels;
        Ok(())
    }

    /// Set the isolation level used when callers do not specify one.
    pub fn set_default_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.check_not_initialised()?;
        self.inner.config.lock().default_isolation = level;
        Ok(())
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> StoreConfig {
        self.inner.config.lock().clone()
    }

    /// The iteration cache hint for external evaluators.
    pub fn iteration_cache_threshold(&self) -> usize {
        self.inner.config.lock().iteration_cache_threshold
    }

    // -- lifecycle ---------------------------------------------------------

    /// Initialise the store. With persistence enabled, restores an existing
    /// data file (degrading to read-only if another process holds the
    /// directory lock) or creates a fresh one.
    pub fn init(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.shut_down {
            return Err(Error::invalid_state("store has been shut down"));
        }
        if lifecycle.initialised {
            return Err(Error::AlreadyInitialised);
        }

        debug!("initialising store");
        let config = self.inner.config.lock().clone();
        config.validate()?;
        self.inner.shared.set_isolation_policy(
            config.supported_isolation_levels.clone(),
            config.default_isolation,
        );

        if config.persist {
            let data_dir = config.data_dir.as_ref().expect("validated");
            if let Err(e) = self.init_persistent(data_dir, config.sync_delay_ms) {
                // Leave the store uninitialised and re-openable.
                *self.inner.dir_lock.lock() = None;
                *self.inner.paths.lock() = None;
                *self.inner.scheduler.lock() = None;
                self.inner.shared.writable.store(true, Ordering::Release);
                error!(error = %e, "store initialisation failed");
                return Err(e);
            }
        }

        self.inner
            .shared
            .contents_changed
            .store(false, Ordering::Release);
        lifecycle.initialised = true;
        debug!("store initialised");
        Ok(())
    }

    fn init_persistent(&self, data_dir: &Path, sync_delay_ms: i64) -> Result<()> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::io(format!("creating data directory {}", data_dir.display()), e))?;
        let data_path = data_dir.join(DATA_FILE_NAME);
        let sync_path = data_dir.join(SYNC_FILE_NAME);
        *self.inner.paths.lock() = Some((data_path.clone(), sync_path.clone()));

        if data_path.exists() {
            // Take the lock for later writing if we can; an existing store
            // stays readable either way.
            match DirectoryLock::try_acquire(data_dir)? {
                Some(lock) => {
                    *self.inner.dir_lock.lock() = Some(lock);
                }
                None => {
                    warn!(dir = %data_dir.display(), "failed to lock directory; store is read-only");
                    self.inner.shared.writable.store(false, Ordering::Release);
                }
            }

            let len = std::fs::metadata(&data_path)
                .map(|m| m.len())
                .map_err(|e| {
                    Error::io(format!("reading metadata of {}", data_path.display()), e)
                })?;
            if len == 0 {
                // An empty file holds no data and no header; treat as new.
                warn!(path = %data_path.display(), "ignoring empty data file");
            } else {
                debug!(path = %data_path.display(), "restoring store contents");
                self.restore(&data_path)?;
            }
        } else {
            // A fresh persistent store must own its directory.
            let lock = DirectoryLock::acquire(data_dir)?;
            *self.inner.dir_lock.lock() = Some(lock);

            debug!(path = %data_path.display(), "initialising data file");
            let explicit = self
                .inner
                .explicit_source()
                .dataset_unchecked(IsolationLevel::Snapshot);
            let inferred = self
                .inner
                .inferred_source()
                .dataset_unchecked(IsolationLevel::Snapshot);
            fileio::write_snapshot(
                &sync_path,
                &data_path,
                &self.inner.shared.terms,
                &explicit,
                &inferred,
            )?;
        }

        if sync_delay_ms > 0 {
            let weak = Arc::downgrade(&self.inner);
            let scheduler = SyncScheduler::start(Box::new(move || {
                let Some(inner) = weak.upgrade() else { return };
                if let Err(e) = inner.sync() {
                    // Timed durability is best-effort: the next commit
                    // re-arms the schedule and retries.
                    warn!(error = %e, "deferred sync failed; retrying on next commit");
                }
            }));
            *self.inner.scheduler.lock() = Some(scheduler);
        }

        Ok(())
    }

    fn restore(&self, data_path: &Path) -> Result<()> {
        let mut explicit = self
            .inner
            .explicit_source()
            .sink_unchecked(IsolationLevel::None);
        let mut inferred = self
            .inner
            .inferred_source()
            .sink_unchecked(IsolationLevel::None);

        let replayed = fileio::read_snapshot(
            data_path,
            &self.inner.shared.terms,
            &mut explicit,
            &mut inferred,
        );
        match replayed {
            Ok(stats) => {
                explicit.prepare()?;
                explicit.flush()?;
                explicit.close();
                inferred.prepare()?;
                inferred.flush()?;
                inferred.close();
                debug!(
                    terms = stats.terms,
                    statements = stats.statements,
                    "store contents restored"
                );
                Ok(())
            }
            Err(e) => {
                explicit.close();
                inferred.close();
                Err(e)
            }
        }
    }

    fn require_init(&self) -> Result<()> {
        let lifecycle = self.inner.lifecycle.lock();
        if !lifecycle.initialised {
            return Err(Error::NotInitialised);
        }
        Ok(())
    }

    /// True if the store accepts writes. A persistent store whose
    /// directory lock is held by another process is read-only.
    pub fn writable(&self) -> bool {
        self.inner.shared.writable.load(Ordering::Acquire)
    }

    /// Shut down: stop the sync worker, write pending changes (regardless
    /// of the sync-delay policy), and release the directory lock.
    /// Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if !lifecycle.initialised {
            lifecycle.shut_down = true;
            return Ok(());
        }
        debug!("shutting down store");
        self.inner.shared.shutting_down.store(true, Ordering::Release);

        if let Some(mut scheduler) = self.inner.scheduler.lock().take() {
            scheduler.stop();
        }

        let sync_result = self.inner.sync();
        *self.inner.dir_lock.lock() = None;
        lifecycle.initialised = false;
        lifecycle.shut_down = true;
        debug!("store shut down");
        sync_result
    }

    // -- terms -------------------------------------------------------------

    /// Intern an IRI given as a total string.
    pub fn intern_iri(&self, iri: &str) -> Result<TermId> {
        self.require_init()?;
        self.inner.shared.terms.intern_iri(iri)
    }

    /// Intern an IRI given as namespace and local part.
    pub fn intern_iri_parts(&self, namespace: &str, local: &str) -> Result<TermId> {
        self.require_init()?;
        self.inner.shared.terms.intern_iri_parts(namespace, local)
    }

    /// Intern a blank node by label.
    pub fn intern_blank(&self, label: &str) -> Result<TermId> {
        self.require_init()?;
        self.inner.shared.terms.intern_blank(label)
    }

    /// Intern a blank node with a generated, unused label.
    pub fn fresh_blank(&self) -> Result<TermId> {
        self.require_init()?;
        Ok(self.inner.shared.terms.fresh_blank())
    }

    /// Intern a literal.
    pub fn intern_literal(
        &self,
        lexical: &str,
        lang: Option<&str>,
        datatype: Option<TermId>,
    ) -> Result<TermId> {
        self.require_init()?;
        self.inner.shared.terms.intern_literal(lexical, lang, datatype)
    }

    /// Non-creating term lookup.
    pub fn lookup(&self, spec: TermSpec<'_>) -> Result<Option<TermId>> {
        self.require_init()?;
        Ok(self.inner.shared.terms.lookup(spec))
    }

    /// Resolve an identity to its term.
    pub fn term(&self, id: TermId) -> Result<Option<Term>> {
        self.require_init()?;
        Ok(self.inner.shared.terms.term(id))
    }

    // -- data access -------------------------------------------------------

    /// The explicit (asserted) partition's source.
    pub fn explicit_source(&self) -> Result<StatementSource> {
        self.require_init()?;
        Ok(self.inner.explicit_source())
    }

    /// The inferred partition's source.
    pub fn inferred_source(&self) -> Result<StatementSource> {
        self.require_init()?;
        Ok(self.inner.inferred_source())
    }

    /// Open a connection.
    pub fn connection(&self) -> Result<Connection> {
        self.require_init()?;
        Ok(Connection::new(Arc::clone(&self.inner)))
    }

    /// Lazily scan statements at the current snapshot. The cursor pins the
    /// snapshot and holds a read lock until closed or exhausted.
    pub fn scan(&self, pattern: Pattern, include_inferred: bool) -> Result<StatementCursor> {
        self.require_init()?;
        let shared = &self.inner.shared;
        let pin = SnapshotPin::acquire(&shared.clock);
        let snapshot = pin.version();
        let explicit = if include_inferred { None } else { Some(true) };
        Ok(StatementCursor::open(
            &shared.locks,
            pattern,
            explicit,
            snapshot,
            Some(pin),
        ))
    }

    /// Scan on a background thread, handing results through a bounded
    /// queue. The scanning thread owns the read lock and the snapshot pin,
    /// so the consumer controls how long they are held: closing the
    /// returned cursor stops the producer and releases both.
    pub fn background_scan(
        &self,
        pattern: Pattern,
        include_inferred: bool,
        capacity: usize,
    ) -> Result<QueueCursor<Statement>> {
        self.require_init()?;
        let (feeder, cursor) = queue_cursor(capacity);
        let shared = Arc::clone(&self.inner.shared);
        std::thread::Builder::new()
            .name("basalt-scan".into())
            .spawn(move || {
                let pin = SnapshotPin::acquire(&shared.clock);
                let snapshot = pin.version();
                let explicit = if include_inferred { None } else { Some(true) };
                let scan =
                    StatementCursor::open(&shared.locks, pattern, explicit, snapshot, Some(pin));
                for st in scan {
                    if shared.shutting_down.load(Ordering::Acquire) {
                        feeder.toss(Error::interrupted("store is shutting down"));
                        return;
                    }
                    if !feeder.put(st) {
                        return;
                    }
                }
            })
            .map_err(|e| Error::io("spawning background scan thread", e))?;
        Ok(cursor)
    }

    /// Count of statements visible at the current snapshot.
    pub fn size(&self, include_inferred: bool) -> Result<usize> {
        Ok(self.scan(Pattern::any(), include_inferred)?.count())
    }

    /// The latest committed snapshot version.
    pub fn current_version(&self) -> Result<u64> {
        self.require_init()?;
        Ok(self.inner.shared.clock.current())
    }

    // -- maintenance -------------------------------------------------------

    /// Register a change listener, called after every commit with a
    /// non-empty delta.
    pub fn on_change(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) {
        self.inner.listeners.lock().push(Box::new(listener));
    }

    /// Write pending changes to disk now. No-op for memory-only stores and
    /// when nothing changed since the last sync.
    pub fn sync(&self) -> Result<()> {
        self.require_init()?;
        self.inner.sync()
    }

    /// Physically reclaim removed records invisible to every live reader.
    /// Returns the number of records dropped.
    pub fn compact(&self) -> Result<usize> {
        self.require_init()?;
        Ok(self.inner.compact_now())
    }
}
