//! MVCC sources, datasets, and sinks.
//!
//! A [`StatementSource`] is the per-partition handle from which read views
//! ([`Dataset`]) and write handles ([`Sink`]) are obtained. Sinks stage
//! mutations privately, validate and reserve them at `prepare`, and install
//! them atomically at `flush`, where the snapshot clock advances and the
//! new bounds are published.
//!
//! Neither handle is internally thread-safe; each belongs to one thread.

use crate::cursor::StatementCursor;
use crate::index::StatementKey;
use crate::locks::{StoreCore, TxnGuard};
use crate::snapshot::SnapshotPin;
use crate::statements::{StatementId, StatementRecord, TxId, TxState};
use crate::store::StoreShared;
use basalt_core::{Error, IsolationLevel, Pattern, Result, Statement, TermId};
use rustc_hash::FxHashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

/// The delta a flushed sink installed, if any.
#[derive(Clone, Copy, Debug)]
pub struct CommitSummary {
    pub added: usize,
    pub removed: usize,
    /// The commit version the clock advanced to.
    pub version: u64,
}

/// Per-partition handle producing datasets and sinks.
#[derive(Clone)]
pub struct StatementSource {
    shared: Arc<StoreShared>,
    explicit: bool,
}

impl StatementSource {
    pub(crate) fn new(shared: Arc<StoreShared>, explicit: bool) -> Self {
        Self { shared, explicit }
    }

    /// True if this source serves the explicit (asserted) partition.
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    /// Open a read-only view at the given isolation level.
    pub fn dataset(&self, level: IsolationLevel) -> Result<Dataset> {
        self.shared.check_isolation(level)?;
        Ok(Dataset::open(Arc::clone(&self.shared), self.explicit, level))
    }

    /// Open a write handle at the given isolation level.
    pub fn sink(&self, level: IsolationLevel) -> Result<Sink> {
        self.shared.check_isolation(level)?;
        if !self.shared.writable.load(Ordering::Acquire) {
            return Err(Error::lock_failed(
                "store is read-only: persistence directory lock is held elsewhere",
            ));
        }
        Ok(self.sink_unchecked(level))
    }

    /// Open a sink bypassing the writability check. Used by recovery, which
    /// must replay the data file even when the store degrades to read-only.
    pub(crate) fn sink_unchecked(&self, level: IsolationLevel) -> Sink {
        Sink::open(Arc::clone(&self.shared), self.explicit, level)
    }

    /// Open a dataset bypassing the supported-level check. Used by the
    /// persistence engine, whose snapshot view does not depend on the
    /// levels offered to callers.
    pub(crate) fn dataset_unchecked(&self, level: IsolationLevel) -> Dataset {
        Dataset::open(Arc::clone(&self.shared), self.explicit, level)
    }
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// A read-only view of one partition.
///
/// Snapshot levels pin the version current at open; `READ_COMMITTED`
/// additionally holds a read lock for the dataset's duration; `NONE`
/// observes the latest committed state at each scan and holds nothing
/// between scans.
pub struct Dataset {
    shared: Arc<StoreShared>,
    explicit: bool,
    level: IsolationLevel,
    pin: Option<SnapshotPin>,
    guard: Option<crate::locks::CoreReadGuard>,
    closed: bool,
}

impl Dataset {
    fn open(shared: Arc<StoreShared>, explicit: bool, level: IsolationLevel) -> Self {
        let pin = level
            .pins_snapshot()
            .then(|| SnapshotPin::acquire(&shared.clock));
        let guard = level.holds_read_lock().then(|| shared.locks.read());
        Self {
            shared,
            explicit,
            level,
            pin,
            guard,
            closed: false,
        }
    }

    /// The isolation level this view was opened at.
    pub fn isolation(&self) -> IsolationLevel {
        self.level
    }

    /// The snapshot this view reads at. Unpinned levels re-read the clock.
    pub fn snapshot(&self) -> u64 {
        match &self.pin {
            Some(pin) => pin.version(),
            None => self.shared.clock.current(),
        }
    }

    /// Lazily scan statements matching `pattern`.
    ///
    /// The returned cursor owns its own read guard and stays valid after
    /// the dataset closes.
    pub fn scan(&self, pattern: Pattern) -> Result<StatementCursor> {
        self.check_open()?;
        Ok(StatementCursor::open(
            &self.shared.locks,
            pattern,
            Some(self.explicit),
            self.snapshot(),
            None,
        ))
    }

    /// True if a statement matching the fully bound pattern exists.
    pub fn contains(
        &self,
        s: TermId,
        p: TermId,
        o: TermId,
        c: Option<TermId>,
    ) -> Result<bool> {
        let mut pattern = Pattern::any().with_subject(s).with_predicate(p).with_object(o);
        pattern = match c {
            Some(c) => pattern.in_context(c),
            None => pattern.in_default_context(),
        };
        Ok(self.scan(pattern)?.next().is_some())
    }

    /// The distinct named contexts of visible statements, ascending by
    /// identity.
    pub fn contexts(&self) -> Result<Vec<TermId>> {
        let mut seen = rustc_hash::FxHashSet::default();
        for st in self.scan(Pattern::any())? {
            if let Some(c) = st.context {
                seen.insert(c);
            }
        }
        let mut out: Vec<TermId> = seen.into_iter().collect();
        out.sort_unstable();
        Ok(out)
    }

    /// Count of visible statements.
    pub fn size(&self) -> Result<usize> {
        Ok(self.scan(Pattern::any())?.count())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_state("dataset is closed"));
        }
        Ok(())
    }

    /// Release the pinned snapshot and any held lock. Idempotent.
    pub fn close(&mut self) {
        self.guard = None;
        self.pin = None;
        self.closed = true;
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SinkState {
    Open,
    Staged,
    Prepared,
    Flushed,
    /// Prepare failed; only `close` is legal.
    Aborted,
    Closed,
}

/// A write handle for one partition.
///
/// Lifecycle: `open → staged → prepared → flushed → closed`, with `close`
/// legal from any state (closing before flush discards the buffer). Illegal
/// transitions fail with `InvalidState`.
///
/// Staging is a per-key net effect: the last `add`/`remove` of a key wins,
/// so an add followed by a remove of the same statement collapses to a
/// no-op against an empty store.
pub struct Sink {
    shared: Arc<StoreShared>,
    explicit: bool,
    level: IsolationLevel,
    tx_id: TxId,
    /// Base snapshot, registered with the clock so compaction cannot
    /// reclaim records this sink may still need to validate against.
    base: Option<SnapshotPin>,
    state: SinkState,
    /// Net staged effect per key: true = ensure present, false = ensure
    /// absent.
    staged: FxHashMap<StatementKey, bool>,
    /// Keys in first-staged order, for deterministic installation.
    staged_order: Vec<StatementKey>,
    prepared_adds: Vec<(StatementKey, StatementId)>,
    prepared_removes: Vec<(StatementKey, StatementId)>,
    txn_guard: Option<TxnGuard>,
}

impl Sink {
    fn open(shared: Arc<StoreShared>, explicit: bool, level: IsolationLevel) -> Self {
        let tx_id = shared.next_tx.fetch_add(1, Ordering::Relaxed);
        let base = SnapshotPin::acquire(&shared.clock);
        Self {
            shared,
            explicit,
            level,
            tx_id,
            base: Some(base),
            state: SinkState::Open,
            staged: FxHashMap::default(),
            staged_order: Vec::new(),
            prepared_adds: Vec::new(),
            prepared_removes: Vec::new(),
            txn_guard: None,
        }
    }

    /// The isolation level this sink was opened at.
    pub fn isolation(&self) -> IsolationLevel {
        self.level
    }

    /// The snapshot this sink validates against.
    pub fn base_snapshot(&self) -> u64 {
        self.base.as_ref().map(SnapshotPin::version).unwrap_or(0)
    }

    /// True if a mutation has been staged and not yet flushed or discarded.
    pub fn is_dirty(&self) -> bool {
        matches!(self.state, SinkState::Staged | SinkState::Prepared)
    }

    fn key(&self, s: TermId, p: TermId, o: TermId, c: Option<TermId>) -> StatementKey {
        StatementKey {
            s,
            p,
            o,
            c,
            explicit: self.explicit,
        }
    }

    fn check_mutable(&self) -> Result<()> {
        match self.state {
            SinkState::Open | SinkState::Staged => Ok(()),
            state => Err(Error::invalid_state(format!(
                "cannot stage mutations on a {state:?} sink"
            ))),
        }
    }

    fn stage(&mut self, key: StatementKey, present: bool) -> Result<()> {
        self.check_mutable()?;
        if self.staged.insert(key, present).is_none() {
            self.staged_order.push(key);
        }
        self.state = SinkState::Staged;
        Ok(())
    }

    /// Stage an addition.
    pub fn add(&mut self, s: TermId, p: TermId, o: TermId, c: Option<TermId>) -> Result<()> {
        self.stage(self.key(s, p, o, c), true)
    }

    /// Stage a removal.
    pub fn remove(&mut self, s: TermId, p: TermId, o: TermId, c: Option<TermId>) -> Result<()> {
        self.stage(self.key(s, p, o, c), false)
    }

    /// Stage removal of every live statement in this partition matching
    /// `pattern`. Returns the number of statements staged.
    pub fn deprecate_by_pattern(&mut self, pattern: &Pattern) -> Result<usize> {
        self.check_mutable()?;
        let keys: Vec<StatementKey> = {
            let guard = self.shared.locks.read();
            guard
                .statements
                .iter()
                .filter(|(_, rec)| {
                    rec.explicit == self.explicit
                        && rec.is_live_committed()
                        && pattern.matches(&rec.to_statement())
                })
                .map(|(_, rec)| StatementKey::of(rec))
                .collect()
        };
        let count = keys.len();
        for key in keys {
            self.stage(key, false)?;
        }
        Ok(count)
    }

    /// Stage removal of every live statement in the given contexts (`None`
    /// entries mean the default graph). An empty slice clears all contexts.
    pub fn clear(&mut self, contexts: &[Option<TermId>]) -> Result<usize> {
        if contexts.is_empty() {
            return self.deprecate_by_pattern(&Pattern::any());
        }
        let mut total = 0;
        for c in contexts {
            let pattern = match c {
                Some(c) => Pattern::any().in_context(*c),
                None => Pattern::any().in_default_context(),
            };
            total += self.deprecate_by_pattern(&pattern)?;
        }
        Ok(total)
    }

    /// Validate the staged buffer against the current store state and
    /// reserve every affected record.
    ///
    /// Duplicate adds collapse to no-ops; a key already reserved by another
    /// prepared transaction merges to a no-op. Under `SERIALIZABLE`, any
    /// committed change to a staged key after this sink's base snapshot
    /// fails with `ConcurrentModification`, and the sink must be closed.
    pub fn prepare(&mut self) -> Result<()> {
        match self.state {
            SinkState::Open | SinkState::Staged => {}
            state => {
                return Err(Error::invalid_state(format!(
                    "cannot prepare a {state:?} sink"
                )))
            }
        }

        if self.level.is_serializable() {
            // Serializable writers queue here and hold the lock to close.
            self.txn_guard = Some(self.shared.locks.txn_lock());
        }

        let mut guard = self.shared.locks.write();
        let core = &mut *guard;

        if self.level.is_serializable() {
            if let Err(e) = self.validate_serializable(core) {
                drop(guard);
                self.txn_guard = None;
                self.state = SinkState::Aborted;
                return Err(e);
            }
        }

        if let Err(e) = self.reserve(core) {
            Self::revert(
                core,
                &self.prepared_adds,
                &self.prepared_removes,
                self.tx_id,
            );
            self.prepared_adds.clear();
            self.prepared_removes.clear();
            drop(guard);
            self.txn_guard = None;
            self.state = SinkState::Aborted;
            return Err(e);
        }

        core.prepared_txns += 1;
        self.state = SinkState::Prepared;
        Ok(())
    }

    fn validate_serializable(&self, core: &StoreCore) -> Result<()> {
        let base = self.base_snapshot();
        for key in &self.staged_order {
            if core.index.pending_get(key).is_some() {
                return Err(Error::conflict(
                    "statement is reserved by a concurrent transaction",
                ));
            }
            if let Some(changed_at) = core.index.latest_change(&core.statements, key) {
                if changed_at > base {
                    return Err(Error::conflict(format!(
                        "statement changed at version {changed_at}, after base snapshot {base}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn reserve(&mut self, core: &mut StoreCore) -> Result<()> {
        for key in &self.staged_order {
            let present = self.staged[key];
            if present {
                if core.index.pending_get(key).is_some() {
                    // A concurrent preparer staged the same add first; merge
                    // ours into a no-op.
                    continue;
                }
                if let Some(id) = core.index.live_get(key) {
                    if core.statements.get(id).is_live_committed() {
                        continue; // duplicate of a live statement
                    }
                }
                let rec = StatementRecord::pending(
                    key.s,
                    key.p,
                    key.o,
                    key.c,
                    key.explicit,
                    self.tx_id,
                );
                let id = core.statements.append(rec)?;
                core.index.insert_pending(*key, id);
                self.prepared_adds.push((*key, id));
            } else if let Some(id) = core.index.live_get(key) {
                let rec = core.statements.get_mut(id);
                if rec.tx == TxState::Committed {
                    rec.tx = TxState::PendingRemove(self.tx_id);
                    self.prepared_removes.push((*key, id));
                }
                // Already reserved for removal: idempotent no-op.
            }
            // Removing an absent statement: no-op.
        }
        Ok(())
    }

    /// Atomically install the prepared changes: advance the clock, publish
    /// validity bounds, link new records into the posting lists.
    ///
    /// Returns `None` when the whole buffer collapsed to a no-op (the clock
    /// does not advance for an empty delta).
    pub fn flush(&mut self) -> Result<Option<CommitSummary>> {
        if self.state != SinkState::Prepared {
            return Err(Error::invalid_state(format!(
                "cannot flush a {:?} sink",
                self.state
            )));
        }

        let mut guard = self.shared.locks.write();
        let core = &mut *guard;
        core.prepared_txns -= 1;

        if self.prepared_adds.is_empty() && self.prepared_removes.is_empty() {
            self.state = SinkState::Flushed;
            return Ok(None);
        }

        let version = self.shared.clock.advance();

        for (key, id) in &self.prepared_adds {
            {
                let rec = core.statements.get_mut(*id);
                rec.added_at = version;
                rec.tx = TxState::Committed;
            }
            core.index.promote(*key, *id);
            let rec = core.statements.get(*id);
            core.index.link(rec, *id);
        }

        for (key, id) in &self.prepared_removes {
            let reserved = core.statements.get(*id).tx == TxState::PendingRemove(self.tx_id);
            if reserved {
                core.statements.get_mut(*id).tx = TxState::Committed;
                core.statements.mark_removed(*id, version);
                core.index.remove_live_if(key, *id);
                core.reclaimable += 1;
            }
        }

        self.shared.contents_changed.store(true, Ordering::Release);
        self.state = SinkState::Flushed;

        let summary = CommitSummary {
            added: self.prepared_adds.len(),
            removed: self.prepared_removes.len(),
            version,
        };
        debug!(
            added = summary.added,
            removed = summary.removed,
            version = summary.version,
            explicit = self.explicit,
            "sink flushed"
        );
        Ok(Some(summary))
    }

    /// True if this sink stages the key as removed (connection read
    /// overlay).
    pub(crate) fn stages_absent(&self, key: &StatementKey) -> bool {
        self.staged.get(key) == Some(&false)
    }

    /// The keys this sink stages as present, in staging order (connection
    /// read overlay).
    pub(crate) fn staged_present(
        &self,
    ) -> impl Iterator<Item = (StatementKey, Statement)> + '_ {
        self.staged_order
            .iter()
            .filter(|k| self.staged[*k])
            .map(|k| (*k, Statement::new(k.s, k.p, k.o, k.c)))
    }

    fn revert(
        core: &mut StoreCore,
        adds: &[(StatementKey, StatementId)],
        removes: &[(StatementKey, StatementId)],
        tx_id: TxId,
    ) {
        for (key, id) in adds {
            let rec = core.statements.get_mut(*id);
            if rec.tx == TxState::PendingAdd(tx_id) {
                rec.tx = TxState::Aborted;
                core.reclaimable += 1;
            }
            core.index.remove_pending(key);
        }
        for (_, id) in removes {
            let rec = core.statements.get_mut(*id);
            if rec.tx == TxState::PendingRemove(tx_id) {
                rec.tx = TxState::Committed;
            }
        }
    }

    /// Close the sink: release locks and the base snapshot. Closing before
    /// flush discards the staged buffer and reverts any reservations.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.state == SinkState::Closed {
            return;
        }
        if self.state == SinkState::Prepared {
            let mut guard = self.shared.locks.write();
            let core = &mut *guard;
            Self::revert(
                core,
                &self.prepared_adds,
                &self.prepared_removes,
                self.tx_id,
            );
            core.prepared_txns -= 1;
        }
        self.staged.clear();
        self.staged_order.clear();
        self.prepared_adds.clear();
        self.prepared_removes.clear();
        self.txn_guard = None;
        self.base = None;
        self.state = SinkState::Closed;
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.close();
    }
}
