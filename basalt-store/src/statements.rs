//! Statement arena: append-mostly records with snapshot validity bounds.
//!
//! Records are addressed by [`StatementId`], a dense `u32` index. Indices
//! are stable between compactions; compaction rewrites the arena in place
//! (preserving relative order) and hands the caller a remap table so the
//! cross-index can follow.

use basalt_core::{Error, Result, Statement, TermId};

/// Index into the statement arena — u32 limits to ~4B statements.
pub(crate) type StatementId = u32;

/// Maximum id before overflow.
pub(crate) const MAX_STATEMENT_ID: u32 = u32::MAX - 1;

/// Transaction identity, allocated per sink.
pub(crate) type TxId = u64;

/// Transient transaction tag on a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TxState {
    /// Committed; visibility is governed by the snapshot bounds alone.
    Committed,
    /// Appended by a prepared, not yet flushed transaction. Invisible.
    PendingAdd(TxId),
    /// Committed and reserved for removal by a prepared transaction.
    /// Still visible until that transaction flushes.
    PendingRemove(TxId),
    /// A rolled-back pending add. Invisible at every snapshot; reclaimed
    /// unconditionally by compaction.
    Aborted,
}

/// A statement record: the term 4-tuple plus MVCC bookkeeping.
#[derive(Clone, Debug)]
pub(crate) struct StatementRecord {
    pub s: TermId,
    pub p: TermId,
    pub o: TermId,
    pub c: Option<TermId>,
    /// Asserted (true) vs inferred (false) partition.
    pub explicit: bool,
    /// Snapshot at which the record became visible; 0 = not yet flushed.
    pub added_at: u64,
    /// Snapshot at which the record ceased to be visible; 0 = still live.
    pub removed_at: u64,
    pub tx: TxState,
}

impl StatementRecord {
    /// A fresh pending record staged by `tx_id`.
    pub fn pending(
        s: TermId,
        p: TermId,
        o: TermId,
        c: Option<TermId>,
        explicit: bool,
        tx_id: TxId,
    ) -> Self {
        Self {
            s,
            p,
            o,
            c,
            explicit,
            added_at: 0,
            removed_at: 0,
            tx: TxState::PendingAdd(tx_id),
        }
    }

    /// True if a reader at snapshot `v` observes this record.
    #[inline]
    pub fn visible_at(&self, v: u64) -> bool {
        !matches!(self.tx, TxState::PendingAdd(_) | TxState::Aborted)
            && self.added_at != 0
            && self.added_at <= v
            && (self.removed_at == 0 || v < self.removed_at)
    }

    /// True if committed (possibly reserved for removal) and not yet
    /// logically removed.
    #[inline]
    pub fn is_live_committed(&self) -> bool {
        matches!(self.tx, TxState::Committed | TxState::PendingRemove(_))
            && self.added_at != 0
            && self.removed_at == 0
    }

    /// The value-level statement.
    #[inline]
    pub fn to_statement(&self) -> Statement {
        Statement::new(self.s, self.p, self.o, self.c)
    }
}

/// Result of a compaction pass.
pub(crate) struct CompactResult {
    /// Old id → new id; `None` for dropped records.
    pub remap: Vec<Option<StatementId>>,
    /// Number of records physically dropped.
    pub dropped: usize,
}

/// Append-mostly ordered list of statement records.
pub(crate) struct StatementList {
    records: Vec<StatementRecord>,
}

impl StatementList {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn get(&self, id: StatementId) -> &StatementRecord {
        &self.records[id as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: StatementId) -> &mut StatementRecord {
        &mut self.records[id as usize]
    }

    /// Append a record; O(amortised 1), ids are stable until compaction.
    pub fn append(&mut self, record: StatementRecord) -> Result<StatementId> {
        if self.records.len() > MAX_STATEMENT_ID as usize {
            return Err(Error::invalid_state(
                "statement arena is full (u32 id space exhausted)",
            ));
        }
        let id = self.records.len() as StatementId;
        self.records.push(record);
        Ok(id)
    }

    /// Set `removed_at` if the record is still live. Idempotent: re-marking
    /// an already removed record is a no-op and returns false.
    pub fn mark_removed(&mut self, id: StatementId, snapshot: u64) -> bool {
        let rec = &mut self.records[id as usize];
        if rec.removed_at != 0 {
            return false;
        }
        rec.removed_at = snapshot;
        true
    }

    /// Iterate `(id, record)` pairs in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (StatementId, &StatementRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| (i as StatementId, r))
    }

    /// Physically drop records invisible to every snapshot `>= min_live`:
    /// committed records removed at or before `min_live`, and aborted
    /// pending adds. Rewrites the arena in place, preserving relative order.
    ///
    /// Pending records are never dropped; the engine refuses to compact
    /// while prepared transactions exist, so none should be present.
    pub fn compact(&mut self, min_live: u64) -> CompactResult {
        let mut remap = vec![None; self.records.len()];
        let mut write = 0usize;
        for read in 0..self.records.len() {
            let drop_it = match self.records[read].tx {
                TxState::Aborted => true,
                TxState::Committed => {
                    let removed = self.records[read].removed_at;
                    removed != 0 && removed <= min_live
                }
                TxState::PendingAdd(_) | TxState::PendingRemove(_) => false,
            };
            if !drop_it {
                if write != read {
                    self.records.swap(write, read);
                }
                remap[read] = Some(write as StatementId);
                write += 1;
            }
        }
        let dropped = self.records.len() - write;
        self.records.truncate(write);
        CompactResult { remap, dropped }
    }
}
