//! Statement cross-index.
//!
//! Two structures over the statement arena:
//!
//! - **Role posting lists**: per term, four lists of statement ids (term as
//!   subject / predicate / object / context). Allocated lazily on first
//!   attachment, appended in commit order, tombstoned by the records'
//!   validity bounds, never reordered.
//! - **Key maps**: a hash index from `(s, p, o, c, explicit)` to the current
//!   live record, used for duplicate collapse and remove targeting, plus a
//!   reservation map of keys staged by prepared-but-unflushed transactions.
//!
//! Pattern scans pick the smallest constrained posting list as the driver
//! and filter the rest; unconstrained scans drive from the arena itself.

use crate::statements::{StatementId, StatementList, StatementRecord, TxState};
use basalt_core::{ContextFilter, Pattern, TermId};
use rustc_hash::FxHashMap;

/// Identity key of a statement within one partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct StatementKey {
    pub s: TermId,
    pub p: TermId,
    pub o: TermId,
    pub c: Option<TermId>,
    pub explicit: bool,
}

impl StatementKey {
    pub fn of(rec: &StatementRecord) -> Self {
        Self {
            s: rec.s,
            p: rec.p,
            o: rec.o,
            c: rec.c,
            explicit: rec.explicit,
        }
    }
}

/// Per-term posting lists, one per role.
#[derive(Default)]
pub(crate) struct RolePostings {
    subject: Vec<StatementId>,
    predicate: Vec<StatementId>,
    object: Vec<StatementId>,
    context: Vec<StatementId>,
}

/// The scan driver chosen for a pattern.
pub(crate) enum Driver {
    /// Drive from the whole arena: ids `0..len`.
    All(u32),
    /// Drive from a copied posting list.
    Ids(Vec<StatementId>),
}

pub(crate) struct StatementIndex {
    /// Current live committed record per key (includes records reserved for
    /// removal — they stay live until the removing transaction flushes).
    live: FxHashMap<StatementKey, StatementId>,
    /// Records appended by prepared, not yet flushed transactions.
    pending: FxHashMap<StatementKey, StatementId>,
    /// Posting lists indexed by `TermId`; `None` until first attachment.
    postings: Vec<Option<Box<RolePostings>>>,
}

impl StatementIndex {
    pub fn new() -> Self {
        Self {
            live: FxHashMap::default(),
            pending: FxHashMap::default(),
            postings: Vec::new(),
        }
    }

    // -- key maps ----------------------------------------------------------

    pub fn live_get(&self, key: &StatementKey) -> Option<StatementId> {
        self.live.get(key).copied()
    }

    pub fn pending_get(&self, key: &StatementKey) -> Option<StatementId> {
        self.pending.get(key).copied()
    }

    pub fn insert_pending(&mut self, key: StatementKey, id: StatementId) {
        self.pending.insert(key, id);
    }

    pub fn remove_pending(&mut self, key: &StatementKey) {
        self.pending.remove(key);
    }

    /// Promote a flushed pending add into the live map.
    pub fn promote(&mut self, key: StatementKey, id: StatementId) {
        self.pending.remove(&key);
        self.live.insert(key, id);
    }

    /// Drop a live entry, but only if it still points at `id` (a newer
    /// record may have taken the key over in the meantime).
    pub fn remove_live_if(&mut self, key: &StatementKey, id: StatementId) {
        if self.live.get(key) == Some(&id) {
            self.live.remove(key);
        }
    }

    // -- posting lists -----------------------------------------------------

    /// Link a flushed record into the posting lists of its four terms.
    pub fn link(&mut self, rec: &StatementRecord, id: StatementId) {
        self.postings_for(rec.s).subject.push(id);
        self.postings_for(rec.p).predicate.push(id);
        self.postings_for(rec.o).object.push(id);
        if let Some(c) = rec.c {
            self.postings_for(c).context.push(id);
        }
    }

    fn postings_for(&mut self, term: TermId) -> &mut RolePostings {
        let idx = term.index();
        if idx >= self.postings.len() {
            self.postings.resize_with(idx + 1, || None);
        }
        self.postings[idx].get_or_insert_with(Box::default)
    }

    fn role_list(&self, term: TermId, role: Role) -> &[StatementId] {
        match self.postings.get(term.index()).and_then(Option::as_ref) {
            Some(p) => match role {
                Role::Subject => &p.subject,
                Role::Predicate => &p.predicate,
                Role::Object => &p.object,
                Role::Context => &p.context,
            },
            None => &[],
        }
    }

    /// Choose the smallest constrained posting list as the scan driver.
    ///
    /// `arena_len` bounds the fallback full-arena driver. A default-graph
    /// context constraint has no posting list (the null context is not a
    /// term) and never drives.
    pub fn choose_driver(&self, pattern: &Pattern, arena_len: usize) -> Driver {
        let mut best: Option<&[StatementId]> = None;
        let mut candidates: Vec<&[StatementId]> = Vec::with_capacity(4);
        if let Some(s) = pattern.subject {
            candidates.push(self.role_list(s, Role::Subject));
        }
        if let Some(p) = pattern.predicate {
            candidates.push(self.role_list(p, Role::Predicate));
        }
        if let Some(o) = pattern.object {
            candidates.push(self.role_list(o, Role::Object));
        }
        if let ContextFilter::Named(c) = pattern.context {
            candidates.push(self.role_list(c, Role::Context));
        }

        for list in candidates {
            match best {
                Some(b) if b.len() <= list.len() => {}
                _ => best = Some(list),
            }
        }

        match best {
            Some(list) => Driver::Ids(list.to_vec()),
            None => Driver::All(arena_len as u32),
        }
    }

    /// The latest committed change (`max(added_at, removed_at)`) among all
    /// records with this key, tombstoned ones included. Used by serializable
    /// prepare to detect writes committed after a sink's base snapshot.
    pub fn latest_change(&self, list: &StatementList, key: &StatementKey) -> Option<u64> {
        let mut latest = None;
        for &id in self.role_list(key.s, Role::Subject) {
            let rec = list.get(id);
            if !matches!(rec.tx, TxState::Committed | TxState::PendingRemove(_)) {
                continue;
            }
            if StatementKey::of(rec) == *key {
                let change = rec.added_at.max(rec.removed_at);
                latest = Some(latest.map_or(change, |l: u64| l.max(change)));
            }
        }
        latest
    }

    /// Follow a compaction remap: rewrite every posting list in place
    /// (preserving order) and remap the live map's values. The pending map
    /// must be empty — the engine does not compact under prepared
    /// transactions.
    pub fn apply_remap(&mut self, remap: &[Option<StatementId>]) {
        debug_assert!(self.pending.is_empty());
        for slot in self.postings.iter_mut().flatten() {
            for list in [
                &mut slot.subject,
                &mut slot.predicate,
                &mut slot.object,
                &mut slot.context,
            ] {
                let mut write = 0;
                for read in 0..list.len() {
                    if let Some(new_id) = remap[list[read] as usize] {
                        list[write] = new_id;
                        write += 1;
                    }
                }
                list.truncate(write);
            }
        }
        for id in self.live.values_mut() {
            // Live records are never dropped by compaction.
            *id = remap[*id as usize].expect("live record survived compaction");
        }
    }
}

#[derive(Clone, Copy)]
enum Role {
    Subject,
    Predicate,
    Object,
    Context,
}
