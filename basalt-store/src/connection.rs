//! Connections: the per-caller transaction state machine.
//!
//! A connection holds at most one active transaction. Mutations route to
//! per-partition sinks created lazily at first use; reads inside a
//! transaction overlay the staged buffer on a dataset pinned at `begin`, so
//! a writer observes its own uncommitted changes. Reads outside a
//! transaction open an implicit auto-commit dataset at the store's default
//! isolation.

use crate::index::StatementKey;
use crate::source::{CommitSummary, Dataset, Sink};
use crate::store::StoreInner;
use basalt_core::{Error, IsolationLevel, Pattern, Result, Statement, TermId};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::debug;

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transaction active.
    Idle,
    /// A transaction is active.
    Active,
    /// The active transaction has been prepared and awaits commit.
    Preparing,
    /// The connection is closed.
    Closed,
}

struct ActiveTx {
    level: IsolationLevel,
    explicit_sink: Option<Sink>,
    inferred_sink: Option<Sink>,
    /// Read views pinned at `begin`, created lazily per partition.
    explicit_dataset: Option<Dataset>,
    inferred_dataset: Option<Dataset>,
}

impl ActiveTx {
    fn new(level: IsolationLevel) -> Self {
        Self {
            level,
            explicit_sink: None,
            inferred_sink: None,
            explicit_dataset: None,
            inferred_dataset: None,
        }
    }
}

/// A caller-facing handle on the store.
pub struct Connection {
    inner: Arc<StoreInner>,
    state: ConnectionState,
    tx: Option<ActiveTx>,
}

impl Connection {
    pub(crate) fn new(inner: Arc<StoreInner>) -> Self {
        Self {
            inner,
            state: ConnectionState::Idle,
            tx: None,
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Begin a transaction at the store's default isolation level.
    pub fn begin(&mut self) -> Result<()> {
        let level = self.inner.shared.default_isolation();
        self.begin_with(level)
    }

    /// Begin a transaction at the given isolation level.
    pub fn begin_with(&mut self, level: IsolationLevel) -> Result<()> {
        self.check_not_closed()?;
        if self.state != ConnectionState::Idle {
            return Err(Error::invalid_state(
                "a transaction is already active on this connection",
            ));
        }
        self.inner.shared.check_isolation(level)?;
        self.tx = Some(ActiveTx::new(level));
        self.state = ConnectionState::Active;
        debug!(%level, "transaction started");
        Ok(())
    }

    // -- mutations ---------------------------------------------------------

    /// Add a statement to the explicit partition. Outside a transaction
    /// this auto-commits.
    pub fn add(
        &mut self,
        s: TermId,
        p: TermId,
        o: TermId,
        c: Option<TermId>,
    ) -> Result<()> {
        self.mutate(true, s, p, o, c, true)
    }

    /// Remove a statement from the explicit partition. Outside a
    /// transaction this auto-commits.
    pub fn remove(
        &mut self,
        s: TermId,
        p: TermId,
        o: TermId,
        c: Option<TermId>,
    ) -> Result<()> {
        self.mutate(true, s, p, o, c, false)
    }

    /// Add a statement to the inferred partition (used by external
    /// inference processes).
    pub fn add_inferred(
        &mut self,
        s: TermId,
        p: TermId,
        o: TermId,
        c: Option<TermId>,
    ) -> Result<()> {
        self.mutate(false, s, p, o, c, true)
    }

    /// Remove a statement from the inferred partition.
    pub fn remove_inferred(
        &mut self,
        s: TermId,
        p: TermId,
        o: TermId,
        c: Option<TermId>,
    ) -> Result<()> {
        self.mutate(false, s, p, o, c, false)
    }

    /// Remove every explicit statement in the given contexts (`None` =
    /// default graph; empty slice = all contexts).
    pub fn clear(&mut self, contexts: &[Option<TermId>]) -> Result<usize> {
        self.check_not_closed()?;
        if self.state == ConnectionState::Active {
            let sink = self.explicit_sink()?;
            return sink.clear(contexts);
        }
        // Auto-commit.
        self.begin()?;
        let count = match self.explicit_sink().and_then(|s| s.clear(contexts)) {
            Ok(count) => count,
            Err(e) => {
                self.rollback()?;
                return Err(e);
            }
        };
        self.commit()?;
        Ok(count)
    }

    fn mutate(
        &mut self,
        explicit: bool,
        s: TermId,
        p: TermId,
        o: TermId,
        c: Option<TermId>,
        present: bool,
    ) -> Result<()> {
        self.check_not_closed()?;
        if self.state == ConnectionState::Active {
            let sink = if explicit {
                self.explicit_sink()?
            } else {
                self.inferred_sink()?
            };
            return if present {
                sink.add(s, p, o, c)
            } else {
                sink.remove(s, p, o, c)
            };
        }
        if self.state != ConnectionState::Idle {
            return Err(Error::invalid_state(
                "connection is mid-commit; mutations are not accepted",
            ));
        }
        // Auto-commit a single-statement transaction.
        self.begin()?;
        let result = (|| {
            let sink = if explicit {
                self.explicit_sink()?
            } else {
                self.inferred_sink()?
            };
            if present {
                sink.add(s, p, o, c)
            } else {
                sink.remove(s, p, o, c)
            }
        })();
        match result {
            Ok(()) => self.commit(),
            Err(e) => {
                self.rollback()?;
                Err(e)
            }
        }
    }

    fn explicit_sink(&mut self) -> Result<&mut Sink> {
        let inner = &self.inner;
        let tx = self.tx.as_mut().expect("active transaction");
        if tx.explicit_sink.is_none() {
            tx.explicit_sink = Some(inner.explicit_source().sink(tx.level)?);
        }
        Ok(tx.explicit_sink.as_mut().unwrap())
    }

    fn inferred_sink(&mut self) -> Result<&mut Sink> {
        let inner = &self.inner;
        let tx = self.tx.as_mut().expect("active transaction");
        if tx.inferred_sink.is_none() {
            tx.inferred_sink = Some(inner.inferred_source().sink(tx.level)?);
        }
        Ok(tx.inferred_sink.as_mut().unwrap())
    }

    // -- reads -------------------------------------------------------------

    /// Read all statements matching `pattern`.
    ///
    /// Inside a transaction the result overlays this connection's staged
    /// changes on the transaction's snapshot; outside, it reads through an
    /// implicit auto-commit dataset at the default isolation.
    pub fn read(&mut self, pattern: Pattern, include_inferred: bool) -> Result<Vec<Statement>> {
        self.check_not_closed()?;
        if self.state == ConnectionState::Active {
            return self.read_in_tx(pattern, include_inferred);
        }

        let level = self.inner.shared.default_isolation();
        let mut out = Vec::new();
        {
            let explicit = self.inner.explicit_source().dataset(level)?;
            out.extend(explicit.scan(pattern)?);
        }
        if include_inferred {
            let inferred = self.inner.inferred_source().dataset(level)?;
            out.extend(inferred.scan(pattern)?);
        }
        Ok(out)
    }

    fn read_in_tx(&mut self, pattern: Pattern, include_inferred: bool) -> Result<Vec<Statement>> {
        let level = self.tx.as_ref().expect("active transaction").level;
        {
            let inner = Arc::clone(&self.inner);
            let tx = self.tx.as_mut().expect("active transaction");
            if tx.explicit_dataset.is_none() {
                tx.explicit_dataset = Some(inner.explicit_source().dataset(level)?);
            }
            if include_inferred && tx.inferred_dataset.is_none() {
                tx.inferred_dataset = Some(inner.inferred_source().dataset(level)?);
            }
        }
        let tx = self.tx.as_ref().expect("active transaction");

        let mut out = Vec::new();
        let mut seen: FxHashSet<StatementKey> = FxHashSet::default();

        let mut collect = |dataset: &Dataset, sink: Option<&Sink>, explicit: bool| -> Result<()> {
            for st in dataset.scan(pattern)? {
                let key = StatementKey {
                    s: st.subject,
                    p: st.predicate,
                    o: st.object,
                    c: st.context,
                    explicit,
                };
                // Skip statements this transaction stages as removed.
                if sink.map_or(false, |s| s.stages_absent(&key)) {
                    continue;
                }
                seen.insert(key);
                out.push(st);
            }
            // Overlay staged adds not yet visible in the snapshot.
            if let Some(sink) = sink {
                for (key, st) in sink.staged_present() {
                    if pattern.matches(&st) && !seen.contains(&key) {
                        seen.insert(key);
                        out.push(st);
                    }
                }
            }
            Ok(())
        };

        collect(
            tx.explicit_dataset.as_ref().expect("dataset created above"),
            tx.explicit_sink.as_ref(),
            true,
        )?;
        if include_inferred {
            collect(
                tx.inferred_dataset.as_ref().expect("dataset created above"),
                tx.inferred_sink.as_ref(),
                false,
            )?;
        }
        Ok(out)
    }

    /// Count of statements matching the unconstrained pattern.
    pub fn size(&mut self, include_inferred: bool) -> Result<usize> {
        Ok(self.read(Pattern::any(), include_inferred)?.len())
    }

    /// Distinct named contexts across both partitions.
    pub fn contexts(&mut self) -> Result<Vec<TermId>> {
        self.check_not_closed()?;
        let level = self.inner.shared.default_isolation();
        let mut seen: FxHashSet<TermId> = FxHashSet::default();
        for source in [self.inner.explicit_source(), self.inner.inferred_source()] {
            let dataset = source.dataset(level)?;
            seen.extend(dataset.contexts()?);
        }
        let mut out: Vec<TermId> = seen.into_iter().collect();
        out.sort_unstable();
        Ok(out)
    }

    // -- transaction control -----------------------------------------------

    /// Validate and reserve the transaction's changes without committing.
    pub fn prepare(&mut self) -> Result<()> {
        self.check_not_closed()?;
        if self.state != ConnectionState::Active {
            return Err(Error::invalid_state("no active transaction to prepare"));
        }
        let result = self.prepare_sinks();
        match result {
            Ok(()) => {
                self.state = ConnectionState::Preparing;
                Ok(())
            }
            Err(e) => {
                self.abort_tx();
                Err(e)
            }
        }
    }

    fn prepare_sinks(&mut self) -> Result<()> {
        // Close read views first: a READ_COMMITTED dataset holds the read
        // lock, and prepare upgrades to the write lock on this thread.
        let tx = self.tx.as_mut().expect("active transaction");
        tx.explicit_dataset = None;
        tx.inferred_dataset = None;
        if let Some(sink) = tx.explicit_sink.as_mut() {
            sink.prepare()?;
        }
        if let Some(sink) = tx.inferred_sink.as_mut() {
            sink.prepare()?;
        }
        Ok(())
    }

    /// Commit the active transaction (preparing it first if needed).
    ///
    /// On failure the transaction is rolled back and the error propagated;
    /// the connection returns to idle either way.
    pub fn commit(&mut self) -> Result<()> {
        self.check_not_closed()?;
        match self.state {
            ConnectionState::Active => {
                if let Err(e) = self.prepare() {
                    // prepare() already rolled back.
                    return Err(e);
                }
            }
            ConnectionState::Preparing => {}
            _ => return Err(Error::invalid_state("no active transaction to commit")),
        }

        let tx = self.tx.as_mut().expect("active transaction");
        let mut summaries: Vec<CommitSummary> = Vec::new();
        let mut flush_error = None;
        for sink in [tx.explicit_sink.as_mut(), tx.inferred_sink.as_mut()]
            .into_iter()
            .flatten()
        {
            match sink.flush() {
                Ok(Some(summary)) => summaries.push(summary),
                Ok(None) => {}
                Err(e) => {
                    flush_error = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = flush_error {
            self.abort_tx();
            return Err(e);
        }

        self.drop_tx();
        self.state = ConnectionState::Idle;

        if !summaries.is_empty() {
            let added = summaries.iter().map(|s| s.added).sum();
            let removed = summaries.iter().map(|s| s.removed).sum();
            let version = summaries.iter().map(|s| s.version).max().unwrap_or(0);
            debug!(added, removed, version, "transaction committed");
            self.inner.after_commit(added, removed, version)?;
        }
        Ok(())
    }

    /// Roll back the active transaction, discarding staged changes.
    pub fn rollback(&mut self) -> Result<()> {
        self.check_not_closed()?;
        match self.state {
            ConnectionState::Active | ConnectionState::Preparing => {
                self.abort_tx();
                debug!("transaction rolled back");
                Ok(())
            }
            _ => Err(Error::invalid_state("no active transaction to roll back")),
        }
    }

    /// Close the connection, rolling back any active transaction.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if matches!(
            self.state,
            ConnectionState::Active | ConnectionState::Preparing
        ) {
            self.abort_tx();
        }
        self.state = ConnectionState::Closed;
    }

    fn abort_tx(&mut self) {
        self.drop_tx();
        self.state = ConnectionState::Idle;
    }

    fn drop_tx(&mut self) {
        // Sinks and datasets release their locks and pins on drop.
        self.tx = None;
    }

    fn check_not_closed(&self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(Error::invalid_state("connection is closed"));
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
