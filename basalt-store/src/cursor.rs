//! Cursors: lazy statement iteration that owns its lock token, and a
//! bounded queue cursor for handing results across threads.

use crate::index::Driver;
use crate::locks::{CoreReadGuard, LockManager};
use crate::snapshot::SnapshotPin;
use crate::statements::StatementId;
use basalt_core::{Error, Pattern, Result, Statement};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Statement cursor
// ---------------------------------------------------------------------------

enum DriverIter {
    Range(std::ops::Range<u32>),
    Ids(std::vec::IntoIter<StatementId>),
}

impl DriverIter {
    fn next(&mut self) -> Option<StatementId> {
        match self {
            DriverIter::Range(r) => r.next(),
            DriverIter::Ids(it) => it.next(),
        }
    }
}

/// A lazy scan over the statement arena.
///
/// The cursor owns a read guard on the store-wide lock from creation until
/// it is closed, dropped, or exhausted; record ids stay valid exactly that
/// long (compaction needs the write lock). Closing releases the guard and
/// any snapshot pin; subsequent `next` calls return `None`.
pub struct StatementCursor {
    guard: Option<CoreReadGuard>,
    driver: DriverIter,
    pattern: Pattern,
    /// `Some(true)` = explicit partition, `Some(false)` = inferred,
    /// `None` = both.
    explicit: Option<bool>,
    snapshot: u64,
    pin: Option<SnapshotPin>,
}

impl StatementCursor {
    pub(crate) fn open(
        locks: &LockManager,
        pattern: Pattern,
        explicit: Option<bool>,
        snapshot: u64,
        pin: Option<SnapshotPin>,
    ) -> Self {
        let guard = locks.read();
        let driver = match guard.index.choose_driver(&pattern, guard.statements.len()) {
            Driver::All(n) => DriverIter::Range(0..n),
            Driver::Ids(ids) => DriverIter::Ids(ids.into_iter()),
        };
        Self {
            guard: Some(guard),
            driver,
            pattern,
            explicit,
            snapshot,
            pin,
        }
    }

    /// The snapshot this cursor reads at.
    pub fn snapshot(&self) -> u64 {
        self.snapshot
    }

    /// Release the lock and snapshot pin. Idempotent.
    pub fn close(&mut self) {
        self.guard = None;
        self.pin = None;
        self.driver = DriverIter::Range(0..0);
    }

    /// True if the cursor has been closed or exhausted.
    pub fn is_closed(&self) -> bool {
        self.guard.is_none()
    }
}

impl Iterator for StatementCursor {
    type Item = Statement;

    fn next(&mut self) -> Option<Statement> {
        let found = loop {
            let guard = self.guard.as_ref()?;
            let Some(id) = self.driver.next() else {
                break None;
            };
            let rec = guard.statements.get(id);
            if let Some(explicit) = self.explicit {
                if rec.explicit != explicit {
                    continue;
                }
            }
            if !rec.visible_at(self.snapshot) {
                continue;
            }
            let st = rec.to_statement();
            if self.pattern.matches(&st) {
                break Some(st);
            }
        };
        if found.is_none() {
            // Exhausted: release the lock eagerly rather than waiting for
            // the owner to drop the cursor.
            self.close();
        }
        found
    }
}

// ---------------------------------------------------------------------------
// Queue cursor
// ---------------------------------------------------------------------------

struct QueueShared {
    error: Mutex<Option<Error>>,
    closed: AtomicBool,
}

/// Producer half of a bounded queue cursor.
///
/// `put` blocks while the queue is full. Dropping the feeder is the done
/// signal: the channel disconnect plays the role of an end sentinel and
/// needs no reserved queue capacity.
pub struct QueueFeeder<T> {
    tx: mpsc::SyncSender<T>,
    shared: Arc<QueueShared>,
}

/// Consumer half of a bounded queue cursor.
pub struct QueueCursor<T> {
    rx: mpsc::Receiver<T>,
    shared: Arc<QueueShared>,
    done: bool,
}

/// Create a bounded queue cursor pair with the given user capacity.
pub fn queue_cursor<T>(capacity: usize) -> (QueueFeeder<T>, QueueCursor<T>) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    let shared = Arc::new(QueueShared {
        error: Mutex::new(None),
        closed: AtomicBool::new(false),
    });
    (
        QueueFeeder {
            tx,
            shared: Arc::clone(&shared),
        },
        QueueCursor {
            rx,
            shared,
            done: false,
        },
    )
}

impl<T> QueueFeeder<T> {
    /// Enqueue an item, blocking while the queue is full.
    ///
    /// Returns false once the consumer has closed; the item is discarded
    /// and the producer should stop.
    pub fn put(&self, item: T) -> bool {
        if self.shared.closed.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(item).is_ok()
    }

    /// Inject an out-of-band error; the consumer surfaces it exactly once
    /// on its next read.
    pub fn toss(&self, err: Error) {
        let mut slot = self.shared.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// True if the consumer has closed the cursor.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl<T> QueueCursor<T> {
    /// Take the next item, blocking while the queue is empty.
    ///
    /// Returns `Ok(None)` after the feeder is dropped and the queue is
    /// drained, and after `close`. A tossed error is surfaced exactly once,
    /// ahead of remaining items.
    pub fn next_item(&mut self) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }
        if let Some(err) = self.shared.error.lock().take() {
            self.done = true;
            return Err(err);
        }
        match self.rx.recv() {
            Ok(item) => Ok(Some(item)),
            Err(mpsc::RecvError) => {
                self.done = true;
                if let Some(err) = self.shared.error.lock().take() {
                    return Err(err);
                }
                Ok(None)
            }
        }
    }

    /// Close the cursor: unblock the producer and discard queued items.
    pub fn close(&mut self) {
        self.done = true;
        self.shared.closed.store(true, Ordering::Release);
        // Drain so a producer blocked on a full queue gets its slot back.
        while self.rx.try_recv().is_ok() {}
    }
}

impl<T> Drop for QueueCursor<T> {
    fn drop(&mut self) {
        self.close();
    }
}
