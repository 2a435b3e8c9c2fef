//! Snapshot clock: the monotonic commit version and the live-reader registry.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

struct ClockInner {
    current: u64,
    /// Multiset of registered reader snapshots.
    live: BTreeMap<u64, usize>,
}

/// Monotonically increasing commit version plus a multiset of snapshots
/// held by live readers. `min_live` bounds what compaction may reclaim.
pub(crate) struct SnapshotClock {
    inner: Mutex<ClockInner>,
}

impl SnapshotClock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClockInner {
                current: 0,
                live: BTreeMap::new(),
            }),
        }
    }

    /// The latest committed version.
    pub fn current(&self) -> u64 {
        self.inner.lock().current
    }

    /// Register the current version as a live reader snapshot.
    pub fn begin_read(&self) -> u64 {
        let mut inner = self.inner.lock();
        let v = inner.current;
        *inner.live.entry(v).or_insert(0) += 1;
        v
    }

    /// Unregister one reader at snapshot `v`.
    pub fn end_read(&self, v: u64) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.live.get_mut(&v) {
            *count -= 1;
            if *count == 0 {
                inner.live.remove(&v);
            }
        }
    }

    /// Advance the version; called exactly once per committed write.
    pub fn advance(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.current += 1;
        inner.current
    }

    /// The smallest registered snapshot, or the current version if no
    /// reader is registered.
    pub fn min_live(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .live
            .keys()
            .next()
            .copied()
            .unwrap_or(inner.current)
    }
}

/// RAII registration of a reader snapshot; unregisters on drop.
pub(crate) struct SnapshotPin {
    clock: Arc<SnapshotClock>,
    version: u64,
}

impl SnapshotPin {
    pub fn acquire(clock: &Arc<SnapshotClock>) -> Self {
        let version = clock.begin_read();
        Self {
            clock: Arc::clone(clock),
            version,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

impl Drop for SnapshotPin {
    fn drop(&mut self) {
        self.clock.end_read(self.version);
    }
}
