//! Lock manager: the store-wide read/write lock, the writer-ordering
//! transaction mutex, and the persistence directory lock.
//!
//! Guards are the owned (`Arc`-backed) variants so lazy cursors can carry
//! their lock token beyond the acquiring call and release it on close.
//! Cursor reads use recursive acquisition: a dataset may already hold a
//! read guard on the same thread, and a parked writer between the two
//! acquisitions would otherwise deadlock the plain fair path.

use crate::index::StatementIndex;
use crate::statements::StatementList;
use basalt_core::{Error, Result};
use fs2::FileExt;
use parking_lot::lock_api::{ArcMutexGuard, ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawMutex, RawRwLock, RwLock};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name of the zero-byte directory lock marker file.
pub(crate) const LOCK_FILE_NAME: &str = "basalt.lock";

/// The state guarded by the store-wide read/write lock.
pub(crate) struct StoreCore {
    pub statements: StatementList,
    pub index: StatementIndex,
    /// Count of prepared-but-unflushed transactions; compaction is skipped
    /// while nonzero because it would invalidate their reserved ids.
    pub prepared_txns: usize,
    /// Count of logically removed records awaiting physical reclamation.
    pub reclaimable: usize,
}

impl StoreCore {
    pub fn new() -> Self {
        Self {
            statements: StatementList::new(),
            index: StatementIndex::new(),
            prepared_txns: 0,
            reclaimable: 0,
        }
    }
}

pub(crate) type CoreReadGuard = ArcRwLockReadGuard<RawRwLock, StoreCore>;
pub(crate) type CoreWriteGuard = ArcRwLockWriteGuard<RawRwLock, StoreCore>;
pub(crate) type TxnGuard = ArcMutexGuard<RawMutex, ()>;

/// Store-wide locks.
///
/// parking_lot's policy — readers share, a parked writer blocks later
/// readers — gives reader preference that inverts under a pending writer.
pub(crate) struct LockManager {
    core: Arc<RwLock<StoreCore>>,
    txn: Arc<Mutex<()>>,
}

impl LockManager {
    pub fn new(core: StoreCore) -> Self {
        Self {
            core: Arc::new(RwLock::new(core)),
            txn: Arc::new(Mutex::new(())),
        }
    }

    /// Shared read guard (recursive: safe to take while the same thread
    /// already holds one).
    pub fn read(&self) -> CoreReadGuard {
        self.core.read_arc_recursive()
    }

    /// Exclusive write guard.
    pub fn write(&self) -> CoreWriteGuard {
        self.core.write_arc()
    }

    /// The transaction-ordering mutex; serializable writers queue on it
    /// from prepare to close.
    pub fn txn_lock(&self) -> TxnGuard {
        self.txn.lock_arc()
    }
}

/// Advisory exclusive lock on a persistence directory, preventing two
/// processes from sharing one data directory. Released on drop.
pub(crate) struct DirectoryLock {
    file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Acquire the lock or fail with `LockFailed`.
    pub fn acquire(dir: &Path) -> Result<Self> {
        match Self::try_acquire(dir)? {
            Some(lock) => Ok(lock),
            None => Err(Error::lock_failed(format!(
                "directory {} is locked by another process",
                dir.display()
            ))),
        }
    }

    /// Try to acquire the lock; `Ok(None)` if another process holds it.
    pub fn try_acquire(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(format!("creating lock file {}", path.display()), e))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(_) => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_lock_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let lock = DirectoryLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());

        // A second acquisition in the same process is refused while the
        // first lock is held.
        assert!(DirectoryLock::try_acquire(dir.path()).unwrap().is_none());
        assert!(DirectoryLock::acquire(dir.path()).is_err());

        drop(lock);
        assert!(DirectoryLock::try_acquire(dir.path()).unwrap().is_some());
    }

    #[test]
    fn test_read_guard_outlives_manager_borrow() {
        let locks = LockManager::new(StoreCore::new());
        let guard = locks.read();
        // A second recursive read on the same thread must not deadlock.
        let guard2 = locks.read();
        assert_eq!(guard.statements.len(), 0);
        drop(guard2);
        drop(guard);
        let mut w = locks.write();
        w.prepared_txns += 1;
    }
}
