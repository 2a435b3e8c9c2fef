//! Transaction isolation levels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Isolation level of a dataset or sink.
///
/// Levels are ordered from weakest to strongest; the derived `Ord` follows
/// that ordering, so `level >= IsolationLevel::Snapshot` reads naturally.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    /// No transactional guarantees; reads observe the latest committed state
    /// at each scan and take no lock for the handle's duration.
    None,
    /// Reads observe committed state only; the handle holds a read lock for
    /// its duration.
    ReadCommitted,
    /// Reads are pinned to the snapshot current when the handle was opened.
    SnapshotRead,
    /// Snapshot reads plus snapshot-consistent writes.
    Snapshot,
    /// Full serializability; write-write conflicts fail at prepare.
    Serializable,
}

impl IsolationLevel {
    /// All levels the engine implements, weakest first.
    pub const ALL: [IsolationLevel; 5] = [
        IsolationLevel::None,
        IsolationLevel::ReadCommitted,
        IsolationLevel::SnapshotRead,
        IsolationLevel::Snapshot,
        IsolationLevel::Serializable,
    ];

    /// True if handles at this level pin a snapshot for their lifetime.
    pub fn pins_snapshot(self) -> bool {
        self >= IsolationLevel::SnapshotRead
    }

    /// True if datasets at this level hold a read lock for their duration.
    pub fn holds_read_lock(self) -> bool {
        self == IsolationLevel::ReadCommitted
    }

    /// True if sinks at this level detect write-write conflicts at prepare.
    pub fn is_serializable(self) -> bool {
        self == IsolationLevel::Serializable
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationLevel::None => "NONE",
            IsolationLevel::ReadCommitted => "READ_COMMITTED",
            IsolationLevel::SnapshotRead => "SNAPSHOT_READ",
            IsolationLevel::Snapshot => "SNAPSHOT",
            IsolationLevel::Serializable => "SERIALIZABLE",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(IsolationLevel::None < IsolationLevel::ReadCommitted);
        assert!(IsolationLevel::Snapshot < IsolationLevel::Serializable);
    }

    #[test]
    fn test_capabilities() {
        assert!(!IsolationLevel::ReadCommitted.pins_snapshot());
        assert!(IsolationLevel::SnapshotRead.pins_snapshot());
        assert!(IsolationLevel::Serializable.pins_snapshot());
        assert!(IsolationLevel::ReadCommitted.holds_read_lock());
        assert!(!IsolationLevel::Snapshot.holds_read_lock());
        assert!(IsolationLevel::Serializable.is_serializable());
    }

    #[test]
    fn test_serde_wire_names() {
        let json = serde_json::to_string(&IsolationLevel::SnapshotRead).unwrap();
        assert_eq!(json, "\"SNAPSHOT_READ\"");
        let parsed: IsolationLevel = serde_json::from_str("\"SERIALIZABLE\"").unwrap();
        assert_eq!(parsed, IsolationLevel::Serializable);
    }
}
