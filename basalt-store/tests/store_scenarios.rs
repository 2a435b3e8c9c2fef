//! End-to-end store scenarios: commit visibility, isolation, persistence,
//! sync coalescing, and lock release.

use basalt_store::{
    Error, IsolationLevel, MemoryGraphStore, Pattern, Statement, StoreConfig, Term, TermId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn memory_store() -> MemoryGraphStore {
    let store = MemoryGraphStore::new();
    store.init().unwrap();
    store
}

fn iri(store: &MemoryGraphStore, suffix: &str) -> TermId {
    store
        .intern_iri(&format!("http://example.org/{suffix}"))
        .unwrap()
}

#[test]
fn insert_then_query() {
    let store = memory_store();
    let a = iri(&store, "a");
    let knows = iri(&store, "knows");
    let b = iri(&store, "b");

    let mut conn = store.connection().unwrap();
    conn.begin().unwrap();
    conn.add(a, knows, b, None).unwrap();
    conn.commit().unwrap();

    let found: Vec<Statement> = store
        .scan(Pattern::any().with_predicate(knows), false)
        .unwrap()
        .collect();
    assert_eq!(found, vec![Statement::new(a, knows, b, None)]);
}

#[test]
fn snapshot_isolation_shields_readers() {
    let store = memory_store();
    let a = iri(&store, "a");
    let p = iri(&store, "p");
    let one = store.intern_literal("1", None, None).unwrap();

    let mut conn = store.connection().unwrap();
    conn.add(a, p, one, None).unwrap(); // commits at version 1

    let source = store.explicit_source().unwrap();
    let reader = source.dataset(IsolationLevel::Snapshot).unwrap();
    assert_eq!(reader.snapshot(), 1);

    conn.remove(a, p, one, None).unwrap(); // commits at version 2

    // The pinned reader still observes the statement; repeated scans on
    // the same dataset return the identical result set.
    let first: Vec<Statement> = reader.scan(Pattern::any()).unwrap().collect();
    let second: Vec<Statement> = reader.scan(Pattern::any()).unwrap().collect();
    assert_eq!(first, vec![Statement::new(a, p, one, None)]);
    assert_eq!(first, second);

    // A reader opened after the removal sees nothing.
    let late = source.dataset(IsolationLevel::Snapshot).unwrap();
    assert_eq!(late.size().unwrap(), 0);
}

#[test]
fn serializable_conflict_fails_at_prepare() {
    let store = memory_store();
    let a = iri(&store, "a");
    let p = iri(&store, "p");
    let b = iri(&store, "b");
    let source = store.explicit_source().unwrap();

    // Both transactions begin at the same base snapshot.
    let mut t1 = source.sink(IsolationLevel::Serializable).unwrap();
    let mut t2 = source.sink(IsolationLevel::Serializable).unwrap();
    assert_eq!(t1.base_snapshot(), t2.base_snapshot());

    t1.add(a, p, b, None).unwrap();
    t1.prepare().unwrap();
    t1.flush().unwrap().unwrap();
    t1.close();

    t2.add(a, p, b, None).unwrap();
    let err = t2.prepare().unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got: {err}");
    t2.close();

    assert_eq!(store.size(false).unwrap(), 1);
}

#[test]
fn serializable_disjoint_writes_commit() {
    let store = memory_store();
    let p = iri(&store, "p");
    let (a, b) = (iri(&store, "a"), iri(&store, "b"));
    let (x, y) = (iri(&store, "x"), iri(&store, "y"));
    let source = store.explicit_source().unwrap();

    let mut t1 = source.sink(IsolationLevel::Serializable).unwrap();
    let mut t2 = source.sink(IsolationLevel::Serializable).unwrap();

    t1.add(a, p, x, None).unwrap();
    t1.prepare().unwrap();
    t1.flush().unwrap().unwrap();
    t1.close();

    t2.add(b, p, y, None).unwrap();
    t2.prepare().unwrap();
    t2.flush().unwrap().unwrap();
    t2.close();

    assert_eq!(store.size(false).unwrap(), 2);
}

#[test]
fn persistence_round_trip() {
    let dir = tempfile::tempdir().unwrap();

    let store = MemoryGraphStore::persistent(dir.path());
    store.init().unwrap();
    let a = iri(&store, "a");
    let knows = iri(&store, "knows");
    let b = iri(&store, "b");
    let name = iri(&store, "name");
    let alice = store.intern_literal("Alice", Some("en"), None).unwrap();
    let blank = store.intern_blank("node1").unwrap();
    let graph = iri(&store, "graph");

    let mut conn = store.connection().unwrap();
    conn.begin().unwrap();
    conn.add(a, knows, b, None).unwrap();
    conn.add(a, name, alice, None).unwrap();
    conn.add(blank, knows, a, Some(graph)).unwrap();
    conn.commit().unwrap();
    drop(conn);
    store.shutdown().unwrap();

    // Reopen the directory with a fresh store.
    let reopened = MemoryGraphStore::persistent(dir.path());
    reopened.init().unwrap();
    assert_eq!(reopened.size(false).unwrap(), 3);

    // Compare by term value, since identities are assigned per store.
    let resolve = |id: TermId| reopened.term(id).unwrap().unwrap();
    let mut found = 0;
    for st in reopened.scan(Pattern::any(), false).unwrap() {
        match resolve(st.object) {
            Term::Literal { lexical, lang, .. } => {
                assert_eq!(&*lexical, "Alice");
                assert_eq!(lang.as_deref(), Some("en"));
                assert!(st.context.is_none());
                found += 1;
            }
            Term::Iri { .. } => {
                match resolve(st.subject) {
                    Term::Blank { .. } => {
                        let ctx = st.context.expect("named graph survived");
                        assert!(resolve(ctx).is_iri_str("http://example.org/graph"));
                    }
                    other => {
                        assert!(other.is_iri_str("http://example.org/a"), "got {other}");
                        assert!(st.context.is_none());
                    }
                }
                found += 1;
            }
            other => panic!("unexpected object term {other}"),
        }
    }
    assert_eq!(found, 3);
    reopened.shutdown().unwrap();
}

#[test]
fn empty_data_file_is_a_fresh_store() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("basalt.dat"), b"").unwrap();

    let store = MemoryGraphStore::persistent(dir.path());
    store.init().unwrap();
    assert_eq!(store.size(true).unwrap(), 0);
    store.shutdown().unwrap();
}

#[test]
fn corrupt_data_file_fails_init() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("basalt.dat"), b"not a basalt file").unwrap();

    let store = MemoryGraphStore::persistent(dir.path());
    assert!(matches!(
        store.init(),
        Err(Error::PersistenceIo { .. })
    ));
}

#[test]
fn sync_coalescing_defers_the_write() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::persistent(dir.path());
    config.sync_delay_ms = 150;
    let store = MemoryGraphStore::with_config(config);
    store.init().unwrap();

    let p = iri(&store, "p");
    let o = iri(&store, "o");
    let mut conn = store.connection().unwrap();
    for n in 0..5 {
        let s = iri(&store, &format!("s{n}"));
        conn.add(s, p, o, None).unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }

    // Before the delay elapses the data file still holds the initial
    // (empty) image.
    let initial_len = std::fs::metadata(dir.path().join("basalt.dat"))
        .unwrap()
        .len();

    std::thread::sleep(Duration::from_millis(400));
    let synced_len = std::fs::metadata(dir.path().join("basalt.dat"))
        .unwrap()
        .len();
    assert!(
        synced_len > initial_len,
        "coalesced sync should have written all five statements"
    );

    store.shutdown().unwrap();

    // The deferred image is complete: a reopen sees all five statements.
    let reopened = MemoryGraphStore::persistent(dir.path());
    reopened.init().unwrap();
    assert_eq!(reopened.size(false).unwrap(), 5);
    reopened.shutdown().unwrap();
}

#[test]
fn shutdown_writes_deferred_changes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::persistent(dir.path());
    config.sync_delay_ms = -1; // durability only at shutdown
    let store = MemoryGraphStore::with_config(config);
    store.init().unwrap();

    let (s, p, o) = (iri(&store, "s"), iri(&store, "p"), iri(&store, "o"));
    let mut conn = store.connection().unwrap();
    conn.add(s, p, o, None).unwrap();
    drop(conn);
    store.shutdown().unwrap();

    let reopened = MemoryGraphStore::persistent(dir.path());
    reopened.init().unwrap();
    assert_eq!(reopened.size(false).unwrap(), 1);
    reopened.shutdown().unwrap();
}

#[test]
fn cursor_close_releases_the_read_lock() {
    let store = memory_store();
    let p = iri(&store, "p");
    let o = iri(&store, "o");
    let mut conn = store.connection().unwrap();
    for n in 0..10 {
        conn.add(iri(&store, &format!("s{n}")), p, o, None).unwrap();
    }

    let source = store.explicit_source().unwrap();
    let dataset = source.dataset(IsolationLevel::Snapshot).unwrap();
    let mut cursor = dataset.scan(Pattern::any()).unwrap();

    // Partially drained: the cursor still holds the read lock.
    assert!(cursor.next().is_some());
    assert!(!cursor.is_closed());
    cursor.close();
    assert!(cursor.next().is_none());

    // With the cursor closed, a write transaction proceeds without
    // deadlock on this same thread.
    conn.add(iri(&store, "s-after"), p, o, None).unwrap();
    assert_eq!(store.size(false).unwrap(), 11);
}

#[test]
fn open_cursor_blocks_writers_until_closed() {
    let store = Arc::new(memory_store());
    let p = iri(&store, "p");
    let o = iri(&store, "o");
    let mut conn = store.connection().unwrap();
    for n in 0..3 {
        conn.add(iri(&store, &format!("s{n}")), p, o, None).unwrap();
    }

    let mut cursor = store.scan(Pattern::any(), false).unwrap();
    assert!(cursor.next().is_some());

    let committed = Arc::new(AtomicBool::new(false));
    let writer = {
        let store = Arc::clone(&store);
        let committed = Arc::clone(&committed);
        std::thread::spawn(move || {
            let s = iri(&store, "blocked-writer");
            let mut conn = store.connection().unwrap();
            conn.add(s, p, o, None).unwrap();
            committed.store(true, Ordering::SeqCst);
        })
    };

    std::thread::sleep(Duration::from_millis(100));
    assert!(
        !committed.load(Ordering::SeqCst),
        "writer should wait for the cursor's read lock"
    );

    cursor.close();
    writer.join().unwrap();
    assert!(committed.load(Ordering::SeqCst));
}

#[test]
fn rollback_after_prepare_fully_reverts() {
    let store = memory_store();
    let (s, p, o) = (iri(&store, "s"), iri(&store, "p"), iri(&store, "o"));
    let source = store.explicit_source().unwrap();

    let mut sink = source.sink(IsolationLevel::Snapshot).unwrap();
    sink.add(s, p, o, None).unwrap();
    sink.prepare().unwrap();
    sink.close(); // rollback

    assert_eq!(store.size(false).unwrap(), 0);

    // The reservation is gone: a later transaction can commit the same
    // statement.
    let mut sink = source.sink(IsolationLevel::Snapshot).unwrap();
    sink.add(s, p, o, None).unwrap();
    sink.prepare().unwrap();
    assert_eq!(sink.flush().unwrap().unwrap().added, 1);
    sink.close();
    assert_eq!(store.size(false).unwrap(), 1);
}

#[test]
fn connection_sees_its_own_staged_writes() {
    let store = memory_store();
    let (s, p, o) = (iri(&store, "s"), iri(&store, "p"), iri(&store, "o"));

    let mut conn = store.connection().unwrap();
    conn.begin().unwrap();
    conn.add(s, p, o, None).unwrap();

    // Own writes visible inside the transaction, invisible outside.
    assert_eq!(conn.size(false).unwrap(), 1);
    assert_eq!(store.size(false).unwrap(), 0);

    conn.remove(s, p, o, None).unwrap();
    assert_eq!(conn.size(false).unwrap(), 0);

    conn.rollback().unwrap();
    assert_eq!(store.size(false).unwrap(), 0);
}

#[test]
fn connection_rejects_misuse() {
    let store = memory_store();
    let mut conn = store.connection().unwrap();

    assert!(matches!(conn.commit(), Err(Error::InvalidState(_))));
    assert!(matches!(conn.rollback(), Err(Error::InvalidState(_))));

    conn.begin().unwrap();
    assert!(matches!(conn.begin(), Err(Error::InvalidState(_))));
    conn.rollback().unwrap();

    conn.close();
    assert!(matches!(conn.begin(), Err(Error::InvalidState(_))));
}

#[test]
fn compaction_preserves_visibility() {
    let store = memory_store();
    let p = iri(&store, "p");
    let o = iri(&store, "o");
    let subjects: Vec<TermId> = (0..3).map(|n| iri(&store, &format!("s{n}"))).collect();

    let mut conn = store.connection().unwrap();
    conn.begin().unwrap();
    for &s in &subjects {
        conn.add(s, p, o, None).unwrap();
    }
    conn.commit().unwrap(); // version 1

    let source = store.explicit_source().unwrap();
    let pinned = source.dataset(IsolationLevel::Snapshot).unwrap();

    conn.remove(subjects[1], p, o, None).unwrap(); // version 2

    // The pinned reader protects the removed record from reclamation.
    assert_eq!(store.compact().unwrap(), 0);
    assert_eq!(pinned.size().unwrap(), 3);

    drop(pinned);
    assert_eq!(store.compact().unwrap(), 1);

    // Visibility at the current snapshot is unchanged by compaction.
    let after: Vec<Statement> = store.scan(Pattern::any(), false).unwrap().collect();
    assert_eq!(after.len(), 2);
    assert!(after.iter().all(|st| st.subject != subjects[1]));

    // Compacting again reclaims nothing further.
    assert_eq!(store.compact().unwrap(), 0);
}

#[test]
fn second_process_degrades_to_read_only() {
    let dir = tempfile::tempdir().unwrap();

    let first = MemoryGraphStore::persistent(dir.path());
    first.init().unwrap();
    let (s, p, o) = (iri(&first, "s"), iri(&first, "p"), iri(&first, "o"));
    let mut conn = first.connection().unwrap();
    conn.add(s, p, o, None).unwrap();
    drop(conn);

    // The directory lock is held; a second store over the same directory
    // opens read-only instead of failing.
    let second = MemoryGraphStore::persistent(dir.path());
    second.init().unwrap();
    assert!(!second.writable());
    assert_eq!(second.size(false).unwrap(), 1);

    let source = second.explicit_source().unwrap();
    assert!(matches!(
        source.sink(IsolationLevel::Snapshot),
        Err(Error::LockFailed(_))
    ));

    second.shutdown().unwrap();
    first.shutdown().unwrap();
}

#[test]
fn background_scan_streams_through_queue() {
    let store = memory_store();
    let p = iri(&store, "p");
    let o = iri(&store, "o");
    let mut conn = store.connection().unwrap();
    conn.begin().unwrap();
    for n in 0..50 {
        conn.add(iri(&store, &format!("s{n}")), p, o, None).unwrap();
    }
    conn.commit().unwrap();

    let mut cursor = store.background_scan(Pattern::any(), false, 8).unwrap();
    let mut count = 0;
    while let Some(st) = cursor.next_item().unwrap() {
        assert_eq!(st.predicate, p);
        count += 1;
    }
    assert_eq!(count, 50);

    // Closing early releases the producer and the store stays writable.
    let mut cursor = store.background_scan(Pattern::any(), false, 2).unwrap();
    assert!(cursor.next_item().unwrap().is_some());
    cursor.close();
    conn.add(iri(&store, "after-close"), p, o, None).unwrap();
    assert_eq!(store.size(false).unwrap(), 51);
}

#[test]
fn deprecate_by_pattern_stages_matching_statements() {
    let store = memory_store();
    let p = iri(&store, "p");
    let q = iri(&store, "q");
    let o = iri(&store, "o");
    let mut conn = store.connection().unwrap();
    conn.begin().unwrap();
    conn.add(iri(&store, "s1"), p, o, None).unwrap();
    conn.add(iri(&store, "s2"), p, o, None).unwrap();
    conn.add(iri(&store, "s3"), q, o, None).unwrap();
    conn.commit().unwrap();

    let source = store.explicit_source().unwrap();
    let mut sink = source.sink(IsolationLevel::Snapshot).unwrap();
    let staged = sink
        .deprecate_by_pattern(&Pattern::any().with_predicate(p))
        .unwrap();
    assert_eq!(staged, 2);
    sink.prepare().unwrap();
    assert_eq!(sink.flush().unwrap().unwrap().removed, 2);
    sink.close();

    let left: Vec<Statement> = store.scan(Pattern::any(), false).unwrap().collect();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].predicate, q);
}
