//! Locking unique index seek behaviour.
//!
//! Covers the shared fast path, the exclusive re-check, the sentinel with a
//! held exclusive lock, and the checks that must fail before any lock is
//! taken.

#![allow(missing_docs)]

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use unique_seek::index::{ExactPredicate, NodeValueIndexCursor, RelationshipValueIndexCursor};
use unique_seek::kernel::{Kernel, KernelOptions, Read};
use unique_seek::locking::{index_entry_resource_id, LockClient, Locks, ResourceId};
use unique_seek::schema::{IndexDescriptor, IndexPrototype, SchemaDescriptor};
use unique_seek::types::{
    EntityType, Error, IndexUnavailable, LabelId, LockMode, NodeId, PropId, Result, TypeId, Value,
};

const PERSON: LabelId = LabelId(1);
const EMAIL: PropId = PropId(1);

fn kernel() -> Kernel {
    Kernel::new(KernelOptions::default().lock_timeout(Some(Duration::from_secs(5))))
}

fn online_index(kernel: &Kernel, prototype: IndexPrototype) -> Result<IndexDescriptor> {
    let index = kernel.create_index(prototype)?;
    kernel.mark_index_online(index.id())?;
    Ok(index)
}

fn email_index(kernel: &Kernel) -> Result<IndexDescriptor> {
    online_index(
        kernel,
        IndexPrototype::unique("person_email", SchemaDescriptor::for_label(PERSON, &[EMAIL])),
    )
}

fn email(value: &str) -> Vec<ExactPredicate> {
    vec![ExactPredicate::new(EMAIL, value)]
}

fn entry(value: &str) -> ResourceId {
    ResourceId::index_entry(index_entry_resource_id(PERSON.0, &email(value)).unwrap())
}

fn insert_committed(kernel: &Kernel, index: &IndexDescriptor, value: &str) -> Result<NodeId> {
    let mut tx = kernel.begin_tx()?;
    let node = tx.create_node()?;
    tx.index_insert(index, node, vec![Value::from(value)])?;
    tx.commit()?;
    Ok(node)
}

/// Lock client that runs a one-shot hook right before the first exclusive
/// acquisition, i.e. between the shared release and the exclusive request.
struct HookedLocks {
    inner: LockClient,
    before_exclusive: Mutex<Option<Box<dyn FnOnce() -> Result<()> + Send>>>,
}

impl Locks for HookedLocks {
    fn acquire_shared_index_entry_lock(&self, key: u64) -> Result<()> {
        self.inner.acquire_shared_index_entry_lock(key)
    }

    fn release_shared_index_entry_lock(&self, key: u64) -> Result<()> {
        self.inner.release_shared_index_entry_lock(key)
    }

    fn acquire_exclusive_index_entry_lock(&self, key: u64) -> Result<()> {
        let hook = self.before_exclusive.lock().take();
        if let Some(hook) = hook {
            hook()?;
        }
        self.inner.acquire_exclusive_index_entry_lock(key)
    }

    fn release_exclusive_index_entry_lock(&self, key: u64) -> Result<()> {
        self.inner.release_exclusive_index_entry_lock(key)
    }
}

#[test]
fn existing_entry_is_returned_under_shared_lock() -> Result<()> {
    let kernel = kernel();
    let index = email_index(&kernel)?;
    let node = insert_committed(&kernel, &index, "ada@example.com")?;

    let tx = kernel.begin_tx()?;
    let mut cursor = NodeValueIndexCursor::new();
    let found =
        tx.read()
            .locking_node_unique_index_seek(&index, &mut cursor, &email("ada@example.com"))?;
    assert_eq!(found, Some(node));
    assert!(tx.locks().holds(entry("ada@example.com"), LockMode::Shared));
    assert!(!tx.locks().holds(entry("ada@example.com"), LockMode::Exclusive));
    Ok(())
}

#[test]
fn entry_committed_between_unlock_and_exclusive_is_found() -> Result<()> {
    let kernel = kernel();
    let index = email_index(&kernel)?;

    let writer_kernel = kernel.clone();
    let writer_index = index.clone();
    let hook: Box<dyn FnOnce() -> Result<()> + Send> = Box::new(move || {
        let mut tx = writer_kernel.begin_tx()?;
        tx.index_insert(&writer_index, NodeId(500), vec![Value::from("late@example.com")])?;
        tx.commit()
    });

    let tx_id = kernel.allocate_tx_id();
    let locks = Arc::new(HookedLocks {
        inner: kernel.lock_manager().new_client(tx_id),
        before_exclusive: Mutex::new(Some(hook)),
    });
    let read = Read::new(
        tx_id,
        kernel.metadata(),
        kernel.index_store(),
        locks.clone(),
        Arc::new(AtomicBool::new(false)),
    );

    let mut cursor = NodeValueIndexCursor::new();
    let found =
        read.locking_node_unique_index_seek(&index, &mut cursor, &email("late@example.com"))?;
    assert_eq!(found, Some(NodeId(500)));
    assert!(locks.before_exclusive.lock().is_none(), "hook must have run");

    let key = entry("late@example.com");
    assert!(locks.inner.holds(key, LockMode::Shared));
    assert!(!locks.inner.holds(key, LockMode::Exclusive));
    Ok(())
}

#[test]
fn missing_entry_returns_none_and_keeps_exclusive_lock() -> Result<()> {
    let kernel = Kernel::new(
        KernelOptions::default().lock_timeout(Some(Duration::from_millis(50))),
    );
    let index = email_index(&kernel)?;

    let tx = kernel.begin_tx()?;
    let mut cursor = NodeValueIndexCursor::new();
    let found = tx
        .read()
        .locking_node_unique_index_seek(&index, &mut cursor, &email("nobody@example.com"))?;
    assert_eq!(found, None);
    assert!(tx.locks().holds(entry("nobody@example.com"), LockMode::Exclusive));

    let other = kernel.begin_tx()?;
    let mut other_cursor = NodeValueIndexCursor::new();
    let err = other
        .read()
        .locking_node_unique_index_seek(&index, &mut other_cursor, &email("nobody@example.com"))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::LockTimeout {
            mode: LockMode::Shared,
            ..
        }
    ));

    tx.rollback();
    let found = other
        .read()
        .locking_node_unique_index_seek(&index, &mut other_cursor, &email("nobody@example.com"))?;
    assert_eq!(found, None);
    Ok(())
}

#[test]
fn broken_index_fails_before_locking() -> Result<()> {
    let kernel = kernel();
    let index = kernel.create_index(IndexPrototype::unique(
        "person_email",
        SchemaDescriptor::for_label(PERSON, &[EMAIL]),
    ))?;
    kernel.mark_index_failed(index.id(), "population aborted: out of space")?;

    let tx = kernel.begin_tx()?;
    let mut cursor = NodeValueIndexCursor::new();
    let err = tx
        .read()
        .locking_node_unique_index_seek(&index, &mut cursor, &email("a@example.com"))
        .unwrap_err();
    match err {
        Error::IndexUnavailable(IndexUnavailable::Broken { index: name, cause }) => {
            assert_eq!(name, "person_email");
            assert_eq!(cause, "population aborted: out of space");
        }
        other => panic!("unexpected error {other:?}"),
    }
    let snapshot = kernel.lock_snapshot();
    assert_eq!(snapshot.shared_acquired + snapshot.exclusive_acquired, 0);
    Ok(())
}

#[test]
fn dropped_index_is_not_found() -> Result<()> {
    let kernel = kernel();
    let index = email_index(&kernel)?;
    assert!(kernel.drop_index(index.id()));

    let tx = kernel.begin_tx()?;
    let mut cursor = NodeValueIndexCursor::new();
    let err = tx
        .read()
        .locking_node_unique_index_seek(&index, &mut cursor, &email("a@example.com"))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::IndexUnavailable(IndexUnavailable::NotFound { .. })
    ));
    assert_eq!(kernel.lock_snapshot().shared_acquired, 0);
    Ok(())
}

#[test]
fn predicate_mismatch_fails_before_locking() -> Result<()> {
    let kernel = kernel();
    let index = online_index(
        &kernel,
        IndexPrototype::unique(
            "person_name",
            SchemaDescriptor::for_label(PERSON, &[PropId(2), PropId(3)]),
        ),
    )?;

    let tx = kernel.begin_tx()?;
    let mut cursor = NodeValueIndexCursor::new();
    let err = tx
        .read()
        .locking_node_unique_index_seek(
            &index,
            &mut cursor,
            &[ExactPredicate::new(PropId(2), "Ada")],
        )
        .unwrap_err();
    match err {
        Error::PredicateSchemaMismatch(msg) => assert_eq!(
            msg,
            "the index specifies 2 properties, but only 1 lookup predicates were given"
        ),
        other => panic!("unexpected error {other:?}"),
    }

    let err = tx
        .read()
        .locking_node_unique_index_seek(
            &index,
            &mut cursor,
            &[
                ExactPredicate::new(PropId(3), "Lovelace"),
                ExactPredicate::new(PropId(2), "Ada"),
            ],
        )
        .unwrap_err();
    match err {
        Error::PredicateSchemaMismatch(msg) => assert_eq!(
            msg,
            "the index has property id 2 in position 0, but the lookup property id was 3"
        ),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(kernel.lock_snapshot().shared_acquired, 0);
    Ok(())
}

#[test]
fn multi_token_index_is_unsupported() -> Result<()> {
    let kernel = kernel();
    let index = online_index(
        &kernel,
        IndexPrototype::unique(
            "any_email",
            SchemaDescriptor::multi_token(EntityType::Node, &[1, 2], &[EMAIL]),
        ),
    )?;
    let tx = kernel.begin_tx()?;
    let mut cursor = NodeValueIndexCursor::new();
    let err = tx
        .read()
        .locking_node_unique_index_seek(&index, &mut cursor, &email("a@example.com"))
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedIndexShape(_)));
    assert_eq!(kernel.lock_snapshot().shared_acquired, 0);
    Ok(())
}

#[test]
fn multi_token_unique_insert_is_unsupported() -> Result<()> {
    let kernel = kernel();
    let index = online_index(
        &kernel,
        IndexPrototype::unique(
            "any_email",
            SchemaDescriptor::multi_token(EntityType::Node, &[1, 2], &[EMAIL]),
        ),
    )?;
    let mut tx = kernel.begin_tx()?;
    let node = tx.create_node()?;
    let err = tx
        .index_insert(&index, node, vec![Value::from("a@example.com")])
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedIndexShape(_)));
    assert_eq!(kernel.lock_snapshot().exclusive_acquired, 0);
    tx.commit()?;
    assert_eq!(kernel.index_store().key_count(&index)?, 0);
    Ok(())
}

#[test]
fn blocked_seeker_observes_committed_insert() -> Result<()> {
    let kernel = kernel();
    let index = email_index(&kernel)?;

    let mut first = kernel.begin_tx()?;
    let mut cursor = NodeValueIndexCursor::new();
    let found = first
        .read()
        .locking_node_unique_index_seek(&index, &mut cursor, &email("race@example.com"))?;
    assert_eq!(found, None);

    let seeker_kernel = kernel.clone();
    let seeker_index = index.clone();
    let seeker = thread::spawn(move || -> Result<Option<NodeId>> {
        let tx = seeker_kernel.begin_tx()?;
        let mut cursor = NodeValueIndexCursor::new();
        let found = tx.read().locking_node_unique_index_seek(
            &seeker_index,
            &mut cursor,
            &email("race@example.com"),
        )?;
        let held_shared = tx.locks().holds(entry("race@example.com"), LockMode::Shared);
        assert!(held_shared);
        tx.commit()?;
        Ok(found)
    });

    while kernel.lock_snapshot().waiting == 0 {
        thread::sleep(Duration::from_millis(2));
    }
    let node = first.create_node()?;
    first.index_insert(&index, node, vec![Value::from("race@example.com")])?;
    first.commit()?;

    assert_eq!(seeker.join().unwrap()?, Some(node));
    assert_eq!(kernel.lock_snapshot().resources_locked, 0);
    Ok(())
}

#[test]
fn repeated_seeks_for_present_key_stay_shared() -> Result<()> {
    let kernel = kernel();
    let index = email_index(&kernel)?;
    let node = insert_committed(&kernel, &index, "same@example.com")?;
    let before = kernel.lock_snapshot();

    let tx = kernel.begin_tx()?;
    let mut cursor = NodeValueIndexCursor::new();
    for _ in 0..5 {
        let found = tx.read().locking_node_unique_index_seek(
            &index,
            &mut cursor,
            &email("same@example.com"),
        )?;
        assert_eq!(found, Some(node));
    }
    let after = kernel.lock_snapshot();
    assert_eq!(after.exclusive_acquired, before.exclusive_acquired);
    assert_eq!(after.shared_acquired - before.shared_acquired, 5);
    Ok(())
}

#[test]
fn reader_failure_after_lock_keeps_lock_until_tx_end() -> Result<()> {
    let kernel = kernel();
    let index = email_index(&kernel)?;
    // Catalog still reports the index online; only its storage is gone.
    assert!(kernel.index_store().drop_index(index.id()));

    let tx = kernel.begin_tx()?;
    let mut cursor = NodeValueIndexCursor::new();
    let err = tx
        .read()
        .locking_node_unique_index_seek(&index, &mut cursor, &email("a@example.com"))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::IndexUnavailable(IndexUnavailable::NotFound { .. })
    ));
    assert!(tx.locks().holds(entry("a@example.com"), LockMode::Shared));
    tx.rollback();
    assert_eq!(kernel.lock_snapshot().resources_locked, 0);
    Ok(())
}

#[test]
fn relationship_unique_seek_follows_same_protocol() -> Result<()> {
    let kernel = kernel();
    let index = online_index(
        &kernel,
        IndexPrototype::unique(
            "transfer_ref",
            SchemaDescriptor::for_rel_type(TypeId(9), &[PropId(4)]),
        ),
    )?;
    let reference = [ExactPredicate::new(PropId(4), 77_i64)];

    let mut tx = kernel.begin_tx()?;
    let mut cursor = RelationshipValueIndexCursor::new();
    assert_eq!(
        tx.read()
            .locking_relationship_unique_index_seek(&index, &mut cursor, &reference)?,
        None
    );
    let edge = tx.create_relationship()?;
    tx.index_insert(&index, edge, vec![Value::Int(77)])?;
    tx.commit()?;

    let tx = kernel.begin_tx()?;
    assert_eq!(
        tx.read()
            .locking_relationship_unique_index_seek(&index, &mut cursor, &reference)?,
        Some(edge)
    );

    let mut node_cursor = NodeValueIndexCursor::new();
    let err = tx
        .read()
        .locking_node_unique_index_seek(&index, &mut node_cursor, &reference)
        .unwrap_err();
    assert!(matches!(err, Error::IndexNotApplicable(_)));
    Ok(())
}

#[test]
fn nan_lookup_is_rejected() -> Result<()> {
    let kernel = kernel();
    let index = email_index(&kernel)?;
    let tx = kernel.begin_tx()?;
    let mut cursor = NodeValueIndexCursor::new();
    let err = tx
        .read()
        .locking_node_unique_index_seek(
            &index,
            &mut cursor,
            &[ExactPredicate::new(EMAIL, f64::NAN)],
        )
        .unwrap_err();
    assert!(matches!(err, Error::Invalid(_)));
    Ok(())
}
