//! Transaction Lifecycle Tests
//!
//! Creation, joining, removal and manager shutdown.

use crate::common::*;
use relistore::{TransactionKind, INFINITE_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn read_write_join_is_idempotent() {
    let manager = open_transaction_manager().await;
    let (created, existed) = manager.create_read_write(AtomicGroupId(42)).unwrap();
    assert!(!existed);
    let (joined, existed) = manager.create_read_write(AtomicGroupId(42)).unwrap();
    assert!(existed);

    assert!(Arc::ptr_eq(&created, &joined));
    assert_eq!(created.kind(), TransactionKind::ReadWrite(AtomicGroupId(42)));
    assert_eq!(manager.active_count(), 1);
    assert_eq!(
        manager.get_read_write(AtomicGroupId(42)).unwrap().id(),
        created.id()
    );
    assert!(manager.get_read_write(AtomicGroupId(43)).is_none());
}

#[tokio::test]
async fn read_only_transactions_are_untracked() {
    let manager = open_transaction_manager().await;
    let reader = manager.create_read_only().unwrap();
    assert!(reader.is_read_only());
    assert!(reader.atomic_group_id().is_none());
    assert_eq!(manager.active_count(), 0);

    reader.lock("A", LockMode::Shared, SHORT_TIMEOUT).await.unwrap();
    assert!(matches!(
        reader.lock("A", LockMode::Exclusive, SHORT_TIMEOUT).await,
        Err(Error::InvalidArgument(_))
    ));
    manager.remove(&reader);
    assert!(reader.is_terminated());
    assert!(manager.lock_manager().is_drained());
}

#[tokio::test]
async fn removal_releases_locks_and_ends_transaction() {
    let manager = open_transaction_manager().await;
    let (txn, _) = manager.create_read_write(AtomicGroupId(7)).unwrap();
    txn.lock("A", LockMode::Exclusive, SHORT_TIMEOUT).await.unwrap();
    txn.lock("B", LockMode::Shared, SHORT_TIMEOUT).await.unwrap();
    assert_eq!(txn.locks_held(), 2);

    manager.remove_by_group(AtomicGroupId(7));
    assert_eq!(manager.active_count(), 0);
    assert_eq!(txn.locks_held(), 0);
    assert!(matches!(
        txn.lock("A", LockMode::Shared, SHORT_TIMEOUT).await,
        Err(Error::AlreadyClosed(_))
    ));

    // a new transaction for the same group starts fresh
    let (fresh, existed) = manager.create_read_write(AtomicGroupId(7)).unwrap();
    assert!(!existed);
    assert_ne!(fresh.id(), txn.id());
    fresh.lock("A", LockMode::Exclusive, Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn stale_handle_does_not_remove_successor() {
    let manager = open_transaction_manager().await;
    let (old, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();
    manager.remove(&old);
    let (current, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();

    manager.remove(&old);
    assert_eq!(manager.active_count(), 1);
    assert!(!current.is_terminated());
}

#[tokio::test]
async fn closed_manager_rejects_new_work() {
    let manager = open_transaction_manager().await;
    let (txn, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();
    manager.close().await.unwrap();
    manager.close().await.unwrap();

    assert!(!manager.is_open());
    assert!(matches!(manager.create_read_only(), Err(Error::AlreadyClosed(_))));
    assert!(matches!(
        manager.create_read_write(AtomicGroupId(2)),
        Err(Error::AlreadyClosed(_))
    ));
    assert!(matches!(
        txn.lock("A", LockMode::Shared, SHORT_TIMEOUT).await,
        Err(Error::AlreadyClosed(_))
    ));
}

#[tokio::test]
async fn open_twice_is_rejected() {
    let manager = open_transaction_manager().await;
    assert!(matches!(manager.open().await, Err(Error::InvalidArgument(_))));
    assert_eq!(manager.owner(), ReplicaId(1));
}

#[tokio::test]
async fn close_leaves_waiters_to_be_resolved_by_removal() {
    let manager = Arc::new(open_transaction_manager().await);
    let (holder, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();
    let (waiter, _) = manager.create_read_write(AtomicGroupId(2)).unwrap();
    holder.lock("A", LockMode::Exclusive, SHORT_TIMEOUT).await.unwrap();

    let blocked = {
        let waiter = Arc::clone(&waiter);
        tokio::spawn(async move { waiter.lock("A", LockMode::Exclusive, INFINITE_TIMEOUT).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    manager.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());
    assert_eq!(holder.locks_held(), 1);

    manager.remove(&holder);
    let lock = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(lock.owner(), waiter.id());

    manager.remove(&waiter);
    tokio::time::timeout(Duration::from_secs(1), manager.lock_manager().wait_drained())
        .await
        .unwrap();
}

#[tokio::test]
async fn cancellation_aborts_a_wait() {
    let manager = open_transaction_manager().await;
    let (holder, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();
    let (waiter, _) = manager.create_read_write(AtomicGroupId(2)).unwrap();
    holder.lock("A", LockMode::Exclusive, SHORT_TIMEOUT).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let result = waiter
        .lock_with_cancellation("A", LockMode::Shared, INFINITE_TIMEOUT, &cancel)
        .await;
    assert!(matches!(result, Err(Error::OperationCancelled)));
    assert!(manager
        .lock_manager()
        .resource_snapshot("A")
        .unwrap()
        .waiters
        .is_empty());
}
