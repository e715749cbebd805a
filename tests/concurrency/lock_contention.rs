//! Lock Contention Tests
//!
//! Compatibility between owners, timeouts, and release by transaction removal.

use crate::common::*;
use relistore::{LockStatus, INFINITE_TIMEOUT};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn exclusive_times_out_until_holder_removed() {
    let manager = open_transaction_manager().await;
    let (txn1, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();
    let (txn2, _) = manager.create_read_write(AtomicGroupId(2)).unwrap();

    txn1.lock("A", LockMode::Exclusive, SHORT_TIMEOUT).await.unwrap();
    let err = txn2
        .lock("A", LockMode::Exclusive, SHORT_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LockTimeout { .. }));
    assert!(err.is_retryable());

    manager.remove(&txn1);
    let lock = txn2.lock("A", LockMode::Exclusive, SHORT_TIMEOUT).await.unwrap();
    assert_eq!(lock.status(), LockStatus::Granted);
}

#[tokio::test]
async fn shared_and_intent_exclusive_coexist() {
    let manager = open_transaction_manager().await;
    let (a, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();
    let (b, _) = manager.create_read_write(AtomicGroupId(2)).unwrap();
    let (c, _) = manager.create_read_write(AtomicGroupId(3)).unwrap();

    a.lock("S", LockMode::Shared, Duration::ZERO).await.unwrap();
    b.lock("S", LockMode::Shared, Duration::ZERO).await.unwrap();
    a.lock("IX", LockMode::IntentExclusive, Duration::ZERO).await.unwrap();
    b.lock("IX", LockMode::IntentExclusive, Duration::ZERO).await.unwrap();

    for resource in ["S", "IX"] {
        assert!(matches!(
            c.lock(resource, LockMode::Exclusive, SHORT_TIMEOUT).await,
            Err(Error::LockTimeout { .. })
        ));
    }
}

#[tokio::test]
async fn removal_unblocks_waiter() {
    let manager = Arc::new(open_transaction_manager().await);
    let (holder, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();
    let (waiter, _) = manager.create_read_write(AtomicGroupId(2)).unwrap();
    holder.lock("A", LockMode::Exclusive, SHORT_TIMEOUT).await.unwrap();

    let blocked = {
        let waiter = Arc::clone(&waiter);
        tokio::spawn(async move { waiter.lock("A", LockMode::Shared, INFINITE_TIMEOUT).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!blocked.is_finished());

    manager.remove_by_group(AtomicGroupId(1));
    let lock = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(lock.owner(), waiter.id());
}

#[tokio::test]
async fn removing_a_waiter_aborts_its_request() {
    let manager = Arc::new(open_transaction_manager().await);
    let (holder, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();
    let (waiter, _) = manager.create_read_write(AtomicGroupId(2)).unwrap();
    holder.lock("A", LockMode::Exclusive, SHORT_TIMEOUT).await.unwrap();

    let blocked = {
        let waiter = Arc::clone(&waiter);
        tokio::spawn(async move { waiter.lock("A", LockMode::Exclusive, INFINITE_TIMEOUT).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.remove(&waiter);

    let result = tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::OperationCancelled)));
    assert_eq!(holder.locks_held(), 1);
}

#[tokio::test]
async fn waiters_are_granted_in_arrival_order() {
    let manager = Arc::new(open_transaction_manager().await);
    let (holder, _) = manager.create_read_write(AtomicGroupId(0)).unwrap();
    let first_lock = holder.lock("A", LockMode::Exclusive, SHORT_TIMEOUT).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for group in 1..=3 {
        let (txn, _) = manager.create_read_write(AtomicGroupId(group)).unwrap();
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            let lock = txn.lock("A", LockMode::Exclusive, INFINITE_TIMEOUT).await.unwrap();
            order.lock().push(group);
            txn.unlock(&lock).unwrap();
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    holder.unlock(&first_lock).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock(), vec![1, 2, 3]);
}

