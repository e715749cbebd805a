//! Lock Upgrade Tests
//!
//! A holder asking for a stronger mode converts its lock in place once the
//! other holders allow it.

use crate::common::*;
use relistore::{UnlockStatus, INFINITE_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn sole_holder_upgrades_immediately() {
    let manager = open_transaction_manager().await;
    let (txn, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();

    let shared = txn.lock("A", LockMode::Shared, SHORT_TIMEOUT).await.unwrap();
    let exclusive = txn.lock("A", LockMode::Exclusive, Duration::ZERO).await.unwrap();
    assert!(Arc::ptr_eq(&shared, &exclusive));
    assert_eq!(exclusive.mode(), LockMode::Exclusive);
    assert!(exclusive.is_upgraded());
    assert_eq!(exclusive.count(), 2);
}

#[tokio::test]
async fn upgrade_waits_for_other_shared_holder() {
    let manager = Arc::new(open_transaction_manager().await);
    let (t1, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();
    let (t2, _) = manager.create_read_write(AtomicGroupId(2)).unwrap();

    t1.lock("A", LockMode::Shared, SHORT_TIMEOUT).await.unwrap();
    let t2_shared = t2.lock("A", LockMode::Shared, SHORT_TIMEOUT).await.unwrap();

    assert!(matches!(
        t1.lock("A", LockMode::Exclusive, SHORT_TIMEOUT).await,
        Err(Error::LockTimeout { .. })
    ));

    let upgrading = {
        let t1 = Arc::clone(&t1);
        tokio::spawn(async move { t1.lock("A", LockMode::Exclusive, INFINITE_TIMEOUT).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    let snapshot = manager.lock_manager().resource_snapshot("A").unwrap();
    assert_eq!(snapshot.waiters.len(), 1);
    assert!(snapshot.waiters[0].upgrade);

    assert_eq!(t2.unlock(&t2_shared).unwrap(), UnlockStatus::Success);
    let lock = tokio::time::timeout(Duration::from_secs(1), upgrading)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(lock.mode(), LockMode::Exclusive);
    assert!(lock.is_upgraded());
    assert_eq!(lock.owner(), t1.id());
}

#[tokio::test]
async fn upgrade_jumps_ahead_of_new_requests() {
    let manager = Arc::new(open_transaction_manager().await);
    let (t1, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();
    let (t2, _) = manager.create_read_write(AtomicGroupId(2)).unwrap();
    let (t3, _) = manager.create_read_write(AtomicGroupId(3)).unwrap();

    t1.lock("A", LockMode::Shared, SHORT_TIMEOUT).await.unwrap();
    let t2_shared = t2.lock("A", LockMode::Shared, SHORT_TIMEOUT).await.unwrap();

    let newcomer = {
        let t3 = Arc::clone(&t3);
        tokio::spawn(async move { t3.lock("A", LockMode::Exclusive, INFINITE_TIMEOUT).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let upgrading = {
        let t1 = Arc::clone(&t1);
        tokio::spawn(async move { t1.lock("A", LockMode::Exclusive, INFINITE_TIMEOUT).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let waiters = manager.lock_manager().resource_snapshot("A").unwrap().waiters;
    assert_eq!(waiters.len(), 2);
    assert_eq!(waiters[0].owner, t1.id());
    assert_eq!(waiters[1].owner, t3.id());

    t2.unlock(&t2_shared).unwrap();
    upgrading.await.unwrap().unwrap();
    assert!(!newcomer.is_finished());

    manager.remove(&t1);
    let lock = tokio::time::timeout(Duration::from_secs(1), newcomer)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(lock.owner(), t3.id());
}

#[tokio::test]
async fn intent_exclusive_upgrades_to_exclusive() {
    let manager = open_transaction_manager().await;
    let (txn, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();
    let (other, _) = manager.create_read_write(AtomicGroupId(2)).unwrap();

    let lock = txn.lock("T", LockMode::IntentExclusive, SHORT_TIMEOUT).await.unwrap();
    let other_lock = other.lock("T", LockMode::IntentExclusive, SHORT_TIMEOUT).await.unwrap();
    assert!(matches!(
        txn.lock("T", LockMode::Exclusive, Duration::ZERO).await,
        Err(Error::LockTimeout { .. })
    ));
    assert_eq!(lock.mode(), LockMode::IntentExclusive);

    other.unlock(&other_lock).unwrap();
    txn.lock("T", LockMode::Exclusive, Duration::ZERO).await.unwrap();
    assert_eq!(lock.mode(), LockMode::Exclusive);
}

#[tokio::test]
async fn unlocking_the_base_hold_cancels_a_waiting_upgrade() {
    let manager = Arc::new(open_transaction_manager().await);
    let (t1, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();
    let (t2, _) = manager.create_read_write(AtomicGroupId(2)).unwrap();
    let (t3, _) = manager.create_read_write(AtomicGroupId(3)).unwrap();

    let t1_shared = t1.lock("A", LockMode::Shared, SHORT_TIMEOUT).await.unwrap();
    let t2_shared = t2.lock("A", LockMode::Shared, SHORT_TIMEOUT).await.unwrap();

    let upgrading = {
        let t1 = Arc::clone(&t1);
        tokio::spawn(async move { t1.lock("A", LockMode::Exclusive, INFINITE_TIMEOUT).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    t1.unlock(&t1_shared).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), upgrading)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::OperationCancelled)));

    t2.unlock(&t2_shared).unwrap();
    let reader = t3.lock("A", LockMode::Shared, Duration::ZERO).await.unwrap();
    assert_eq!(reader.mode(), LockMode::Shared);
    assert_eq!(t1.locks_held(), 0);
}
