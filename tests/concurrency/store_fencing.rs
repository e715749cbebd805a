//! Locks Guarding Store Writes
//!
//! The store does not lock on its own; callers fence read-modify-write
//! sequences with transaction locks.

use crate::common::*;
use relistore::INFINITE_TIMEOUT;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn counter(n: i32) -> EncodedValue {
    EncodedValue::from(Int32Codec.encode(&n))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exclusive_lock_serializes_read_modify_write() {
    let manager = Arc::new(open_transaction_manager().await);
    let store = Arc::new(open_int32_store().await);
    let sequence = Arc::new(AtomicU64::new(1));
    let cancel = CancellationToken::new();
    store.insert(&key(0), counter(0), 0, &cancel).await.unwrap();

    let mut handles = Vec::new();
    for group in 0..20i64 {
        let (manager, store, sequence) =
            (Arc::clone(&manager), Arc::clone(&store), Arc::clone(&sequence));
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let (txn, _) = manager.create_read_write(AtomicGroupId(group)).unwrap();
            txn.lock("table", LockMode::IntentExclusive, INFINITE_TIMEOUT).await.unwrap();
            txn.lock("key/0", LockMode::Exclusive, INFINITE_TIMEOUT).await.unwrap();

            let current = store.seek(&key(0), &cancel).await.unwrap();
            let n = Int32Codec.decode(current.as_bytes().unwrap()).unwrap();
            tokio::task::yield_now().await;
            let seq = sequence.fetch_add(1, Ordering::SeqCst);
            store.update(&key(0), counter(n + 1), seq, &cancel).await.unwrap();

            manager.remove(&txn);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let value = store.seek(&key(0), &cancel).await.unwrap();
    assert_eq!(Int32Codec.decode(value.as_bytes().unwrap()).unwrap(), 20);
    assert_eq!(store.last_committed_sequence_number(), 20);
    assert!(manager.lock_manager().is_drained());
}

#[tokio::test]
async fn table_exclusive_blocks_intent_writers() {
    let manager = open_transaction_manager().await;
    let (admin, _) = manager.create_read_write(AtomicGroupId(100)).unwrap();
    let (writer, _) = manager.create_read_write(AtomicGroupId(1)).unwrap();

    admin.lock("table", LockMode::Exclusive, SHORT_TIMEOUT).await.unwrap();
    assert!(matches!(
        writer.lock("table", LockMode::IntentExclusive, SHORT_TIMEOUT).await,
        Err(Error::LockTimeout { .. })
    ));
    manager.remove(&admin);
    writer
        .lock("table", LockMode::IntentExclusive, SHORT_TIMEOUT)
        .await
        .unwrap();
}
