//! Stress Tests
//!
//! Many transactions contending for a handful of resources.

use crate::common::*;
use rand::Rng;
use relistore::INFINITE_TIMEOUT;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

const RESOURCES: usize = 4;

#[derive(Default)]
struct Occupancy {
    readers: AtomicI64,
    writers: AtomicI64,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_shared_and_exclusive_keep_mutual_exclusion() {
    let manager = Arc::new(open_transaction_manager().await);
    let occupancy: Arc<Vec<Occupancy>> =
        Arc::new((0..RESOURCES).map(|_| Occupancy::default()).collect());

    let mut handles = Vec::new();
    for i in 0..100i64 {
        let manager = Arc::clone(&manager);
        let occupancy = Arc::clone(&occupancy);
        handles.push(tokio::spawn(async move {
            let read_only = i % 5 == 0;
            let txn = if read_only {
                manager.create_read_only().unwrap()
            } else {
                manager.create_read_write(AtomicGroupId(i)).unwrap().0
            };

            for _ in 0..10 {
                let (r, exclusive) = {
                    let mut rng = rand::thread_rng();
                    (rng.gen_range(0..RESOURCES), !read_only && rng.gen_bool(0.3))
                };
                let mode = if exclusive { LockMode::Exclusive } else { LockMode::Shared };
                let lock = txn
                    .lock(&format!("res-{}", r), mode, INFINITE_TIMEOUT)
                    .await
                    .unwrap();

                let slot = &occupancy[r];
                if exclusive {
                    assert_eq!(slot.writers.fetch_add(1, Ordering::SeqCst), 0);
                    assert_eq!(slot.readers.load(Ordering::SeqCst), 0);
                } else {
                    slot.readers.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(slot.writers.load(Ordering::SeqCst), 0);
                }
                tokio::task::yield_now().await;
                if exclusive {
                    slot.writers.fetch_sub(1, Ordering::SeqCst);
                } else {
                    slot.readers.fetch_sub(1, Ordering::SeqCst);
                }

                txn.unlock(&lock).unwrap();
            }
            manager.remove(&txn);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(manager.active_count(), 0);
    assert!(manager.lock_manager().is_drained());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timeouts_under_contention_leave_no_residue() {
    let manager = Arc::new(open_transaction_manager().await);
    let (holder, _) = manager.create_read_write(AtomicGroupId(-1)).unwrap();
    holder.lock("hot", LockMode::Exclusive, SHORT_TIMEOUT).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..50i64 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            let (txn, _) = manager.create_read_write(AtomicGroupId(i)).unwrap();
            let result = txn
                .lock("hot", LockMode::Shared, std::time::Duration::from_millis(20))
                .await;
            manager.remove(&txn);
            result
        }));
    }
    for handle in handles {
        assert!(matches!(handle.await.unwrap(), Err(Error::LockTimeout { .. })));
    }

    let snapshot = manager.lock_manager().resource_snapshot("hot").unwrap();
    assert!(snapshot.waiters.is_empty());
    assert_eq!(snapshot.holders.len(), 1);
    manager.remove(&holder);
    assert!(manager.lock_manager().is_drained());
}
