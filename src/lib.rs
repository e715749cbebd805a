//! Relistore - transactional keyed storage core
//!
//! Relistore pairs an ordered key/value store that emits redo/undo log
//! records for every mutation with a pessimistic lock manager and a
//! transaction manager.
//!
//! # Quick Start
//!
//! ```no_run
//! use relistore::{
//!     AtomicGroupId, BtreeConfiguration, BtreeStore, CancellationToken, EncodedValue,
//!     KeyComparisonDescription, KeyDataType, LockMode, ReplicaId, TransactionManager,
//! };
//! use std::time::Duration;
//!
//! # async fn run() -> relistore::Result<()> {
//! let cancel = CancellationToken::new();
//! let store = BtreeStore::open(
//!     BtreeConfiguration::volatile(KeyComparisonDescription::for_type(KeyDataType::Binary)),
//!     false,
//!     &cancel,
//! )
//! .await?;
//!
//! let transactions = TransactionManager::new(ReplicaId(1));
//! transactions.open().await?;
//! let (txn, _) = transactions.create_read_write(AtomicGroupId(42))?;
//!
//! // fence the key, mutate, ship the redo record, release
//! let lock = txn.lock("accounts/7", LockMode::Exclusive, Duration::from_secs(1)).await?;
//! let log = store.insert(b"accounts/7", EncodedValue::from(b"100".to_vec()), 1, &cancel).await?;
//! # let _ = log;
//! txn.unlock(&lock)?;
//! transactions.remove(&txn);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - `relistore-core`: errors, identifiers, cancellation
//! - `relistore-storage`: keyed store, log records, codecs, checkpoints
//! - `relistore-concurrency`: lock manager and transactions
//!
//! The store and the lock manager are independent; callers compose them.

pub use relistore_concurrency::{
    Lock, LockInfo, LockManager, LockMode, LockStatus, Transaction, TransactionKind,
    TransactionManager, UnlockStatus, INFINITE_TIMEOUT,
};
pub use relistore_core::{
    AtomicGroupId, CancellationToken, Error, ErrorKind, PartitionId, ReplicaId, Result,
    SequenceNumber, TransactionId,
};
pub use relistore_storage::codec;
pub use relistore_storage::{
    Btree, BtreeConfiguration, BtreeOperation, BtreeScan, BtreeStatistics,
    BtreeStorageConfiguration, BtreeStore, CopyStream, EncodedValue, KeyComparisonDescription,
    KeyDataType, OperationData, OperationType, RedoUndo, ScanItem, TypedOperation,
};
