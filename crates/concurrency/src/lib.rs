//! Concurrency layer for relistore
//!
//! This crate implements pessimistic concurrency control with:
//! - LockManager: named-resource lock table with Shared, IntentExclusive
//!   and Exclusive modes, timeouts, reentrancy and in-place upgrade
//! - Transaction: lock owner handle, read-only or read-write
//! - TransactionManager: read-write transactions keyed by atomic-group id
//!
//! The keyed store in `relistore-storage` does not take these locks itself.
//! Callers that need several store calls to be serializable fence them with
//! locks on resource names of their choosing.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lock;
pub mod manager;
pub mod transaction;

pub use lock::{
    Lock, LockControlBlock, LockInfo, LockManager, LockMode, LockStatus, ResourceSnapshot,
    UnlockStatus, WaiterInfo, INFINITE_TIMEOUT,
};
pub use manager::TransactionManager;
pub use transaction::{Transaction, TransactionKind};
