//! Transaction handles
//!
//! A transaction is the owner of its locks. Read-only transactions take
//! Shared locks only; read-write transactions are keyed by an atomic-group id
//! in the [`TransactionManager`](crate::TransactionManager).
//!
//! Terminating a transaction force-releases every lock it holds and aborts
//! its queued requests. A request granted concurrently with termination is
//! released again and fails with `AlreadyClosed`.

use crate::lock::{Lock, LockManager, LockMode, UnlockStatus};
use relistore_core::{AtomicGroupId, CancellationToken, Error, Result, TransactionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Kind of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Ephemeral, Shared locks only
    ReadOnly,
    /// Joined by atomic-group id
    ReadWrite(AtomicGroupId),
}

/// Handle to a live transaction
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    kind: TransactionKind,
    lock_manager: Arc<LockManager>,
    terminated: AtomicBool,
}

impl Transaction {
    pub(crate) fn new(kind: TransactionKind, lock_manager: Arc<LockManager>) -> Arc<Self> {
        Arc::new(Self {
            id: TransactionId::new(),
            kind,
            lock_manager,
            terminated: AtomicBool::new(false),
        })
    }

    /// Lock owner id
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Read-only or read-write
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Atomic-group id of a read-write transaction
    pub fn atomic_group_id(&self) -> Option<AtomicGroupId> {
        match self.kind {
            TransactionKind::ReadOnly => None,
            TransactionKind::ReadWrite(group) => Some(group),
        }
    }

    /// Check if this is a read-only transaction
    pub fn is_read_only(&self) -> bool {
        self.kind == TransactionKind::ReadOnly
    }

    /// Whether [`terminate`](Self::terminate) has run
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> Error {
        Error::AlreadyClosed(format!("transaction {}", self.id))
    }

    /// Acquire `resource` in `mode`, waiting up to `timeout`
    pub async fn lock(&self, resource: &str, mode: LockMode, timeout: Duration) -> Result<Lock> {
        self.lock_with_cancellation(resource, mode, timeout, &CancellationToken::new())
            .await
    }

    /// Acquire `resource` in `mode`, waiting up to `timeout` unless `cancel` fires
    ///
    /// # Errors
    /// `InvalidArgument` for a non-Shared request on a read-only transaction;
    /// `AlreadyClosed` once the transaction is terminated; otherwise as
    /// [`LockManager::acquire`].
    pub async fn lock_with_cancellation(
        &self,
        resource: &str,
        mode: LockMode,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Lock> {
        if self.is_read_only() && !mode.is_shared() {
            return Err(Error::InvalidArgument(format!(
                "read-only transaction {} cannot lock '{}' in {} mode",
                self.id, resource, mode
            )));
        }
        if self.is_terminated() {
            return Err(self.closed_error());
        }

        let lock = self
            .lock_manager
            .acquire(self.id, resource, mode, timeout, cancel)
            .await?;

        if self.is_terminated() {
            self.lock_manager.force_release_all(self.id);
            return Err(self.closed_error());
        }
        Ok(lock)
    }

    /// Release one acquisition of a lock this transaction owns
    ///
    /// # Errors
    /// `InvalidArgument` if `lock` belongs to another transaction.
    pub fn unlock(&self, lock: &Lock) -> Result<UnlockStatus> {
        if lock.owner() != self.id {
            return Err(Error::InvalidArgument(format!(
                "lock on '{}' is owned by {}, not {}",
                lock.resource(),
                lock.owner(),
                self.id
            )));
        }
        Ok(self.lock_manager.release(lock))
    }

    /// Release every lock and refuse further requests
    ///
    /// # Returns
    /// Number of locks released; 0 on repeated calls.
    pub fn terminate(&self) -> usize {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let released = self.lock_manager.force_release_all(self.id);
        tracing::debug!(txn = %self.id, kind = ?self.kind, released, "Transaction terminated");
        released
    }

    /// Resources currently locked by this transaction
    pub fn locks_held(&self) -> usize {
        self.lock_manager.held_count(self.id)
    }
}
