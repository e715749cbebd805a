//! Transaction manager
//!
//! Creates and tracks transaction handles for one replica and owns the lock
//! manager they share.
//!
//! ## Lifecycle
//!
//! ```text
//! new(owner) -> open() -> create_* / get_read_write / remove* -> close()
//! ```
//!
//! - Read-write transactions are keyed by [`AtomicGroupId`]; creating one for
//!   a group that already has a live transaction returns that transaction
//! - `remove` unregisters a transaction and force-releases its locks; it
//!   never fails, even for a transaction removed before
//! - `close` stops new transactions and lock requests but does not wait on
//!   held locks or cancel suspended waiters; a concurrent `remove` is what
//!   unblocks them

use crate::lock::LockManager;
use crate::transaction::{Transaction, TransactionKind};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relistore_core::{AtomicGroupId, Error, ReplicaId, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Manages transaction lifecycle for one replica
pub struct TransactionManager {
    owner: ReplicaId,
    lock_manager: Arc<LockManager>,
    /// Live read-write transactions
    transactions: DashMap<AtomicGroupId, Arc<Transaction>>,
    open: AtomicBool,
}

impl TransactionManager {
    /// Create a closed manager for `owner`
    pub fn new(owner: ReplicaId) -> Self {
        TransactionManager {
            owner,
            lock_manager: Arc::new(LockManager::new()),
            transactions: DashMap::new(),
            open: AtomicBool::new(false),
        }
    }

    /// Start accepting transactions
    pub async fn open(&self) -> Result<()> {
        if self.open.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidArgument(format!(
                "transaction manager of replica {} is already open",
                self.owner
            )));
        }
        self.lock_manager.open(self.owner);
        tracing::info!(owner = %self.owner, "Transaction manager opened");
        Ok(())
    }

    /// Stop accepting transactions and lock requests
    ///
    /// Returns without waiting for held locks. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.lock_manager.close();
        tracing::info!(
            owner = %self.owner,
            live = self.transactions.len(),
            "Transaction manager closed"
        );
        Ok(())
    }

    /// Whether new transactions are accepted
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::AlreadyClosed(format!(
                "transaction manager of replica {}",
                self.owner
            )))
        }
    }

    /// Create a read-only transaction
    ///
    /// Read-only transactions are not tracked; end them with
    /// [`Transaction::terminate`] or [`remove`](Self::remove).
    pub fn create_read_only(&self) -> Result<Arc<Transaction>> {
        self.ensure_open()?;
        let txn = Transaction::new(TransactionKind::ReadOnly, self.lock_manager.clone());
        tracing::trace!(txn = %txn.id(), "Read-only transaction created");
        Ok(txn)
    }

    /// Create or join the read-write transaction of `group`
    ///
    /// # Returns
    /// The transaction and whether it already existed.
    pub fn create_read_write(&self, group: AtomicGroupId) -> Result<(Arc<Transaction>, bool)> {
        self.ensure_open()?;
        match self.transactions.entry(group) {
            Entry::Occupied(entry) => Ok((entry.get().clone(), true)),
            Entry::Vacant(entry) => {
                let txn = Transaction::new(
                    TransactionKind::ReadWrite(group),
                    self.lock_manager.clone(),
                );
                entry.insert(txn.clone());
                tracing::debug!(txn = %txn.id(), %group, "Read-write transaction created");
                Ok((txn, false))
            }
        }
    }

    /// Live read-write transaction of `group`
    pub fn get_read_write(&self, group: AtomicGroupId) -> Option<Arc<Transaction>> {
        self.transactions.get(&group).map(|entry| entry.value().clone())
    }

    /// Unregister `txn` and release all its locks
    pub fn remove(&self, txn: &Transaction) {
        if let Some(group) = txn.atomic_group_id() {
            self.transactions
                .remove_if(&group, |_, registered| registered.id() == txn.id());
        }
        txn.terminate();
    }

    /// Unregister the transaction of `group`, if any, and release its locks
    pub fn remove_by_group(&self, group: AtomicGroupId) {
        if let Some((_, txn)) = self.transactions.remove(&group) {
            txn.terminate();
        }
    }

    /// Number of live read-write transactions
    pub fn active_count(&self) -> usize {
        self.transactions.len()
    }

    /// Lock manager shared by this manager's transactions
    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Replica this manager belongs to
    pub fn owner(&self) -> ReplicaId {
        self.owner
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("owner", &self.owner)
            .field("open", &self.is_open())
            .field("active", &self.transactions.len())
            .finish()
    }
}
