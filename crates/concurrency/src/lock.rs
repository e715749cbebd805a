//! Named-resource lock manager
//!
//! Pessimistic locks over caller-chosen resource names, with hierarchical
//! modes and timeout-bounded asynchronous acquisition.
//!
//! ## Compatibility
//!
//! ```text
//!                  held: Shared  IntentExclusive  Exclusive
//! Shared                 yes     yes              no
//! IntentExclusive        yes     yes              no
//! Exclusive              no      no               no
//! ```
//!
//! Compatibility is checked against the strongest mode held by *other*
//! owners, so an owner never blocks on itself.
//!
//! ## Acquisition
//!
//! - Same owner, mode already covered: reentrant, hold count + 1
//! - Same owner, stronger mode: upgrade in place when compatible, otherwise
//!   queued ahead of every non-upgrade waiter
//! - New owner: granted if nobody is queued and the mode is compatible,
//!   otherwise queued FIFO
//!
//! Waiters are woken in FIFO order on release, stopping at the first one
//! that is still incompatible. A waiter leaves the queue on grant, timeout,
//! cancellation, forced release of its owner, or when its future is dropped.
//!
//! ## Synchronization
//!
//! The resource table sits behind one `parking_lot::Mutex`. It is never held
//! across an `.await`; a suspended acquire waits on a oneshot channel that the
//! granting side completes while holding the table lock.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use relistore_core::{check_cancelled, CancellationToken, Error, ReplicaId, Result, TransactionId};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

/// Timeout that waits until the lock is granted
pub const INFINITE_TIMEOUT: Duration = Duration::MAX;

/// Lock modes, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LockMode {
    /// Nothing held
    Free,
    /// Read access
    Shared,
    /// Intent to take exclusive locks lower in a resource hierarchy
    IntentExclusive,
    /// Sole access
    Exclusive,
}

impl LockMode {
    fn rank(self) -> u8 {
        match self {
            LockMode::Free => 0,
            LockMode::Shared => 1,
            LockMode::IntentExclusive => 2,
            LockMode::Exclusive => 3,
        }
    }

    /// Whether a request in this mode can be granted next to `held`
    pub fn is_compatible_with(self, held: LockMode) -> bool {
        match (self, held) {
            (LockMode::Free, _) | (_, LockMode::Free) => true,
            (LockMode::Exclusive, _) | (_, LockMode::Exclusive) => false,
            _ => true,
        }
    }

    /// Whether holding this mode already satisfies a request for `requested`
    pub fn covers(self, requested: LockMode) -> bool {
        self.rank() >= requested.rank()
    }

    /// The stronger of two modes
    pub fn strongest(self, other: LockMode) -> LockMode {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    /// Check if this is Shared mode
    pub fn is_shared(self) -> bool {
        self == LockMode::Shared
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockMode::Free => "Free",
            LockMode::Shared => "Shared",
            LockMode::IntentExclusive => "IntentExclusive",
            LockMode::Exclusive => "Exclusive",
        };
        f.write_str(name)
    }
}

/// Grant status of a lock
///
/// A released lock keeps `Granted`; its hold count tells whether it is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LockStatus {
    /// Queued, not yet granted
    Pending,
    /// Granted at least once
    Granted,
}

/// Result of [`LockManager::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockStatus {
    /// Hold count decremented
    Success,
    /// The lock is not currently granted on its resource
    NotGranted,
    /// The resource has no entry in the table
    UnknownResource,
}

#[derive(Debug, Clone)]
struct LockState {
    mode: LockMode,
    status: LockStatus,
    grant_time: Option<DateTime<Utc>>,
    count: u32,
    upgraded: bool,
}

/// Shared state of one owner's lock on one resource
///
/// Both the holder and the manager observe the same block through [`Lock`].
#[derive(Debug)]
pub struct LockControlBlock {
    owner: TransactionId,
    resource: String,
    timeout: Duration,
    state: Mutex<LockState>,
}

/// Handle to a lock
pub type Lock = Arc<LockControlBlock>;

/// Point-in-time view of a lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    /// Owning transaction
    pub owner: TransactionId,
    /// Resource name
    pub resource: String,
    /// Current (or last) mode
    pub mode: LockMode,
    /// Grant status
    pub status: LockStatus,
    /// When the lock was first granted
    pub grant_time: Option<DateTime<Utc>>,
    /// Outstanding acquisitions
    pub count: u32,
    /// Whether the lock was upgraded in place
    pub upgraded: bool,
}

impl LockControlBlock {
    fn pending(owner: TransactionId, resource: &str, mode: LockMode, timeout: Duration) -> Lock {
        Arc::new(Self {
            owner,
            resource: resource.to_string(),
            timeout,
            state: Mutex::new(LockState {
                mode,
                status: LockStatus::Pending,
                grant_time: None,
                count: 0,
                upgraded: false,
            }),
        })
    }

    fn grant(&self, mode: LockMode) {
        let mut state = self.state.lock();
        state.mode = mode;
        state.status = LockStatus::Granted;
        state.grant_time = Some(Utc::now());
        state.count = 1;
    }

    fn reenter(&self) {
        self.state.lock().count += 1;
    }

    /// Returns the mode and flag the upgrade replaced
    fn upgrade(&self, mode: LockMode) -> UpgradeUndo {
        let mut state = self.state.lock();
        let undo = UpgradeUndo {
            mode: state.mode,
            upgraded: state.upgraded,
        };
        state.mode = mode;
        state.upgraded = true;
        state.count += 1;
        undo
    }

    fn restore(&self, undo: UpgradeUndo) {
        let mut state = self.state.lock();
        state.mode = undo.mode;
        state.upgraded = undo.upgraded;
    }

    /// Returns the remaining hold count
    fn decrement(&self) -> u32 {
        let mut state = self.state.lock();
        state.count = state.count.saturating_sub(1);
        state.count
    }

    fn clear(&self) {
        self.state.lock().count = 0;
    }

    /// Owning transaction
    pub fn owner(&self) -> TransactionId {
        self.owner
    }

    /// Resource name
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Timeout of the request that created the lock
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current mode; retained after release
    pub fn mode(&self) -> LockMode {
        self.state.lock().mode
    }

    /// Grant status; retained after release
    pub fn status(&self) -> LockStatus {
        self.state.lock().status
    }

    /// First grant time; an upgrade keeps it
    pub fn grant_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().grant_time
    }

    /// Outstanding acquisitions; 0 means logically free
    pub fn count(&self) -> u32 {
        self.state.lock().count
    }

    /// Whether the lock was upgraded in place
    pub fn is_upgraded(&self) -> bool {
        self.state.lock().upgraded
    }

    /// Snapshot of the lock
    pub fn info(&self) -> LockInfo {
        let state = self.state.lock().clone();
        LockInfo {
            owner: self.owner,
            resource: self.resource.clone(),
            mode: state.mode,
            status: state.status,
            grant_time: state.grant_time,
            count: state.count,
            upgraded: state.upgraded,
        }
    }
}

/// State an in-place upgrade overwrote
#[derive(Debug, Clone, Copy)]
struct UpgradeUndo {
    mode: LockMode,
    upgraded: bool,
}

enum WaitOutcome {
    /// `undo` is set when the grant upgraded a held lock
    Granted { lock: Lock, undo: Option<UpgradeUndo> },
    Aborted,
}

struct Waiter {
    id: u64,
    /// Block to grant: the held lock for an upgrade, a pending one otherwise
    lock: Lock,
    mode: LockMode,
    upgrade: bool,
    sender: oneshot::Sender<WaitOutcome>,
}

#[derive(Default)]
struct ResourceControlBlock {
    granted: SmallVec<[Lock; 4]>,
    waiting: VecDeque<Waiter>,
}

impl ResourceControlBlock {
    fn holder(&self, owner: TransactionId) -> Option<&Lock> {
        self.granted.iter().find(|lock| lock.owner == owner)
    }

    fn granted_mode(&self) -> LockMode {
        self.granted
            .iter()
            .fold(LockMode::Free, |mode, lock| mode.strongest(lock.mode()))
    }

    fn mode_excluding(&self, owner: TransactionId) -> LockMode {
        self.granted
            .iter()
            .filter(|lock| lock.owner != owner)
            .fold(LockMode::Free, |mode, lock| mode.strongest(lock.mode()))
    }

    fn is_empty(&self) -> bool {
        self.granted.is_empty() && self.waiting.is_empty()
    }
}

#[derive(Default)]
struct LockTable {
    resources: FxHashMap<String, ResourceControlBlock>,
    held_by: FxHashMap<TransactionId, FxHashSet<String>>,
}

impl LockTable {
    fn release(&mut self, lock: &Lock) -> UnlockStatus {
        let LockTable { resources, held_by } = self;
        let Some(rcb) = resources.get_mut(lock.resource()) else {
            return UnlockStatus::UnknownResource;
        };
        let Some(position) = rcb.granted.iter().position(|held| Arc::ptr_eq(held, lock)) else {
            return UnlockStatus::NotGranted;
        };
        let remaining = lock.decrement();
        if remaining > 0 {
            tracing::trace!(owner = %lock.owner(), resource = lock.resource(), remaining, "Lock count decremented");
            return UnlockStatus::Success;
        }

        rcb.granted.remove(position);
        if let Some(held) = held_by.get_mut(&lock.owner) {
            held.remove(lock.resource());
            if held.is_empty() {
                held_by.remove(&lock.owner);
            }
        }

        // an upgrade of a hold that no longer exists has nothing to upgrade
        if rcb.waiting.iter().any(|w| w.upgrade && Arc::ptr_eq(&w.lock, lock)) {
            let (orphaned, kept): (VecDeque<Waiter>, VecDeque<Waiter>) = std::mem::take(&mut rcb.waiting)
                .into_iter()
                .partition(|w| w.upgrade && Arc::ptr_eq(&w.lock, lock));
            rcb.waiting = kept;
            for waiter in orphaned {
                tracing::debug!(owner = %lock.owner(), resource = lock.resource(), mode = %waiter.mode, "Pending upgrade aborted by release");
                let _ = waiter.sender.send(WaitOutcome::Aborted);
            }
        }

        grant_waiters(lock.resource(), rcb, held_by);
        if rcb.is_empty() {
            resources.remove(lock.resource());
        }
        tracing::debug!(owner = %lock.owner(), resource = lock.resource(), mode = %lock.mode(), "Lock released");
        UnlockStatus::Success
    }
}

/// Grant queued requests from the front until one is incompatible
fn grant_waiters(
    resource: &str,
    rcb: &mut ResourceControlBlock,
    held_by: &mut FxHashMap<TransactionId, FxHashSet<String>>,
) {
    loop {
        let Some(front) = rcb.waiting.front() else {
            break;
        };
        let (owner, mode) = (front.lock.owner, front.mode);
        if !mode.is_compatible_with(rcb.mode_excluding(owner)) {
            break;
        }
        let Some(waiter) = rcb.waiting.pop_front() else {
            break;
        };

        let (lock, undo) = match rcb.holder(owner).cloned() {
            Some(held) if held.mode().covers(mode) => {
                held.reenter();
                (held, None)
            }
            Some(held) => {
                let undo = held.upgrade(mode);
                (held, Some(undo))
            }
            None => {
                waiter.lock.grant(mode);
                rcb.granted.push(waiter.lock.clone());
                held_by
                    .entry(owner)
                    .or_default()
                    .insert(resource.to_string());
                (waiter.lock.clone(), None)
            }
        };
        tracing::debug!(%owner, resource, %mode, upgrade = waiter.upgrade, "Queued lock granted");
        // receiver outlives queue membership, see PendingWait
        let _ = waiter.sender.send(WaitOutcome::Granted { lock, undo });
    }
}

fn timeout_error(resource: &str, mode: LockMode, timeout: Duration) -> Error {
    Error::LockTimeout {
        resource: resource.to_string(),
        mode: mode.to_string(),
        timeout,
    }
}

/// Diagnostic view of a queued request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaiterInfo {
    /// Requesting transaction
    pub owner: TransactionId,
    /// Requested mode
    pub mode: LockMode,
    /// Whether the owner already holds a weaker mode
    pub upgrade: bool,
}

/// Diagnostic view of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSnapshot {
    /// Resource name
    pub resource: String,
    /// Strongest mode held
    pub granted_mode: LockMode,
    /// Granted locks
    pub holders: Vec<LockInfo>,
    /// Queued requests in grant order
    pub waiters: Vec<WaiterInfo>,
}

/// Lock table shared by every transaction of a replica
pub struct LockManager {
    owner: AtomicI64,
    table: Mutex<LockTable>,
    open: AtomicBool,
    next_waiter: AtomicU64,
    drained: Notify,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// Create a closed lock manager; call [`open`](Self::open) before use
    pub fn new() -> Self {
        Self {
            owner: AtomicI64::new(0),
            table: Mutex::new(LockTable::default()),
            open: AtomicBool::new(false),
            next_waiter: AtomicU64::new(1),
            drained: Notify::new(),
        }
    }

    /// Start accepting requests on behalf of `owner`
    pub fn open(&self, owner: ReplicaId) {
        self.owner.store(owner.0, Ordering::Release);
        self.open.store(true, Ordering::Release);
        tracing::debug!(%owner, "Lock manager opened");
    }

    /// Stop accepting new requests
    ///
    /// Holders keep their locks and suspended waiters keep waiting; a later
    /// release or [`force_release_all`](Self::force_release_all) resolves them.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::debug!(owner = self.owner.load(Ordering::Acquire), "Lock manager closed");
        }
    }

    /// Whether new requests are accepted
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> Error {
        Error::AlreadyClosed(format!(
            "lock manager of replica {}",
            self.owner.load(Ordering::Acquire)
        ))
    }

    /// Acquire `resource` in `mode` for `owner`
    ///
    /// # Arguments
    /// * `timeout` - How long to wait; zero never waits, [`INFINITE_TIMEOUT`]
    ///   waits until granted
    ///
    /// # Errors
    /// - `InvalidArgument` for `Free` mode or a blank resource name
    /// - `AlreadyClosed` if the manager is closed
    /// - `LockTimeout` if the lock was not granted in time
    /// - `OperationCancelled` on cancellation or forced release of `owner`
    pub async fn acquire(
        &self,
        owner: TransactionId,
        resource: &str,
        mode: LockMode,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Lock> {
        if mode == LockMode::Free {
            return Err(Error::InvalidArgument(
                "cannot acquire a lock in Free mode".to_string(),
            ));
        }
        if resource.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "resource name must not be empty".to_string(),
            ));
        }
        check_cancelled(cancel)?;

        let (id, receiver) = {
            let mut table = self.table.lock();
            if !self.is_open() {
                return Err(self.closed_error());
            }
            let LockTable { resources, held_by } = &mut *table;
            let rcb = resources.entry(resource.to_string()).or_default();

            let (waiter_lock, upgrade) = match rcb.holder(owner).cloned() {
                Some(held) if held.mode().covers(mode) => {
                    held.reenter();
                    tracing::trace!(%owner, resource, %mode, count = held.count(), "Lock reentered");
                    return Ok(held);
                }
                Some(held) => {
                    if mode.is_compatible_with(rcb.mode_excluding(owner)) {
                        held.upgrade(mode);
                        tracing::debug!(%owner, resource, %mode, "Lock upgraded");
                        return Ok(held);
                    }
                    (held, true)
                }
                None => {
                    let lock = LockControlBlock::pending(owner, resource, mode, timeout);
                    if rcb.waiting.is_empty() && mode.is_compatible_with(rcb.granted_mode()) {
                        lock.grant(mode);
                        rcb.granted.push(lock.clone());
                        held_by
                            .entry(owner)
                            .or_default()
                            .insert(resource.to_string());
                        tracing::trace!(%owner, resource, %mode, "Lock granted");
                        return Ok(lock);
                    }
                    (lock, false)
                }
            };

            if timeout.is_zero() {
                tracing::debug!(%owner, resource, %mode, "Lock unavailable without waiting");
                return Err(timeout_error(resource, mode, timeout));
            }

            let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
            let (sender, receiver) = oneshot::channel();
            let waiter = Waiter {
                id,
                lock: waiter_lock,
                mode,
                upgrade,
                sender,
            };
            if upgrade {
                let position = rcb
                    .waiting
                    .iter()
                    .position(|w| !w.upgrade)
                    .unwrap_or(rcb.waiting.len());
                rcb.waiting.insert(position, waiter);
            } else {
                rcb.waiting.push_back(waiter);
            }
            tracing::debug!(%owner, resource, %mode, upgrade, queued = rcb.waiting.len(), "Lock request waiting");
            (id, receiver)
        };

        let mut pending = PendingWait {
            manager: self,
            resource,
            id,
            receiver,
            settled: false,
        };
        let deadline = async move {
            if timeout == INFINITE_TIMEOUT {
                std::future::pending::<()>().await
            } else {
                tokio::time::sleep(timeout).await
            }
        };
        let wake = tokio::select! {
            outcome = &mut pending.receiver => Wake::Outcome(outcome.ok()),
            _ = deadline => Wake::TimedOut,
            _ = cancel.cancelled() => Wake::Cancelled,
        };

        match wake {
            Wake::Outcome(outcome) => {
                pending.settled = true;
                match outcome {
                    Some(WaitOutcome::Granted { lock, .. }) => Ok(lock),
                    Some(WaitOutcome::Aborted) | None => {
                        tracing::debug!(%owner, resource, %mode, "Lock request aborted");
                        Err(Error::OperationCancelled)
                    }
                }
            }
            Wake::TimedOut => {
                tracing::debug!(%owner, resource, %mode, ?timeout, "Lock request timed out");
                pending.give_up(timeout_error(resource, mode, timeout))
            }
            Wake::Cancelled => pending.give_up(Error::OperationCancelled),
        }
    }

    /// Remove a queued request; false if it already left the queue
    fn withdraw(&self, resource: &str, id: u64) -> bool {
        let mut table = self.table.lock();
        let LockTable { resources, held_by } = &mut *table;
        let Some(rcb) = resources.get_mut(resource) else {
            return false;
        };
        let Some(position) = rcb.waiting.iter().position(|w| w.id == id) else {
            return false;
        };
        rcb.waiting.remove(position);
        grant_waiters(resource, rcb, held_by);
        if rcb.is_empty() {
            resources.remove(resource);
        }
        self.notify_if_drained(&table);
        true
    }

    /// Release one acquisition of `lock`
    ///
    /// At hold count 0 the lock leaves its resource, any upgrade still queued
    /// on it is aborted, and compatible waiters are granted.
    pub fn release(&self, lock: &Lock) -> UnlockStatus {
        let mut table = self.table.lock();
        let status = table.release(lock);
        self.notify_if_drained(&table);
        status
    }

    /// Undo an upgrade grant its requester never received
    fn revoke_upgrade(&self, lock: &Lock, undo: UpgradeUndo) {
        let mut table = self.table.lock();
        let held = table
            .resources
            .get(lock.resource())
            .is_some_and(|rcb| rcb.granted.iter().any(|h| Arc::ptr_eq(h, lock)));
        if !held {
            return;
        }
        lock.restore(undo);
        table.release(lock);

        // the weaker mode may admit waiters even while the base hold remains
        let LockTable { resources, held_by } = &mut *table;
        if let Some(rcb) = resources.get_mut(lock.resource()) {
            grant_waiters(lock.resource(), rcb, held_by);
            if rcb.is_empty() {
                resources.remove(lock.resource());
            }
        }
        tracing::debug!(owner = %lock.owner(), resource = lock.resource(), mode = %lock.mode(), "Undelivered upgrade revoked");
        self.notify_if_drained(&table);
    }

    /// Release every lock of `owner` regardless of hold count and abort its
    /// queued requests
    ///
    /// # Returns
    /// Number of granted locks released.
    pub fn force_release_all(&self, owner: TransactionId) -> usize {
        let mut table = self.table.lock();
        let LockTable { resources, held_by } = &mut *table;

        let mut released = 0;
        for name in held_by.remove(&owner).unwrap_or_default() {
            if let Some(rcb) = resources.get_mut(&name) {
                if let Some(position) = rcb.granted.iter().position(|l| l.owner == owner) {
                    rcb.granted.remove(position).clear();
                    released += 1;
                }
            }
        }

        let mut aborted = 0;
        for rcb in resources.values_mut() {
            if rcb.waiting.iter().all(|w| w.lock.owner != owner) {
                continue;
            }
            let (dropped, kept): (VecDeque<Waiter>, VecDeque<Waiter>) = std::mem::take(&mut rcb.waiting)
                .into_iter()
                .partition(|w| w.lock.owner == owner);
            rcb.waiting = kept;
            for waiter in dropped {
                aborted += 1;
                let _ = waiter.sender.send(WaitOutcome::Aborted);
            }
        }

        for (name, rcb) in resources.iter_mut() {
            grant_waiters(name, rcb, held_by);
        }
        resources.retain(|_, rcb| !rcb.is_empty());

        if released > 0 || aborted > 0 {
            tracing::debug!(%owner, released, aborted, "Owner locks force-released");
        }
        self.notify_if_drained(&table);
        released
    }

    fn notify_if_drained(&self, table: &LockTable) {
        if table.resources.is_empty() {
            self.drained.notify_waiters();
        }
    }

    /// Whether no resource is held or awaited
    pub fn is_drained(&self) -> bool {
        self.table.lock().resources.is_empty()
    }

    /// Resolve once no resource is held or awaited
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }

    /// Number of resources `owner` holds
    pub fn held_count(&self, owner: TransactionId) -> usize {
        self.table
            .lock()
            .held_by
            .get(&owner)
            .map_or(0, FxHashSet::len)
    }

    /// Diagnostic view of `resource`, `None` if it has no entry
    pub fn resource_snapshot(&self, resource: &str) -> Option<ResourceSnapshot> {
        let table = self.table.lock();
        let rcb = table.resources.get(resource)?;
        Some(ResourceSnapshot {
            resource: resource.to_string(),
            granted_mode: rcb.granted_mode(),
            holders: rcb.granted.iter().map(|lock| lock.info()).collect(),
            waiters: rcb
                .waiting
                .iter()
                .map(|w| WaiterInfo {
                    owner: w.lock.owner,
                    mode: w.mode,
                    upgrade: w.upgrade,
                })
                .collect(),
        })
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("owner", &self.owner.load(Ordering::Acquire))
            .field("open", &self.is_open())
            .finish()
    }
}

enum Wake {
    Outcome(Option<WaitOutcome>),
    TimedOut,
    Cancelled,
}

/// A queued request; withdraws itself if dropped before it settles
struct PendingWait<'a> {
    manager: &'a LockManager,
    resource: &'a str,
    id: u64,
    receiver: oneshot::Receiver<WaitOutcome>,
    settled: bool,
}

impl PendingWait<'_> {
    /// Leave the queue with `error`, unless a grant already landed
    fn give_up(&mut self, error: Error) -> Result<Lock> {
        self.settled = true;
        if self.manager.withdraw(self.resource, self.id) {
            return Err(error);
        }
        match self.receiver.try_recv() {
            Ok(WaitOutcome::Granted { lock, .. }) => Ok(lock),
            _ => Err(Error::OperationCancelled),
        }
    }
}

impl Drop for PendingWait<'_> {
    fn drop(&mut self) {
        if self.settled || self.manager.withdraw(self.resource, self.id) {
            return;
        }
        match self.receiver.try_recv() {
            Ok(WaitOutcome::Granted { lock, undo: Some(undo) }) => {
                self.manager.revoke_upgrade(&lock, undo);
            }
            Ok(WaitOutcome::Granted { lock, undo: None }) => {
                let _ = self.manager.release(&lock);
            }
            _ => {}
        }
    }
}
