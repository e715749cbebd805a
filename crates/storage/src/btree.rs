//! Keyed store with redo/undo logging
//!
//! `BtreeStore` is an ordered map from encoded keys to encoded values. Every
//! mutation is tagged with a caller-supplied sequence number and returns a
//! redo/undo pair; a replica replays redo records through [`BtreeStore::apply`].
//!
//! ## Concurrency
//!
//! - The entry table sits behind a `parking_lot::RwLock`, held only for
//!   short synchronous sections and never across an `.await`
//! - Writers try the lock `retries_before_timeout` times, yielding to the
//!   scheduler between attempts, before blocking on it
//! - Each call is atomic per key; cross-key atomicity is the caller's job
//!   (typically via the lock manager in `relistore-concurrency`)
//!
//! ## Stability
//!
//! [`BtreeStore::on_operation_stable`] advances the stability watermark and
//! reclaims versions superseded at or below it. Mutations tagged below the
//! watermark are rejected.
//!
//! ## Cancellation
//!
//! The token is checked on entry and again once the write lock is held,
//! right before the mutation is published, so a cancelled call has no effect
//! and returns no log records.

use crate::checkpoint::{self, CheckpointImage, IMAGE_FORMAT_VERSION};
use crate::config::BtreeConfiguration;
use crate::copy::CopyStream;
use crate::log::{BtreeOperation, OperationData, OperationType, RedoUndo};
use crate::ordering::{KeyComparisonDescription, SortKey};
use crate::scan::{BtreeScan, ScanItem};
use crate::stats::BtreeStatistics;
use crate::value::EncodedValue;
use crate::version::{EntryTable, VersionState};
use parking_lot::{RwLock, RwLockWriteGuard};
use relistore_core::{
    check_cancelled, CancellationToken, Error, PartitionId, ReplicaId, Result, SequenceNumber,
};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Ordered, logged key/value store
pub struct BtreeStore {
    config: BtreeConfiguration,
    order: Arc<KeyComparisonDescription>,
    table: RwLock<EntryTable>,
    /// Highest sequence number seen
    last_sequence_number: AtomicU64,
    /// Stability watermark
    stable_sequence_number: AtomicU64,
    checkpoint_sequence_number: AtomicU64,
    /// Size of the last checkpoint image
    storage_usage: AtomicU64,
    closed: AtomicBool,
    /// Serializes checkpoint writers
    checkpoint_gate: tokio::sync::Mutex<()>,
}

impl BtreeStore {
    /// Open a store
    ///
    /// # Arguments
    /// * `config` - Identity, storage ceilings and key ordering
    /// * `recover` - Load prior state; persisted stores read their checkpoint
    ///   image, volatile stores start empty
    /// * `cancel` - Cancellation signal
    ///
    /// # Errors
    /// `InvalidConfiguration` for an inconsistent configuration, a missing
    /// checkpoint image or an image of another partition; `CorruptRecord`
    /// for a damaged image.
    pub async fn open(
        config: BtreeConfiguration,
        recover: bool,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        check_cancelled(cancel)?;
        config.validate()?;

        let store = Self {
            order: Arc::new(config.key_comparison.clone()),
            table: RwLock::new(EntryTable::new(config.storage.store_data_inline)),
            last_sequence_number: AtomicU64::new(0),
            stable_sequence_number: AtomicU64::new(0),
            checkpoint_sequence_number: AtomicU64::new(0),
            storage_usage: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            checkpoint_gate: tokio::sync::Mutex::new(()),
            config,
        };

        if recover {
            if let Some(path) = store.config.storage.checkpoint_path() {
                let (image, size) =
                    tokio::task::spawn_blocking(move || checkpoint::read_image(&path))
                        .await
                        .map_err(join_error)??;
                store.load_image(image, size)?;
            }
        }
        check_cancelled(cancel)?;

        tracing::info!(
            partition = %store.config.partition_id,
            replica = %store.config.replica_id,
            recover,
            volatile = store.config.storage.is_volatile,
            records = store.table.read().live_records(),
            "Btree opened"
        );
        Ok(store)
    }

    fn load_image(&self, image: CheckpointImage, size: u64) -> Result<()> {
        if image.partition_id != self.config.partition_id {
            return Err(Error::InvalidConfiguration(format!(
                "checkpoint image belongs to partition {}, not {}",
                image.partition_id, self.config.partition_id
            )));
        }
        let mut table = self.table.write();
        for (key, value) in image.entries {
            self.order
                .validate_key(&key)
                .map_err(|e| Error::CorruptRecord(format!("checkpoint key rejected: {}", e)))?;
            let sort_key = SortKey::new(Arc::from(key), self.order.clone());
            table.push(
                sort_key,
                image.checkpoint_sequence_number,
                VersionState::Present(EncodedValue::from(value)),
            );
        }
        self.last_sequence_number
            .store(image.last_sequence_number, Ordering::Release);
        self.stable_sequence_number
            .store(image.stable_sequence_number, Ordering::Release);
        self.checkpoint_sequence_number
            .store(image.checkpoint_sequence_number, Ordering::Release);
        self.storage_usage.store(size, Ordering::Release);
        Ok(())
    }

    /// Close the store
    ///
    /// With `flush` set, a persisted store first writes a checkpoint image at
    /// its current high-water mark. Every later call fails with `AlreadyClosed`.
    pub async fn close(&self, flush: bool, cancel: &CancellationToken) -> Result<()> {
        self.ensure_open()?;
        check_cancelled(cancel)?;
        if flush && !self.config.storage.is_volatile {
            let lsn = self
                .last_committed_sequence_number()
                .max(self.stable_sequence_number.load(Ordering::Acquire))
                .max(self.checkpoint_sequence_number.load(Ordering::Acquire));
            self.checkpoint(lsn, cancel).await?;
        }
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(self.closed_error());
        }
        tracing::info!(
            partition = %self.config.partition_id,
            replica = %self.config.replica_id,
            flush,
            "Btree closed"
        );
        Ok(())
    }

    /// Close immediately without flushing
    pub fn abort(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::warn!(partition = %self.config.partition_id, "Btree aborted");
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert a new key
    ///
    /// # Errors
    /// `DuplicateKey` if the key is present (the stored value is untouched).
    pub async fn insert(
        &self,
        key: &[u8],
        value: EncodedValue,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<RedoUndo> {
        let (sort_key, mut table) = self.begin_write(key, seq, cancel).await?;
        if table.current(&sort_key).is_some() {
            return Err(Error::DuplicateKey(Error::describe_key(key)));
        }
        self.push_value(&mut table, sort_key, seq, value.clone())?;
        drop(table);

        self.observe(seq, "insert");
        Ok(RedoUndo {
            redo: BtreeOperation::insert(seq, key, value).encode(),
            undo: BtreeOperation::delete(seq, key).encode(),
        })
    }

    /// Insert a new key, or return the present value without mutating
    ///
    /// Returns `(Some(existing), None)` when the key was present and
    /// `(None, Some(log))` when it was inserted.
    pub async fn insert_with_output(
        &self,
        key: &[u8],
        value: EncodedValue,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(Option<EncodedValue>, Option<RedoUndo>)> {
        let (sort_key, mut table) = self.begin_write(key, seq, cancel).await?;
        if let Some(existing) = table.current(&sort_key) {
            return Ok((Some(existing.clone()), None));
        }
        self.push_value(&mut table, sort_key, seq, value.clone())?;
        drop(table);

        self.observe(seq, "insert");
        Ok((
            None,
            Some(RedoUndo {
                redo: BtreeOperation::insert(seq, key, value).encode(),
                undo: BtreeOperation::delete(seq, key).encode(),
            }),
        ))
    }

    /// Insert or replace; returns the previous value if there was one
    pub async fn upsert(
        &self,
        key: &[u8],
        value: EncodedValue,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(Option<EncodedValue>, RedoUndo)> {
        let (sort_key, mut table) = self.begin_write(key, seq, cancel).await?;
        let previous = table.current(&sort_key).cloned();
        self.push_value(&mut table, sort_key, seq, value.clone())?;
        drop(table);

        self.observe(seq, "upsert");
        let log = match &previous {
            Some(old) => RedoUndo {
                redo: BtreeOperation::update(seq, key, value).encode(),
                undo: BtreeOperation::update(seq, key, old.clone()).encode(),
            },
            None => RedoUndo {
                redo: BtreeOperation::insert(seq, key, value).encode(),
                undo: BtreeOperation::delete(seq, key).encode(),
            },
        };
        Ok((previous, log))
    }

    /// Replace the value of a present key
    ///
    /// # Errors
    /// `KeyNotFound` if the key is absent.
    pub async fn update(
        &self,
        key: &[u8],
        value: EncodedValue,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<RedoUndo> {
        self.update_with_output(key, value, seq, cancel)
            .await
            .map(|(_, log)| log)
    }

    /// Replace the value of a present key, returning the old value
    pub async fn update_with_output(
        &self,
        key: &[u8],
        value: EncodedValue,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(EncodedValue, RedoUndo)> {
        let (sort_key, mut table) = self.begin_write(key, seq, cancel).await?;
        let old = table
            .current(&sort_key)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(Error::describe_key(key)))?;
        self.push_value(&mut table, sort_key, seq, value.clone())?;
        drop(table);

        self.observe(seq, "update");
        let log = RedoUndo {
            redo: BtreeOperation::update(seq, key, value).encode(),
            undo: BtreeOperation::update(seq, key, old.clone()).encode(),
        };
        Ok((old, log))
    }

    /// Replace the value only if `check_value` matches the current value at `check_offset`
    ///
    /// Returns `(false, None)` without mutating when the condition fails.
    ///
    /// # Errors
    /// `KeyNotFound` if the key is absent.
    pub async fn conditional_update(
        &self,
        key: &[u8],
        value: EncodedValue,
        check_offset: u32,
        check_value: &[u8],
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(bool, Option<RedoUndo>)> {
        let (sort_key, mut table) = self.begin_write(key, seq, cancel).await?;
        let old = table
            .current(&sort_key)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(Error::describe_key(key)))?;
        if !condition_holds(&old, check_offset, check_value) {
            return Ok((false, None));
        }
        self.push_value(&mut table, sort_key, seq, value.clone())?;
        drop(table);

        self.observe(seq, "conditional_update");
        Ok((
            true,
            Some(RedoUndo {
                redo: BtreeOperation::update(seq, key, value)
                    .with_condition(check_offset, check_value)
                    .encode(),
                undo: BtreeOperation::update(seq, key, old).encode(),
            }),
        ))
    }

    /// Overwrite bytes at `update_offset` if the condition holds
    ///
    /// The value grows when `partial` runs past its end. A null value is
    /// treated as empty.
    ///
    /// # Errors
    /// `KeyNotFound` if the key is absent; `InvalidArgument` if
    /// `update_offset` lies beyond the current value.
    #[allow(clippy::too_many_arguments)]
    pub async fn conditional_partial_update(
        &self,
        key: &[u8],
        update_offset: u32,
        partial: &[u8],
        check_offset: u32,
        check_value: &[u8],
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(bool, Option<RedoUndo>)> {
        let (sort_key, mut table) = self.begin_write(key, seq, cancel).await?;
        let old = table
            .current(&sort_key)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(Error::describe_key(key)))?;
        if !condition_holds(&old, check_offset, check_value) {
            return Ok((false, None));
        }
        let updated = overwrite(&old, update_offset, partial)?;
        self.push_value(&mut table, sort_key, seq, EncodedValue::from(updated))?;
        drop(table);

        self.observe(seq, "partial_update");
        Ok((
            true,
            Some(RedoUndo {
                redo: BtreeOperation::partial_update(seq, key, update_offset, partial)
                    .with_condition(check_offset, check_value)
                    .encode(),
                undo: BtreeOperation::update(seq, key, old).encode(),
            }),
        ))
    }

    /// Delete a present key
    ///
    /// # Errors
    /// `KeyNotFound` if the key is absent.
    pub async fn delete(
        &self,
        key: &[u8],
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(bool, RedoUndo)> {
        self.delete_with_output(key, seq, cancel)
            .await
            .map(|(_, log)| (true, log))
    }

    /// Delete a present key, returning its value
    pub async fn delete_with_output(
        &self,
        key: &[u8],
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(EncodedValue, RedoUndo)> {
        let (sort_key, mut table) = self.begin_write(key, seq, cancel).await?;
        let old = table
            .current(&sort_key)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(Error::describe_key(key)))?;
        table.push(sort_key, seq, VersionState::Deleted);
        drop(table);

        self.observe(seq, "delete");
        let log = RedoUndo {
            redo: BtreeOperation::delete(seq, key).encode(),
            undo: BtreeOperation::insert(seq, key, old.clone()).encode(),
        };
        Ok((old, log))
    }

    /// Delete only if `check_value` matches the current value at `check_offset`
    pub async fn conditional_delete(
        &self,
        key: &[u8],
        check_offset: u32,
        check_value: &[u8],
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(bool, Option<RedoUndo>)> {
        let (sort_key, mut table) = self.begin_write(key, seq, cancel).await?;
        let old = table
            .current(&sort_key)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(Error::describe_key(key)))?;
        if !condition_holds(&old, check_offset, check_value) {
            return Ok((false, None));
        }
        table.push(sort_key, seq, VersionState::Deleted);
        drop(table);

        self.observe(seq, "conditional_delete");
        Ok((
            true,
            Some(RedoUndo {
                redo: BtreeOperation::delete(seq, key)
                    .with_condition(check_offset, check_value)
                    .encode(),
                undo: BtreeOperation::insert(seq, key, old).encode(),
            }),
        ))
    }

    /// Drop every key; the undo record restores them
    pub async fn erase(&self, seq: SequenceNumber, cancel: &CancellationToken) -> Result<RedoUndo> {
        self.ensure_open()?;
        check_cancelled(cancel)?;
        let mut table = self.write_table().await;
        self.ensure_writable(seq, cancel)?;

        let live: Vec<(SortKey, EncodedValue)> = table
            .live()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut entries = Vec::with_capacity(live.len());
        for (sort_key, value) in live {
            entries.push((sort_key.bytes().to_vec(), value));
            table.push(sort_key, seq, VersionState::Deleted);
        }
        drop(table);

        self.observe(seq, "erase");
        tracing::debug!(partition = %self.config.partition_id, seq, erased = entries.len(), "Btree erased");
        Ok(RedoUndo {
            redo: BtreeOperation::erase(seq).encode(),
            undo: BtreeOperation::restore(seq, entries).encode(),
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read the value of a key
    ///
    /// A present tombstone returns a null value.
    ///
    /// # Errors
    /// `KeyNotFound` if the key is absent.
    pub async fn seek(&self, key: &[u8], cancel: &CancellationToken) -> Result<EncodedValue> {
        self.ensure_open()?;
        check_cancelled(cancel)?;
        let sort_key = self.sort_key(key)?;
        let table = self.table.read();
        table
            .current(&sort_key)
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(Error::describe_key(key)))
    }

    /// Read `size` bytes of a key's value starting at `offset`
    ///
    /// The window is clamped to the end of the value; a null value stays null.
    pub async fn partial_seek(
        &self,
        key: &[u8],
        offset: u32,
        size: u32,
        cancel: &CancellationToken,
    ) -> Result<EncodedValue> {
        let value = self.seek(key, cancel).await?;
        let Some(bytes) = value.as_bytes() else {
            return Ok(value);
        };
        let start = (offset as usize).min(bytes.len());
        let end = start.saturating_add(size as usize).min(bytes.len());
        Ok(EncodedValue::from(&bytes[start..end]))
    }

    /// Create an unopened scan cursor over this store
    pub fn create_scan(&self) -> BtreeScan<'_> {
        BtreeScan::new(self)
    }

    pub(crate) fn snapshot_range(
        &self,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
        prefix: Option<&[u8]>,
        value_needed: bool,
    ) -> Result<Vec<ScanItem>> {
        self.ensure_open()?;
        if let (Some(b), Some(e)) = (begin, end) {
            if self.order.compare(b, e) == std::cmp::Ordering::Greater {
                return Ok(Vec::new());
            }
        }
        let bound = |key: Option<&[u8]>| match key {
            Some(k) => Bound::Included(SortKey::new(Arc::from(k), self.order.clone())),
            None => Bound::Unbounded,
        };
        let table = self.table.read();
        let items = table
            .range((bound(begin), bound(end)))
            .filter(|(k, _)| prefix.map_or(true, |p| k.bytes().starts_with(p)))
            .filter_map(|(k, chain)| {
                chain.current().map(|v| ScanItem {
                    key: k.bytes().clone(),
                    value: value_needed.then(|| v.clone()),
                })
            })
            .collect();
        Ok(items)
    }

    /// Read-only counters; never mutates state
    pub fn statistics(&self) -> BtreeStatistics {
        let table = self.table.read();
        let memory = table.memory_usage();
        let page = self.config.storage.page_size_bytes().max(1);
        BtreeStatistics {
            memory_usage_bytes: memory,
            storage_usage_bytes: self.storage_usage.load(Ordering::Acquire),
            page_count: memory.div_ceil(page),
            record_count: table.live_records() as u64,
            version_count: table.version_count() as u64,
            last_sequence_number: self.last_sequence_number.load(Ordering::Acquire),
            stable_sequence_number: self.stable_sequence_number.load(Ordering::Acquire),
            checkpoint_sequence_number: self.checkpoint_sequence_number.load(Ordering::Acquire),
        }
    }

    /// Highest sequence number observed by a mutation
    pub fn last_committed_sequence_number(&self) -> SequenceNumber {
        self.last_sequence_number.load(Ordering::Acquire)
    }

    /// Current stability watermark
    pub fn stable_sequence_number(&self) -> SequenceNumber {
        self.stable_sequence_number.load(Ordering::Acquire)
    }

    // ========================================================================
    // Replication
    // ========================================================================

    /// Replay a redo (or undo) record
    ///
    /// With `decode_only` the record is only decoded and validated. Otherwise
    /// it is also applied with the replay semantics of its operation:
    /// Insert fails with `DuplicateKey` on a present key; Update,
    /// PartialUpdate and Delete fail with `KeyNotFound` on an absent one.
    ///
    /// # Returns
    /// The decoded operation, identical for both values of `decode_only`.
    pub async fn apply(
        &self,
        seq: SequenceNumber,
        redo: &OperationData,
        decode_only: bool,
        cancel: &CancellationToken,
    ) -> Result<BtreeOperation> {
        self.ensure_open()?;
        check_cancelled(cancel)?;
        let operation = BtreeOperation::decode(redo)?;
        if decode_only {
            return Ok(operation);
        }
        self.apply_decoded(seq, &operation, cancel).await?;
        Ok(operation)
    }

    async fn apply_decoded(
        &self,
        seq: SequenceNumber,
        operation: &BtreeOperation,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let target = match &operation.key {
            Some(key) => Some(self.sort_key(key)?),
            None => None,
        };
        let restored = operation
            .entries
            .iter()
            .map(|(key, value)| Ok((self.sort_key(key)?, value.clone())))
            .collect::<Result<Vec<_>>>()?;

        let mut table = self.write_table().await;
        self.ensure_writable(seq, cancel)?;

        let require_target = || {
            target
                .clone()
                .ok_or_else(|| Error::CorruptRecord("record without key".to_string()))
        };
        let not_found = |key: &SortKey| Error::KeyNotFound(Error::describe_key(key.bytes()));

        match operation.operation_type {
            OperationType::Insert => {
                let key = require_target()?;
                if table.current(&key).is_some() {
                    return Err(Error::DuplicateKey(Error::describe_key(key.bytes())));
                }
                let value = operation.require_value()?.clone();
                self.push_value(&mut table, key, seq, value)?;
            }
            OperationType::Update => {
                let key = require_target()?;
                if table.current(&key).is_none() {
                    return Err(not_found(&key));
                }
                let value = operation.require_value()?.clone();
                self.push_value(&mut table, key, seq, value)?;
            }
            OperationType::PartialUpdate => {
                let key = require_target()?;
                let old = table.current(&key).cloned().ok_or_else(|| not_found(&key))?;
                let partial = operation.require_value()?.as_bytes().unwrap_or(&[]);
                let updated = overwrite(&old, operation.partial_update_offset, partial)?;
                self.push_value(&mut table, key, seq, EncodedValue::from(updated))?;
            }
            OperationType::Delete => {
                let key = require_target()?;
                if table.current(&key).is_none() {
                    return Err(not_found(&key));
                }
                table.push(key, seq, VersionState::Deleted);
            }
            OperationType::Erase => {
                let live: Vec<SortKey> = table.live().map(|(k, _)| k.clone()).collect();
                for key in live {
                    table.push(key, seq, VersionState::Deleted);
                }
            }
            OperationType::Restore => {
                let added: u64 = restored
                    .iter()
                    .map(|(k, v)| table.cost_of(k, &VersionState::Present(v.clone())))
                    .sum();
                self.check_capacity(&table, added)?;
                for (key, value) in restored {
                    table.push(key, seq, VersionState::Present(value));
                }
            }
        }
        drop(table);

        self.observe(seq, "apply");
        Ok(())
    }

    /// Advance the stability watermark and reclaim superseded versions
    ///
    /// No-op if `seq` does not advance the watermark.
    ///
    /// # Returns
    /// The watermark after the call.
    pub async fn on_operation_stable(
        &self,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<SequenceNumber> {
        self.ensure_open()?;
        check_cancelled(cancel)?;
        let current = self.stable_sequence_number.load(Ordering::Acquire);
        if seq <= current {
            return Ok(current);
        }

        let mut table = self.write_table().await;
        check_cancelled(cancel)?;
        let prior = self.stable_sequence_number.fetch_max(seq, Ordering::AcqRel);
        if seq <= prior {
            return Ok(prior);
        }
        let reclaimed = table.reclaim(seq);
        drop(table);

        tracing::debug!(
            partition = %self.config.partition_id,
            watermark = seq,
            reclaimed,
            "Stability watermark advanced"
        );
        Ok(seq)
    }

    /// Record a checkpoint at `seq`
    ///
    /// Persisted stores write a checkpoint image of the entries visible at
    /// `seq`; later mutations are left for the log to replay.
    ///
    /// # Errors
    /// `InvalidArgument` if `seq` is below the previous checkpoint or the
    /// stability watermark; `CapacityExceeded` if the image exceeds the
    /// storage ceiling.
    pub async fn checkpoint(&self, seq: SequenceNumber, cancel: &CancellationToken) -> Result<()> {
        self.ensure_open()?;
        check_cancelled(cancel)?;
        let _gate = self.checkpoint_gate.lock().await;

        let previous = self.checkpoint_sequence_number.load(Ordering::Acquire);
        if seq < previous {
            return Err(Error::InvalidArgument(format!(
                "checkpoint sequence number {} is below previous checkpoint {}",
                seq, previous
            )));
        }
        let stable = self.stable_sequence_number.load(Ordering::Acquire);
        if seq < stable {
            return Err(Error::InvalidArgument(format!(
                "checkpoint sequence number {} is below the stability watermark {}",
                seq, stable
            )));
        }

        if let Some(path) = self.config.storage.checkpoint_path() {
            let image = self.build_image(seq);
            let limit = self.config.storage.storage_limit_bytes();
            let size = tokio::task::spawn_blocking(move || {
                checkpoint::write_image(&path, &image, limit)
            })
            .await
            .map_err(join_error)??;
            self.storage_usage.store(size, Ordering::Release);
        }
        self.checkpoint_sequence_number
            .fetch_max(seq, Ordering::AcqRel);
        tracing::debug!(partition = %self.config.partition_id, seq, "Checkpoint complete");
        Ok(())
    }

    fn build_image(&self, seq: SequenceNumber) -> CheckpointImage {
        let table = self.table.read();
        CheckpointImage {
            format_version: IMAGE_FORMAT_VERSION,
            partition_id: self.config.partition_id,
            replica_id: self.config.replica_id,
            checkpoint_sequence_number: seq,
            stable_sequence_number: self.stable_sequence_number.load(Ordering::Acquire),
            last_sequence_number: self.last_sequence_number.load(Ordering::Acquire).min(seq),
            entries: table
                .chains()
                .filter_map(|(k, chain)| {
                    chain
                        .visible_at(seq)
                        .map(|v| (k.bytes().to_vec(), v.to_vec()))
                })
                .collect(),
        }
    }

    /// State visible as of `up_to`, as a stream of Restore records
    ///
    /// # Errors
    /// `InvalidArgument` if `up_to` is below the stability watermark, whose
    /// superseded versions may already be reclaimed.
    pub fn copy_state(&self, up_to: SequenceNumber) -> Result<CopyStream> {
        self.ensure_open()?;
        let stable = self.stable_sequence_number.load(Ordering::Acquire);
        if up_to < stable {
            return Err(Error::InvalidArgument(format!(
                "copy point {} is below the stability watermark {}",
                up_to, stable
            )));
        }
        let table = self.table.read();
        let entries = table
            .chains()
            .filter_map(|(k, chain)| {
                chain
                    .visible_at(up_to)
                    .map(|v| (k.bytes().to_vec(), v.clone()))
            })
            .collect();
        Ok(CopyStream::new(up_to, entries))
    }

    /// Load one record of a [`CopyStream`]
    ///
    /// # Returns
    /// Number of entries loaded.
    pub async fn apply_copy_data(
        &self,
        data: &OperationData,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        self.ensure_open()?;
        check_cancelled(cancel)?;
        let operation = BtreeOperation::decode(data)?;
        if operation.operation_type != OperationType::Restore {
            return Err(Error::InvalidArgument(format!(
                "copy data must be a Restore record, got {:?}",
                operation.operation_type
            )));
        }
        self.apply_decoded(operation.sequence_number, &operation, cancel)
            .await?;
        Ok(operation.entries.len())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Store configuration
    pub fn configuration(&self) -> &BtreeConfiguration {
        &self.config
    }

    /// Partition identity
    pub fn partition_id(&self) -> PartitionId {
        self.config.partition_id
    }

    /// Replica identity
    pub fn replica_id(&self) -> ReplicaId {
        self.config.replica_id
    }

    /// Key ordering in effect
    pub fn key_comparison(&self) -> &KeyComparisonDescription {
        &self.order
    }

    /// Whether `close` or `abort` has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn closed_error(&self) -> Error {
        Error::AlreadyClosed(format!("btree store {}", self.config.partition_id))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    fn sort_key(&self, key: &[u8]) -> Result<SortKey> {
        self.order.validate_key(key)?;
        Ok(SortKey::new(Arc::from(key), self.order.clone()))
    }

    fn check_sequence(&self, seq: SequenceNumber) -> Result<()> {
        let stable = self.stable_sequence_number.load(Ordering::Acquire);
        if seq < stable {
            return Err(Error::InvalidArgument(format!(
                "sequence number {} is below the stability watermark {}",
                seq, stable
            )));
        }
        Ok(())
    }

    /// Checks that must hold once the write lock is held
    fn ensure_writable(&self, seq: SequenceNumber, cancel: &CancellationToken) -> Result<()> {
        self.ensure_open()?;
        self.check_sequence(seq)?;
        check_cancelled(cancel)
    }

    async fn write_table(&self) -> RwLockWriteGuard<'_, EntryTable> {
        for _ in 0..self.config.storage.retries_before_timeout {
            if let Some(guard) = self.table.try_write() {
                return guard;
            }
            tokio::task::yield_now().await;
        }
        self.table.write()
    }

    async fn begin_write(
        &self,
        key: &[u8],
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(SortKey, RwLockWriteGuard<'_, EntryTable>)> {
        self.ensure_open()?;
        check_cancelled(cancel)?;
        let sort_key = self.sort_key(key)?;
        self.check_sequence(seq)?;
        let table = self.write_table().await;
        self.ensure_writable(seq, cancel)?;
        Ok((sort_key, table))
    }

    fn check_capacity(&self, table: &EntryTable, additional: u64) -> Result<()> {
        if let Some(limit) = self.config.storage.memory_limit_bytes() {
            let projected = table.memory_usage() + additional;
            if projected > limit {
                return Err(Error::CapacityExceeded(format!(
                    "memory usage {} would exceed limit {}",
                    projected, limit
                )));
            }
        }
        Ok(())
    }

    fn push_value(
        &self,
        table: &mut EntryTable,
        key: SortKey,
        seq: SequenceNumber,
        value: EncodedValue,
    ) -> Result<()> {
        let state = VersionState::Present(value);
        self.check_capacity(table, table.cost_of(&key, &state))?;
        table.push(key, seq, state);
        Ok(())
    }

    fn observe(&self, seq: SequenceNumber, operation: &'static str) {
        self.last_sequence_number.fetch_max(seq, Ordering::AcqRel);
        tracing::trace!(partition = %self.config.partition_id, seq, operation, "Btree mutation");
    }
}

impl std::fmt::Debug for BtreeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtreeStore")
            .field("partition_id", &self.config.partition_id)
            .field("replica_id", &self.config.replica_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

fn condition_holds(current: &EncodedValue, offset: u32, check: &[u8]) -> bool {
    let bytes = current.as_bytes().unwrap_or(&[]);
    let start = offset as usize;
    start
        .checked_add(check.len())
        .and_then(|end| bytes.get(start..end))
        .map_or(false, |window| window == check)
}

fn overwrite(current: &EncodedValue, offset: u32, partial: &[u8]) -> Result<Vec<u8>> {
    let mut bytes = current.to_vec().unwrap_or_default();
    let start = offset as usize;
    if start > bytes.len() {
        return Err(Error::InvalidArgument(format!(
            "partial update offset {} is beyond value length {}",
            start,
            bytes.len()
        )));
    }
    let end = start + partial.len();
    if end > bytes.len() {
        bytes.resize(end, 0);
    }
    bytes[start..end].copy_from_slice(partial);
    Ok(bytes)
}
