//! Typed facade over [`BtreeStore`]
//!
//! Pairs a store with a key codec and a value codec. Null values surface as
//! `None`.

use crate::btree::BtreeStore;
use crate::codec::Codec;
use crate::config::BtreeConfiguration;
use crate::log::{OperationData, OperationType, RedoUndo};
use crate::stats::BtreeStatistics;
use crate::value::EncodedValue;
use relistore_core::{CancellationToken, Result, SequenceNumber};
use std::marker::PhantomData;

/// A decoded log record with typed key and values
#[derive(Debug, Clone, PartialEq)]
pub struct TypedOperation<K, V> {
    /// What the record does
    pub operation_type: OperationType,
    /// Sequence number the producing call was tagged with
    pub sequence_number: SequenceNumber,
    /// Target key
    pub key: Option<K>,
    /// New value (`None` for null or absent)
    pub value: Option<V>,
    /// Entries of a Restore record
    pub entries: Vec<(K, Option<V>)>,
}

/// Store with typed keys and values
pub struct Btree<K, V, KC, VC> {
    store: BtreeStore,
    key_codec: KC,
    value_codec: VC,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, KC, VC> Btree<K, V, KC, VC>
where
    KC: Codec<K>,
    VC: Codec<V>,
{
    /// Open the underlying store and attach codecs
    pub async fn open(
        config: BtreeConfiguration,
        key_codec: KC,
        value_codec: VC,
        recover: bool,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let store = BtreeStore::open(config, recover, cancel).await?;
        tracing::debug!(
            key_codec = key_codec.codec_id(),
            value_codec = value_codec.codec_id(),
            "Typed btree attached"
        );
        Ok(Self {
            store,
            key_codec,
            value_codec,
            _marker: PhantomData,
        })
    }

    fn encode_value(&self, value: Option<&V>) -> EncodedValue {
        match value {
            Some(v) => EncodedValue::from(self.value_codec.encode(v)),
            None => EncodedValue::null(),
        }
    }

    fn decode_value(&self, value: &EncodedValue) -> Result<Option<V>> {
        value
            .as_bytes()
            .map(|bytes| self.value_codec.decode(bytes))
            .transpose()
            .map_err(Into::into)
    }

    /// Insert a new key; `None` stores a null value
    pub async fn insert(
        &self,
        key: &K,
        value: Option<&V>,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<RedoUndo> {
        let key = self.key_codec.encode(key);
        self.store
            .insert(&key, self.encode_value(value), seq, cancel)
            .await
    }

    /// Insert, or return the present value without mutating
    ///
    /// The outer `Option` of the first field is `Some` when the key existed.
    pub async fn insert_with_output(
        &self,
        key: &K,
        value: Option<&V>,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(Option<Option<V>>, Option<RedoUndo>)> {
        let key = self.key_codec.encode(key);
        let (existing, log) = self
            .store
            .insert_with_output(&key, self.encode_value(value), seq, cancel)
            .await?;
        let existing = existing.map(|v| self.decode_value(&v)).transpose()?;
        Ok((existing, log))
    }

    /// Insert or replace; returns the previous value if the key existed
    pub async fn upsert(
        &self,
        key: &K,
        value: Option<&V>,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(Option<Option<V>>, RedoUndo)> {
        let key = self.key_codec.encode(key);
        let (previous, log) = self
            .store
            .upsert(&key, self.encode_value(value), seq, cancel)
            .await?;
        let previous = previous.map(|v| self.decode_value(&v)).transpose()?;
        Ok((previous, log))
    }

    /// Replace the value of a present key
    pub async fn update(
        &self,
        key: &K,
        value: Option<&V>,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<RedoUndo> {
        let key = self.key_codec.encode(key);
        self.store
            .update(&key, self.encode_value(value), seq, cancel)
            .await
    }

    /// Replace the value of a present key, returning the old value
    pub async fn update_with_output(
        &self,
        key: &K,
        value: Option<&V>,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(Option<V>, RedoUndo)> {
        let key = self.key_codec.encode(key);
        let (old, log) = self
            .store
            .update_with_output(&key, self.encode_value(value), seq, cancel)
            .await?;
        Ok((self.decode_value(&old)?, log))
    }

    /// Delete a present key
    pub async fn delete(
        &self,
        key: &K,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(bool, RedoUndo)> {
        let key = self.key_codec.encode(key);
        self.store.delete(&key, seq, cancel).await
    }

    /// Delete a present key, returning its value
    pub async fn delete_with_output(
        &self,
        key: &K,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<(Option<V>, RedoUndo)> {
        let key = self.key_codec.encode(key);
        let (old, log) = self.store.delete_with_output(&key, seq, cancel).await?;
        Ok((self.decode_value(&old)?, log))
    }

    /// Read a key's value; `Ok(None)` for a null value
    ///
    /// # Errors
    /// `KeyNotFound` if the key is absent.
    pub async fn seek(&self, key: &K, cancel: &CancellationToken) -> Result<Option<V>> {
        let key = self.key_codec.encode(key);
        let value = self.store.seek(&key, cancel).await?;
        self.decode_value(&value)
    }

    /// Replay a redo record and decode it into typed form
    pub async fn apply(
        &self,
        seq: SequenceNumber,
        redo: &OperationData,
        decode_only: bool,
        cancel: &CancellationToken,
    ) -> Result<TypedOperation<K, V>> {
        let operation = self.store.apply(seq, redo, decode_only, cancel).await?;
        let key = operation
            .key
            .as_deref()
            .map(|k| self.key_codec.decode(k))
            .transpose()?;
        // partial updates carry a byte patch, not a whole value
        let value = match (&operation.operation_type, &operation.value) {
            (OperationType::PartialUpdate, _) | (_, None) => None,
            (_, Some(v)) => self.decode_value(v)?,
        };
        let entries = operation
            .entries
            .iter()
            .map(|(k, v)| Ok((self.key_codec.decode(k)?, self.decode_value(v)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(TypedOperation {
            operation_type: operation.operation_type,
            sequence_number: operation.sequence_number,
            key,
            value,
            entries,
        })
    }

    /// See [`BtreeStore::on_operation_stable`]
    pub async fn on_operation_stable(
        &self,
        seq: SequenceNumber,
        cancel: &CancellationToken,
    ) -> Result<SequenceNumber> {
        self.store.on_operation_stable(seq, cancel).await
    }

    /// See [`BtreeStore::checkpoint`]
    pub async fn checkpoint(&self, seq: SequenceNumber, cancel: &CancellationToken) -> Result<()> {
        self.store.checkpoint(seq, cancel).await
    }

    /// Store counters
    pub fn statistics(&self) -> BtreeStatistics {
        self.store.statistics()
    }

    /// See [`BtreeStore::close`]
    pub async fn close(&self, flush: bool, cancel: &CancellationToken) -> Result<()> {
        self.store.close(flush, cancel).await
    }

    /// Untyped store underneath
    pub fn store(&self) -> &BtreeStore {
        &self.store
    }
}
