//! Storage layer for relistore
//!
//! This crate implements the keyed store:
//! - BtreeStore: ordered map with per-key version chains behind an RwLock
//! - Redo/undo log records for every mutation, replayable on a replica
//! - Stability watermark with reclamation of superseded versions
//! - Checkpoint images and recovery for persisted stores
//! - Copy streams to seed a new replica
//! - Key ordering descriptors and key/value codecs
//! - Btree: typed facade over the store
//!
//! # Usage
//!
//! ```no_run
//! use relistore_core::CancellationToken;
//! use relistore_storage::{BtreeConfiguration, BtreeStore, EncodedValue};
//! use relistore_storage::ordering::{KeyComparisonDescription, KeyDataType};
//!
//! # async fn run() -> relistore_core::Result<()> {
//! let config = BtreeConfiguration::volatile(KeyComparisonDescription::for_type(KeyDataType::Binary));
//! let cancel = CancellationToken::new();
//! let store = BtreeStore::open(config, false, &cancel).await?;
//! let log = store.insert(b"k", EncodedValue::from(b"v".to_vec()), 1, &cancel).await?;
//! assert!(!log.redo.is_empty());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod btree;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod copy;
pub mod log;
pub mod ordering;
pub mod scan;
pub mod stats;
pub mod typed;
pub mod value;
mod version;

pub use btree::BtreeStore;
pub use config::{BtreeConfiguration, BtreeStorageConfiguration};
pub use copy::CopyStream;
pub use log::{BtreeOperation, OperationData, OperationType, RedoUndo};
pub use ordering::{KeyComparisonDescription, KeyDataType};
pub use scan::{BtreeScan, ScanItem};
pub use stats::BtreeStatistics;
pub use typed::{Btree, TypedOperation};
pub use value::EncodedValue;
