//! Core types for relistore
//!
//! This crate holds what every layer shares:
//! - Error taxonomy ([`Error`], [`ErrorKind`])
//! - Identifiers ([`PartitionId`], [`ReplicaId`], [`TransactionId`], [`AtomicGroupId`])
//! - Cooperative cancellation ([`CancellationToken`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use tokio_util::sync::CancellationToken;
pub use types::{
    AtomicGroupId, PartitionId, ReplicaId, SequenceNumber, TransactionId,
    INVALID_SEQUENCE_NUMBER,
};

/// Fail with [`Error::OperationCancelled`] if `token` has fired.
///
/// Called at entry and again right before a mutation is published, so a
/// cancelled call never leaves a partial effect behind.
pub fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::OperationCancelled)
    } else {
        Ok(())
    }
}
