//! Error types for relistore
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Every failure surfaced by the store, the lock manager or the transaction
//! manager is one of these variants; [`Error::kind`] gives callers a flat tag
//! to branch on without matching payloads.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for relistore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for relistore
#[derive(Debug, Error)]
pub enum Error {
    /// Insert of a key that is already present
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Key is absent from the store
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Lock request was not granted before its timeout elapsed
    #[error("Lock timeout on resource '{resource}' ({mode}) after {timeout:?}")]
    LockTimeout {
        /// Resource name the lock was requested on
        resource: String,
        /// Requested mode
        mode: String,
        /// Timeout the caller supplied
        timeout: Duration,
    },

    /// Inconsistent or unusable configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Caller cancelled the operation before it completed
    #[error("Operation cancelled")]
    OperationCancelled,

    /// Component was closed before or during the call
    #[error("Already closed: {0}")]
    AlreadyClosed(String),

    /// Malformed argument (bad key size, illegal lock mode, stale sequence number)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configured memory or storage ceiling would be exceeded
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Log record or checkpoint image failed validation
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// Key or value codec failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// I/O error (checkpoint files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Flat classification of [`Error`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::DuplicateKey`]
    DuplicateKey,
    /// See [`Error::KeyNotFound`]
    KeyNotFound,
    /// See [`Error::LockTimeout`]
    LockTimeout,
    /// See [`Error::InvalidConfiguration`]
    InvalidConfiguration,
    /// See [`Error::OperationCancelled`]
    OperationCancelled,
    /// See [`Error::AlreadyClosed`]
    AlreadyClosed,
    /// See [`Error::InvalidArgument`]
    InvalidArgument,
    /// See [`Error::CapacityExceeded`]
    CapacityExceeded,
    /// See [`Error::CorruptRecord`]
    CorruptRecord,
    /// See [`Error::Codec`]
    Codec,
    /// See [`Error::Io`]
    Io,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateKey(_) => ErrorKind::DuplicateKey,
            Error::KeyNotFound(_) => ErrorKind::KeyNotFound,
            Error::LockTimeout { .. } => ErrorKind::LockTimeout,
            Error::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Error::OperationCancelled => ErrorKind::OperationCancelled,
            Error::AlreadyClosed(_) => ErrorKind::AlreadyClosed,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            Error::CorruptRecord(_) => ErrorKind::CorruptRecord,
            Error::Codec(_) => ErrorKind::Codec,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the caller may retry the same call after backoff.
    ///
    /// Only lock timeouts qualify; every other kind is terminal to the call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. })
    }

    /// Helper for key errors: renders a key as hex for diagnostics
    pub fn describe_key(key: &[u8]) -> String {
        const PREVIEW: usize = 32;
        let mut out = String::with_capacity(key.len().min(PREVIEW) * 2 + 3);
        for b in key.iter().take(PREVIEW) {
            out.push_str(&format!("{:02x}", b));
        }
        if key.len() > PREVIEW {
            out.push_str("...");
        }
        out
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::CorruptRecord(e.to_string())
    }
}
