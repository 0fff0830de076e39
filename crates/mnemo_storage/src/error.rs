//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The storage file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A batch or scan referenced an index that was never declared.
    #[error("index {0} has not been declared")]
    IndexNotDeclared(u8),

    /// The backend was used before `init` completed.
    #[error("storage has not been initialized")]
    NotInitialized,

    /// `init` was called on a backend that is already open.
    #[error("storage is already initialized")]
    AlreadyInitialized,

    /// A file backend was initialized without a directory.
    #[error("file storage requires a directory path")]
    MissingPath,

    /// A batch encodes to more bytes than one commit frame can hold.
    #[error("batch of {0} bytes exceeds the commit frame limit")]
    BatchTooLarge(usize),

    /// Another process holds the storage directory lock.
    #[error("storage locked: another process has exclusive access")]
    Locked,
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
