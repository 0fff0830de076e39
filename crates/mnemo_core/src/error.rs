//! Error types for MnemoDB core.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in MnemoDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] mnemo_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored key is too short or carries an unknown tag.
    #[error("malformed key: {message}")]
    MalformedKey {
        /// Description of the problem.
        message: String,
    },

    /// An attribute id or symbol is not present in the registry.
    #[error("unknown attribute: {attribute}")]
    UnknownAttribute {
        /// The id or symbol that was looked up.
        attribute: String,
    },

    /// Registration would bind an id or symbol to two definitions.
    #[error("duplicate attribute {attribute}: {message}")]
    DuplicateAttribute {
        /// The conflicting symbol.
        attribute: String,
        /// What conflicted.
        message: String,
    },

    /// A value does not fit its attribute or its encoded form is invalid.
    #[error("invalid value: {message}")]
    InvalidValue {
        /// Description of the problem.
        message: String,
    },

    /// The writer did not finish the transaction before the deadline.
    ///
    /// The transaction may still commit later.
    #[error("transaction not processed within {timeout:?}")]
    TransactionTimeout {
        /// The deadline that expired.
        timeout: Duration,
    },

    /// A transaction function failed; nothing was committed.
    #[error("transaction function failed: {source}")]
    TransactionFunction {
        /// The error the function returned.
        source: Box<CoreError>,
    },

    /// A transaction function rejected the transaction.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// A located retraction target does not match the fact being written.
    #[error("consistency violation: {message}")]
    ConsistencyViolation {
        /// Description of the mismatch.
        message: String,
    },

    /// Every payload of a partition has been handed out.
    #[error("id space exhausted in partition {partition}")]
    PartitionExhausted {
        /// The exhausted partition.
        partition: u8,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The store has been closed.
    #[error("store is closed")]
    StoreClosed,
}

impl CoreError {
    /// Creates a malformed key error.
    pub fn malformed_key(message: impl Into<String>) -> Self {
        Self::MalformedKey {
            message: message.into(),
        }
    }

    /// Creates an unknown attribute error.
    pub fn unknown_attribute(attribute: impl ToString) -> Self {
        Self::UnknownAttribute {
            attribute: attribute.to_string(),
        }
    }

    /// Creates a duplicate attribute error.
    pub fn duplicate_attribute(attribute: impl ToString, message: impl Into<String>) -> Self {
        Self::DuplicateAttribute {
            attribute: attribute.to_string(),
            message: message.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }

    /// Wraps the error a transaction function returned.
    pub fn transaction_function(source: CoreError) -> Self {
        Self::TransactionFunction {
            source: Box::new(source),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates a consistency violation error.
    pub fn consistency_violation(message: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for [`CoreError::TransactionTimeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TransactionTimeout { .. })
    }
}
