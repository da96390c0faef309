//! Error types for the rowtrack engine.

use crate::TxId;
use thiserror::Error;

/// Failure reported by a persistence adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("persistence adapter failed: {message}")]
pub struct AdapterError {
    pub message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// All possible errors from the rowtrack engine.
///
/// Keys are carried in their `Debug` rendering so the error type stays
/// independent of the row buffer in use.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Merge errors
    #[error(
        "concurrency conflict on row {key}: baseline read id {baseline_read_id} is newer than incoming read id {incoming_read_id}"
    )]
    ConcurrencyConflict {
        key: String,
        baseline_read_id: TxId,
        incoming_read_id: TxId,
    },

    #[error("modification of non-existing row: {key}")]
    NonExistingRow { key: String },

    // Transaction errors
    #[error("row already exists: {key}")]
    RowAlreadyExists { key: String },

    #[error("transaction {tx_id} is no longer open")]
    TransactionClosed { tx_id: TxId },

    // Infrastructure errors
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl Error {
    pub(crate) fn conflict(
        key: &impl std::fmt::Debug,
        baseline_read_id: TxId,
        incoming_read_id: TxId,
    ) -> Self {
        Error::ConcurrencyConflict {
            key: format!("{key:?}"),
            baseline_read_id,
            incoming_read_id,
        }
    }

    pub(crate) fn non_existing(key: &impl std::fmt::Debug) -> Self {
        Error::NonExistingRow {
            key: format!("{key:?}"),
        }
    }

    pub(crate) fn already_exists(key: &impl std::fmt::Debug) -> Self {
        Error::RowAlreadyExists {
            key: format!("{key:?}"),
        }
    }

    /// Whether the caller may retry the whole transaction against a fresh
    /// snapshot. Only concurrency conflicts qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict { .. })
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
