//! Error taxonomy surfaced to callers of the stock engine.

use thiserror::Error;

use sparestock_core::DomainError;

use crate::store::StoreError;

pub type StockResult<T> = Result<T, StockError>;

/// Failure of a stock operation.
///
/// A failed mutation has no observable effect on stored state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    /// Unknown part, or a part that no longer accepts movements.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input (non-positive quantity, unknown direction, bad range...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stock-out exceeding on-hand quantity.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// A concurrent writer won the race (or the attempt timed out). Safe to retry.
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    /// I/O-level failure from the storage backend.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Delete blocked by ledger rows referencing the part.
    #[error("restricted: {0}")]
    Restricted(String),
}

impl StockError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StockError::TransactionConflict(_))
    }
}

impl From<DomainError> for StockError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument(msg) => StockError::InvalidArgument(msg),
            DomainError::InvalidId(msg) => StockError::InvalidArgument(msg),
            DomainError::InvariantViolation(msg) => StockError::InvalidArgument(msg),
            DomainError::NotFound(msg) => StockError::NotFound(msg),
            DomainError::InsufficientStock {
                requested,
                available,
            } => StockError::InsufficientStock {
                requested,
                available,
            },
            DomainError::Conflict(msg) => StockError::TransactionConflict(msg),
        }
    }
}

impl From<StoreError> for StockError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::PartNotFound(id) => StockError::NotFound(format!("part {id}")),
            StoreError::Concurrency(msg) => StockError::TransactionConflict(msg),
            StoreError::Restricted(msg) => StockError::Restricted(msg),
            StoreError::ForeignKey(msg) => StockError::InvalidArgument(msg),
            StoreError::Unavailable(msg) => StockError::StorageUnavailable(msg),
            StoreError::Corrupt(msg) => StockError::StorageUnavailable(msg),
            StoreError::Domain(err) => err.into(),
        }
    }
}
