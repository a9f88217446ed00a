//! Error taxonomy for ledger operations.
//!
//! Storage-level failures are wrapped in [`StoreError`]; everything a caller of the
//! period store, reconciler or carry-forward operator can observe is a [`LedgerError`].
//! The service boundary (`crate::service`) turns these into structured results.

use crate::executor::DbError;
use crate::model::PeriodId;
use crate::transaction::TransactionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Failure of the persistence layer underneath the ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("could not decode {column}: {message}")]
    Decode { column: &'static str, message: String },
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Period '{name}' is locked; ledger-affecting changes are not allowed")]
    LockedPeriod { period_id: PeriodId, name: String },

    #[error("Period '{name}' is already locked")]
    AlreadyLocked { period_id: PeriodId, name: String },

    #[error("Target period already has carried-forward products")]
    DuplicateCarryForward { target: PeriodId },

    #[error("{0}")]
    Validation(String),

    #[error("Ledger for period {period_id} changed concurrently (expected version {expected})")]
    ConcurrencyConflict { period_id: PeriodId, expected: i64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// A chain walk stopped part way. Periods before `failed_at` are committed,
    /// `failed_at` and everything after it still hold their previous values.
    #[error(
        "Reconciliation stopped at period {failed_at} after {committed} committed period(s); \
         run sync again to converge: {source}"
    )]
    PartialReconcile {
        committed: usize,
        failed_at: PeriodId,
        source: Box<LedgerError>,
    },
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl Into<i64>) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    /// Whether retrying the same operation could succeed without any other change.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::ConcurrencyConflict { .. } => true,
            LedgerError::PartialReconcile { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<DbError> for LedgerError {
    fn from(err: DbError) -> Self {
        LedgerError::Storage(StoreError::Database(err))
    }
}

impl From<TransactionError> for LedgerError {
    fn from(err: TransactionError) -> Self {
        LedgerError::Storage(StoreError::Transaction(err))
    }
}
