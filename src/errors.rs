//! Unified error types and result handling.
//!
//! Business-rule failures are returned as typed variants so the request layer
//! can map them to a rejection carrying the failing kind. Storage failures are
//! kept apart in [`Error::Database`] so no business detail leaks from them.

use sea_orm::{ConnAcquireErr, DbErr, RuntimeErr, SqlErr};
use thiserror::Error;

/// Every error the ledger can return.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Tag not found: {identifier}")]
    TagNotFound { identifier: String },

    #[error("Tag {tag_id} is not active (status: {status})")]
    TagNotActive { tag_id: i64, status: String },

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: String },

    #[error("Insufficient balance: available {current}, required {required}")]
    InsufficientBalance { current: String, required: String },

    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: i64 },

    #[error("Product {product_id} is not available for sale")]
    ProductUnavailable { product_id: i64 },

    #[error("Product {product_id} stock too low: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: i64,
        available: i32,
        requested: i32,
    },

    #[error("Transaction not found: {transaction_id}")]
    TransactionNotFound { transaction_id: i64 },

    #[error("Transaction {transaction_id} is not a refund request")]
    NotARefundRequest { transaction_id: i64 },

    #[error("Transaction {transaction_id} is not pending (status: {status})")]
    NotPending { transaction_id: i64, status: String },

    #[error("Concurrent update conflict after {attempts} attempt(s)")]
    ConcurrencyConflict { attempts: u32 },

    #[error("Nothing to hand over for staff member {staff_id}")]
    NothingToHandOver { staff_id: i64 },

    #[error("Tag {tag_id} has history or an attendee link and cannot be deleted")]
    TagInUse { tag_id: i64 },

    #[error("A tag already uses identifier {identifier}")]
    DuplicateTag { identifier: String },

    #[error("Invalid value: {message}")]
    Validation { message: String },

    #[error("Corrupt record: {message}")]
    CorruptRecord { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

/// How the caller should treat an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A rule was violated by the request; surfaced as-is, not retried.
    BusinessRule,
    /// A transient conflict; the same request may succeed later.
    Retryable,
    /// Storage failed; no business detail should be exposed.
    Infrastructure,
}

impl Error {
    /// Classifies the error for the request layer.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConcurrencyConflict { .. } => ErrorKind::Retryable,
            Self::Database(_) | Self::Config { .. } | Self::CorruptRecord { .. } => {
                ErrorKind::Infrastructure
            }
            _ => ErrorKind::BusinessRule,
        }
    }

    /// Whether retrying the whole atomic unit could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Retryable)
    }

    /// Maps lock waits, busy databases and handover-key collisions to
    /// [`Error::ConcurrencyConflict`]; every other storage error stays
    /// [`Error::Database`].
    pub(crate) fn classify_db(err: DbErr) -> Self {
        if is_conflict(&err) {
            Self::ConcurrencyConflict { attempts: 1 }
        } else {
            Self::Database(err)
        }
    }
}

fn is_conflict(err: &DbErr) -> bool {
    if let Some(SqlErr::UniqueConstraintViolation(message)) = err.sql_err() {
        return message.contains("handover_key");
    }
    match err {
        DbErr::ConnectionAcquire(ConnAcquireErr::Timeout) => true,
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => {
            let message = e.to_string().to_lowercase();
            message.contains("database is locked")
                || message.contains("database table is locked")
                || message.contains("deadlock")
                || message.contains("lock wait timeout")
                || message.contains("could not serialize")
        }
        _ => false,
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
