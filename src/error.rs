use crate::domain::account::AccountId;
use crate::domain::transaction::{IdempotencyKey, TransactionId, TransactionState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Unsupported currency: {0}")]
    InvalidCurrency(String),
    #[error("Idempotency key {0} was reused with different parameters")]
    Conflict(IdempotencyKey),
    #[error("Postings for transaction {transaction} do not balance (sum {sum})")]
    UnbalancedPostings {
        transaction: TransactionId,
        sum: i128,
    },
    #[error("Account {0} not found")]
    AccountNotFound(AccountId),
    #[error("Account {0} is frozen")]
    AccountFrozen(AccountId),
    #[error("Account {0} is closed")]
    AccountClosed(AccountId),
    #[error("Transaction {0} not found")]
    TransactionNotFound(TransactionId),
    #[error("Illegal transaction transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionState,
        to: TransactionState,
    },
    #[error("Payment gateway unavailable: {0}")]
    TransientGateway(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
}

impl PaymentError {
    /// Stable, machine-readable code surfaced to callers.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "validation_error",
            Self::InvalidCurrency(_) => "invalid_currency",
            Self::Conflict(_) => "idempotency_conflict",
            Self::UnbalancedPostings { .. } => "unbalanced_postings",
            Self::AccountNotFound(_) => "account_not_found",
            Self::AccountFrozen(_) => "account_frozen",
            Self::AccountClosed(_) => "account_closed",
            Self::TransactionNotFound(_) => "transaction_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::TransientGateway(_) => "gateway_unavailable",
            Self::CsvError(_) => "malformed_input",
            Self::StorageError(_) | Self::IoError(_) | Self::SerializationError(_) => {
                "storage_error"
            }
            #[cfg(feature = "storage-rocksdb")]
            Self::RocksDbError(_) => "storage_error",
        }
    }

    /// Whether the failure may succeed on a later attempt.
    ///
    /// The reconciliation worker retries these on its next pass; the
    /// coordinator never retries inline.
    pub fn is_retryable(&self) -> bool {
        self.is_transient_gateway() || self.is_storage()
    }

    pub fn is_transient_gateway(&self) -> bool {
        matches!(self, Self::TransientGateway(_))
    }

    pub fn is_storage(&self) -> bool {
        self.reason_code() == "storage_error"
    }

    /// Errors that indicate a bug in the caller rather than a business outcome.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::UnbalancedPostings { .. } | Self::AccountNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
