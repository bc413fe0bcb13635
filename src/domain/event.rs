use crate::domain::transaction::Transaction;
use serde::Serialize;

/// Published to the notification sink once a transaction reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum TransactionEvent {
    TransactionCommitted(Transaction),
    /// Covers both `Failed` and `Compensated` outcomes.
    TransactionFailed(Transaction),
}

impl TransactionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransactionEvent::TransactionCommitted(_) => "transaction_committed",
            TransactionEvent::TransactionFailed(_) => "transaction_failed",
        }
    }

    pub fn transaction(&self) -> &Transaction {
        match self {
            TransactionEvent::TransactionCommitted(txn) | TransactionEvent::TransactionFailed(txn) => txn,
        }
    }
}
