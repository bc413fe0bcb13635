use super::account::{Account, AccountId, AccountKind, AccountStatus};
use super::event::TransactionEvent;
use super::money::{Amount, Currency};
use super::posting::{BalanceSnapshot, CommitReceipt, Posting, PostingDraft, SequenceRange};
use super::transaction::{GatewayReference, Transaction, TransactionId, TransactionState};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Durable, append-only record of postings per account.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fails with `InvalidCurrency` when the store is not configured for `currency`.
    async fn create_account(
        &self,
        currency: Currency,
        kind: AccountKind,
        label: Option<String>,
    ) -> Result<Account>;

    async fn open_account(&self, currency: Currency) -> Result<AccountId> {
        Ok(self
            .create_account(currency, AccountKind::Internal, None)
            .await?
            .id)
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>>;

    async fn all_accounts(&self) -> Result<Vec<Account>>;

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<Account>;

    /// Records all postings of a transaction or none of them.
    ///
    /// Re-appending for a transaction that is already recorded writes nothing
    /// and returns the original receipt with `replayed` set.
    async fn append_postings(
        &self,
        transaction: TransactionId,
        postings: Vec<PostingDraft>,
    ) -> Result<CommitReceipt>;

    /// Sum of postings up to and including `as_of`, or the latest version.
    async fn balance(&self, id: AccountId, as_of: Option<u64>) -> Result<BalanceSnapshot>;

    /// Postings of `id` within `range`, in sequence order, at most `limit`.
    async fn postings_page(
        &self,
        id: AccountId,
        range: SequenceRange,
        limit: usize,
    ) -> Result<Vec<Posting>>;

    async fn postings_for_transaction(&self, transaction: TransactionId) -> Result<Vec<Posting>>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, txn: Transaction) -> Result<()>;

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>>;

    /// Replaces the stored transaction if its revision still equals
    /// `expected_revision` and the state change is a legal transition.
    ///
    /// Returns the stored value (with its revision bumped), or `None` when
    /// another writer got there first.
    async fn compare_and_set(
        &self,
        expected_revision: u64,
        next: Transaction,
    ) -> Result<Option<Transaction>>;

    async fn list_by_state(&self, state: TransactionState) -> Result<Vec<Transaction>>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type TransactionStoreRef = Arc<dyn TransactionStore>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResult {
    Approved(GatewayReference),
    Declined(String),
    /// Timed out or otherwise indeterminate; resolved later via `query_status`.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Approved,
    Declined,
    Unknown,
}

/// External payment network. Only consulted for cross-institution payments.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(
        &self,
        reference: &GatewayReference,
        amount: Amount,
        source: AccountId,
        destination: AccountId,
    ) -> Result<GatewayResult>;

    async fn query_status(&self, reference: &GatewayReference) -> Result<GatewayStatus>;

    async fn reverse(&self, reference: &GatewayReference) -> Result<()>;
}

/// Fire-and-forget event delivery. Errors are logged by the caller, never propagated.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &TransactionEvent) -> Result<()>;
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// `false` for unknown accounts.
    async fn is_active(&self, id: AccountId) -> Result<bool>;
    async fn currency_of(&self, id: AccountId) -> Result<Option<Currency>>;
    async fn kind_of(&self, id: AccountId) -> Result<Option<AccountKind>>;
}
