use crate::domain::account::{Account, AccountId, AccountKind, AccountStatus};
use crate::domain::money::Currency;
use crate::domain::ports::{LedgerStore, TransactionStore};
use crate::domain::posting::{
    BalanceSnapshot, CommitReceipt, Posting, PostingDraft, SequenceRange, ensure_balanced,
};
use crate::domain::transaction::{Transaction, TransactionId, TransactionState};
use crate::error::{PaymentError, Result};
use crate::locks::KeyedLocks;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Postings of one account plus the running balance after each of them.
#[derive(Debug, Clone)]
struct AccountLedger {
    account: Account,
    postings: Vec<Posting>,
    running: Vec<i64>,
}

impl AccountLedger {
    fn new(account: Account) -> Self {
        Self {
            account,
            postings: Vec::new(),
            running: Vec::new(),
        }
    }

    fn balance(&self, as_of: Option<u64>) -> BalanceSnapshot {
        let upto = match as_of {
            Some(version) => self.postings.partition_point(|p| p.sequence <= version),
            None => self.postings.len(),
        };
        match upto.checked_sub(1) {
            Some(last) => BalanceSnapshot {
                account: self.account.id,
                amount: self.running[last],
                version: self.postings[last].sequence,
            },
            None => BalanceSnapshot::empty(self.account.id),
        }
    }

    fn latest(&self) -> i64 {
        self.running.last().copied().unwrap_or(0)
    }

    /// `running` must be the balance after `posting`, already checked.
    fn push(&mut self, posting: Posting, running: i64) {
        self.running.push(running);
        self.postings.push(posting);
    }
}

/// A thread-safe in-memory ledger.
///
/// Each account's data sits in its own `DashMap` entry. Writers and readers
/// of an account serialize through [`KeyedLocks`], and a commit holds the
/// locks of all its accounts until its receipt is recorded, so no reader sees
/// one side of a transaction without the other. Commits on disjoint accounts
/// run in parallel. Not durable: meant for tests and throwaway batch runs.
pub struct InMemoryLedgerStore {
    supported: Vec<Currency>,
    ledgers: DashMap<AccountId, AccountLedger>,
    receipts: DashMap<TransactionId, Vec<Posting>>,
    locks: KeyedLocks<AccountId>,
    next_sequence: AtomicU64,
}

impl InMemoryLedgerStore {
    /// Creates an empty ledger accepting every known currency.
    pub fn new() -> Self {
        Self::with_currencies(Currency::ALL.to_vec())
    }

    pub fn with_currencies(supported: Vec<Currency>) -> Self {
        Self {
            supported,
            ledgers: DashMap::new(),
            receipts: DashMap::new(),
            locks: KeyedLocks::new(),
            next_sequence: AtomicU64::new(1),
        }
    }

    fn load(&self, id: AccountId) -> Result<Account> {
        self.ledgers
            .get(&id)
            .map(|ledger| ledger.account.clone())
            .ok_or(PaymentError::AccountNotFound(id))
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_account(
        &self,
        currency: Currency,
        kind: AccountKind,
        label: Option<String>,
    ) -> Result<Account> {
        if !self.supported.contains(&currency) {
            return Err(PaymentError::InvalidCurrency(currency.to_string()));
        }
        let account = Account::new(currency, kind, label);
        self.ledgers
            .insert(account.id, AccountLedger::new(account.clone()));
        Ok(account)
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.ledgers.get(&id).map(|ledger| ledger.account.clone()))
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .ledgers
            .iter()
            .map(|ledger| ledger.account.clone())
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<Account> {
        let _guard = self.locks.lock(&id).await;
        let mut ledger = self
            .ledgers
            .get_mut(&id)
            .ok_or(PaymentError::AccountNotFound(id))?;
        let updated = ledger.account.with_status(status)?;
        ledger.account = updated.clone();
        Ok(updated)
    }

    async fn append_postings(
        &self,
        transaction: TransactionId,
        postings: Vec<PostingDraft>,
    ) -> Result<CommitReceipt> {
        ensure_balanced(transaction, &postings)?;

        let ids: Vec<AccountId> = postings.iter().map(|p| p.account).collect();
        let _guards = self.locks.lock_all(&ids).await;

        if let Some(existing) = self.receipts.get(&transaction) {
            return Ok(CommitReceipt {
                transaction_id: transaction,
                postings: existing.clone(),
                replayed: true,
            });
        }

        let mut currency = None;
        for id in &ids {
            let account = self.load(*id)?;
            account.ensure_postable()?;
            match currency {
                None => currency = Some(account.currency),
                Some(c) if c != account.currency => {
                    return Err(PaymentError::ValidationError(format!(
                        "Transaction {} mixes {} and {} accounts",
                        transaction, c, account.currency
                    )));
                }
                Some(_) => {}
            }
        }

        // every new running balance is computed before anything is written
        let mut running: Vec<(AccountId, i64)> = Vec::with_capacity(postings.len());
        for draft in &postings {
            let previous = match running.iter().rev().find(|(id, _)| *id == draft.account) {
                Some((_, amount)) => *amount,
                None => self
                    .ledgers
                    .get(&draft.account)
                    .map(|ledger| ledger.latest())
                    .ok_or(PaymentError::AccountNotFound(draft.account))?,
            };
            let next = previous.checked_add(draft.amount).ok_or_else(|| {
                PaymentError::ValidationError(format!(
                    "Balance of account {} would overflow",
                    draft.account
                ))
            })?;
            running.push((draft.account, next));
        }

        let first = self
            .next_sequence
            .fetch_add(postings.len() as u64, Ordering::SeqCst);
        let timestamp = Utc::now();
        let written: Vec<Posting> = postings
            .iter()
            .enumerate()
            .map(|(i, draft)| Posting {
                account: draft.account,
                amount: draft.amount,
                transaction_id: transaction,
                sequence: first + i as u64,
                timestamp,
            })
            .collect();

        for (posting, (_, balance)) in written.iter().zip(running) {
            let mut ledger = self
                .ledgers
                .get_mut(&posting.account)
                .ok_or(PaymentError::AccountNotFound(posting.account))?;
            ledger.push(posting.clone(), balance);
        }
        self.receipts.insert(transaction, written.clone());

        Ok(CommitReceipt {
            transaction_id: transaction,
            postings: written,
            replayed: false,
        })
    }

    async fn balance(&self, id: AccountId, as_of: Option<u64>) -> Result<BalanceSnapshot> {
        let _guard = self.locks.lock(&id).await;
        self.ledgers
            .get(&id)
            .map(|ledger| ledger.balance(as_of))
            .ok_or(PaymentError::AccountNotFound(id))
    }

    async fn postings_page(
        &self,
        id: AccountId,
        range: SequenceRange,
        limit: usize,
    ) -> Result<Vec<Posting>> {
        let _guard = self.locks.lock(&id).await;
        let ledger = self
            .ledgers
            .get(&id)
            .ok_or(PaymentError::AccountNotFound(id))?;
        let start = ledger.postings.partition_point(|p| p.sequence < range.from);
        Ok(ledger.postings[start..]
            .iter()
            .take_while(|p| range.contains(p.sequence))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn postings_for_transaction(&self, transaction: TransactionId) -> Result<Vec<Posting>> {
        Ok(self
            .receipts
            .get(&transaction)
            .map(|postings| postings.clone())
            .unwrap_or_default())
    }
}

/// A thread-safe in-memory store for transactions.
///
/// Compare-and-set runs under the `DashMap` entry lock, which makes it atomic
/// per transaction.
#[derive(Default)]
pub struct InMemoryTransactionStore {
    transactions: DashMap<TransactionId, Transaction>,
}

impl InMemoryTransactionStore {
    /// Creates a new, empty in-memory transaction store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, txn: Transaction) -> Result<()> {
        match self.transactions.entry(txn.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(PaymentError::ValidationError(
                format!("Transaction {} already exists", txn.id),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(txn);
                Ok(())
            }
        }
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.transactions.get(&id).map(|txn| txn.clone()))
    }

    async fn compare_and_set(
        &self,
        expected_revision: u64,
        next: Transaction,
    ) -> Result<Option<Transaction>> {
        let mut current = self
            .transactions
            .get_mut(&next.id)
            .ok_or(PaymentError::TransactionNotFound(next.id))?;
        if current.revision != expected_revision {
            return Ok(None);
        }
        if !current.state.can_transition_to(next.state) {
            return Err(PaymentError::InvalidTransition {
                from: current.state,
                to: next.state,
            });
        }
        let stored = Transaction {
            revision: expected_revision + 1,
            ..next
        };
        *current = stored.clone();
        Ok(Some(stored))
    }

    async fn list_by_state(&self, state: TransactionState) -> Result<Vec<Transaction>> {
        let mut found: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|txn| txn.state == state)
            .map(|txn| txn.clone())
            .collect();
        found.sort_by_key(|txn| txn.created_at);
        Ok(found)
    }
}
