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
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Column Family for account records.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for postings, keyed by account id then big-endian sequence.
pub const CF_POSTINGS: &str = "postings";
/// Column Family for the latest balance snapshot of each account.
pub const CF_BALANCES: &str = "balances";
/// Column Family for the postings written by each transaction.
pub const CF_TXN_POSTINGS: &str = "txn_postings";
/// Column Family for transaction lifecycle records.
pub const CF_TRANSACTIONS: &str = "transactions";

const TXN_LOCK_STRIPES: usize = 32;

/// A persistent ledger and transaction store backed by RocksDB.
///
/// Every commit is a single `WriteBatch` spanning the postings, balances and
/// transaction index column families, so a crash never leaves half of a
/// double-entry behind. Account writers serialize through per-account locks;
/// transaction compare-and-set goes through a small set of lock stripes.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    supported: Arc<Vec<Currency>>,
    account_locks: Arc<KeyedLocks<AccountId>>,
    txn_stripes: Arc<Vec<Mutex<()>>>,
    next_sequence: Arc<AtomicU64>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// The ledger sequence resumes after the highest version found in the
    /// balances column family.
    pub fn open<P: AsRef<Path>>(path: P, supported: Vec<Currency>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [
            CF_ACCOUNTS,
            CF_POSTINGS,
            CF_BALANCES,
            CF_TXN_POSTINGS,
            CF_TRANSACTIONS,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, families)?;
        let store = Self {
            db: Arc::new(db),
            supported: Arc::new(supported),
            account_locks: Arc::new(KeyedLocks::new()),
            txn_stripes: Arc::new((0..TXN_LOCK_STRIPES).map(|_| Mutex::new(())).collect()),
            next_sequence: Arc::new(AtomicU64::new(1)),
        };

        let highest = store
            .scan::<BalanceSnapshot>(CF_BALANCES)?
            .into_iter()
            .map(|b| b.version)
            .max()
            .unwrap_or(0);
        store.next_sequence.store(highest + 1, Ordering::SeqCst);
        Ok(store)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::StorageError(format!("{} column family not found", name)))
    }

    fn read<T: DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, family: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(family)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, family: &str) -> Result<Vec<T>> {
        let cf = self.cf(family)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn posting_key(account: AccountId, sequence: u64) -> [u8; 24] {
        let mut key = [0u8; 24];
        key[..16].copy_from_slice(account.as_bytes());
        key[16..].copy_from_slice(&sequence.to_be_bytes());
        key
    }

    /// Walks an account's postings from `range.from` in sequence order.
    fn walk_postings(
        &self,
        account: AccountId,
        range: SequenceRange,
        limit: usize,
    ) -> Result<Vec<Posting>> {
        let cf = self.cf(CF_POSTINGS)?;
        let start = Self::posting_key(account, range.from);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start[..], Direction::Forward));

        let mut postings = Vec::new();
        for item in iter {
            if postings.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if key.len() != 24 || &key[..16] != account.as_bytes() {
                break;
            }
            let posting: Posting = serde_json::from_slice(&value)?;
            if !range.contains(posting.sequence) {
                break;
            }
            postings.push(posting);
        }
        Ok(postings)
    }

    fn stripe(&self, id: TransactionId) -> &Mutex<()> {
        let bytes = id.as_bytes();
        &self.txn_stripes[bytes[15] as usize % TXN_LOCK_STRIPES]
    }

    fn require_account(&self, id: AccountId) -> Result<Account> {
        self.read(CF_ACCOUNTS, id.as_bytes())?
            .ok_or(PaymentError::AccountNotFound(id))
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
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
        self.write(CF_ACCOUNTS, account.id.as_bytes(), &account)?;
        Ok(account)
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        self.read(CF_ACCOUNTS, id.as_bytes())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        self.scan(CF_ACCOUNTS)
    }

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<Account> {
        let _guard = self.account_locks.lock(&id).await;
        let updated = self.require_account(id)?.with_status(status)?;
        self.write(CF_ACCOUNTS, id.as_bytes(), &updated)?;
        Ok(updated)
    }

    async fn append_postings(
        &self,
        transaction: TransactionId,
        postings: Vec<PostingDraft>,
    ) -> Result<CommitReceipt> {
        ensure_balanced(transaction, &postings)?;

        let ids: Vec<AccountId> = postings.iter().map(|p| p.account).collect();
        let _guards = self.account_locks.lock_all(&ids).await;

        if let Some(existing) = self.read::<Vec<Posting>>(CF_TXN_POSTINGS, transaction.as_bytes())? {
            return Ok(CommitReceipt {
                transaction_id: transaction,
                postings: existing,
                replayed: true,
            });
        }

        let mut currency = None;
        for id in &ids {
            let account = self.require_account(*id)?;
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

        let cf_postings = self.cf(CF_POSTINGS)?;
        let cf_balances = self.cf(CF_BALANCES)?;
        let cf_txn = self.cf(CF_TXN_POSTINGS)?;

        let mut batch = WriteBatch::default();
        let mut balances: Vec<BalanceSnapshot> = Vec::new();
        for posting in &written {
            let previous = match balances.iter().position(|b| b.account == posting.account) {
                Some(i) => balances.remove(i),
                None => self
                    .read(CF_BALANCES, posting.account.as_bytes())?
                    .unwrap_or_else(|| BalanceSnapshot::empty(posting.account)),
            };
            balances.push(previous.apply(posting)?);
            batch.put_cf(
                cf_postings,
                Self::posting_key(posting.account, posting.sequence),
                serde_json::to_vec(posting)?,
            );
        }
        for balance in &balances {
            batch.put_cf(cf_balances, balance.account.as_bytes(), serde_json::to_vec(balance)?);
        }
        batch.put_cf(cf_txn, transaction.as_bytes(), serde_json::to_vec(&written)?);
        self.db.write(batch)?;

        Ok(CommitReceipt {
            transaction_id: transaction,
            postings: written,
            replayed: false,
        })
    }

    async fn balance(&self, id: AccountId, as_of: Option<u64>) -> Result<BalanceSnapshot> {
        self.require_account(id)?;
        let latest = self
            .read(CF_BALANCES, id.as_bytes())?
            .unwrap_or_else(|| BalanceSnapshot::empty(id));
        match as_of {
            Some(version) if version < latest.version => {
                let postings = self.walk_postings(id, SequenceRange::between(0, version), usize::MAX)?;
                postings
                    .iter()
                    .try_fold(BalanceSnapshot::empty(id), |acc, p| acc.apply(p))
            }
            _ => Ok(latest),
        }
    }

    async fn postings_page(
        &self,
        id: AccountId,
        range: SequenceRange,
        limit: usize,
    ) -> Result<Vec<Posting>> {
        self.require_account(id)?;
        self.walk_postings(id, range, limit)
    }

    async fn postings_for_transaction(&self, transaction: TransactionId) -> Result<Vec<Posting>> {
        Ok(self
            .read(CF_TXN_POSTINGS, transaction.as_bytes())?
            .unwrap_or_default())
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn insert(&self, txn: Transaction) -> Result<()> {
        let _guard = self.stripe(txn.id).lock();
        if self
            .read::<Transaction>(CF_TRANSACTIONS, txn.id.as_bytes())?
            .is_some()
        {
            return Err(PaymentError::ValidationError(format!(
                "Transaction {} already exists",
                txn.id
            )));
        }
        self.write(CF_TRANSACTIONS, txn.id.as_bytes(), &txn)
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.read(CF_TRANSACTIONS, id.as_bytes())
    }

    async fn compare_and_set(
        &self,
        expected_revision: u64,
        next: Transaction,
    ) -> Result<Option<Transaction>> {
        let _guard = self.stripe(next.id).lock();
        let current: Transaction = self
            .read(CF_TRANSACTIONS, next.id.as_bytes())?
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
        self.write(CF_TRANSACTIONS, stored.id.as_bytes(), &stored)?;
        Ok(Some(stored))
    }

    async fn list_by_state(&self, state: TransactionState) -> Result<Vec<Transaction>> {
        let mut found: Vec<Transaction> = self
            .scan::<Transaction>(CF_TRANSACTIONS)?
            .into_iter()
            .filter(|txn| txn.state == state)
            .collect();
        found.sort_by_key(|txn| txn.created_at);
        Ok(found)
    }
}
