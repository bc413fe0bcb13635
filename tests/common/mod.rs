#![allow(dead_code)]

use async_trait::async_trait;
use creoledger::application::coordinator::{Collaborators, TransactionCoordinator};
use creoledger::application::reconciliation::ReconciliationWorker;
use creoledger::config::EngineConfig;
use creoledger::domain::account::{Account, AccountId, AccountKind, AccountStatus};
use creoledger::domain::event::TransactionEvent;
use creoledger::domain::money::{Amount, Currency};
use creoledger::domain::ports::{
    GatewayResult, GatewayStatus, LedgerStore, LedgerStoreRef, NotificationSink, PaymentGateway,
    TransactionStore, TransactionStoreRef,
};
use creoledger::domain::posting::{BalanceSnapshot, CommitReceipt, Posting, PostingDraft, SequenceRange};
use creoledger::domain::transaction::{
    GatewayReference, IdempotencyKey, PaymentRequest, Transaction, TransactionId,
    TransactionResult, TransactionState,
};
use creoledger::error::{PaymentError, Result};
use creoledger::infrastructure::directory::LedgerDirectory;
use creoledger::infrastructure::in_memory::{InMemoryLedgerStore, InMemoryTransactionStore};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the scripted gateway answers to the next `authorize` call.
#[derive(Debug, Clone)]
pub enum Authorization {
    Approve,
    /// Approves under a reference of the gateway's own choosing.
    ApproveAs(String),
    Decline(String),
    Unknown,
    Unavailable,
}

/// A gateway double whose answers are set by the test.
///
/// `authorize` pops scripted answers and approves once the script runs out.
/// `query_status` answers per reference, `Unknown` by default.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Authorization>>,
    statuses: Mutex<HashMap<String, GatewayStatus>>,
    fail_reversals: AtomicBool,
    pub authorizations: AtomicUsize,
    pub queries: AtomicUsize,
    pub reversals: AtomicUsize,
}

impl ScriptedGateway {
    pub fn push(&self, answer: Authorization) {
        self.script.lock().unwrap().push_back(answer);
    }

    pub fn set_status(&self, transaction: TransactionId, status: GatewayStatus) {
        self.statuses.lock().unwrap().insert(
            GatewayReference::for_transaction(transaction).as_str().to_string(),
            status,
        );
    }

    pub fn set_status_for(&self, reference: &str, status: GatewayStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(reference.to_string(), status);
    }

    pub fn fail_reversals(&self, fail: bool) {
        self.fail_reversals.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn authorize(
        &self,
        reference: &GatewayReference,
        _amount: Amount,
        _source: AccountId,
        _destination: AccountId,
    ) -> Result<GatewayResult> {
        self.authorizations.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Authorization::Approve);
        match answer {
            Authorization::Approve => Ok(GatewayResult::Approved(reference.clone())),
            Authorization::ApproveAs(issued) => {
                Ok(GatewayResult::Approved(GatewayReference::new(issued)))
            }
            Authorization::Decline(reason) => Ok(GatewayResult::Declined(reason)),
            Authorization::Unknown => Ok(GatewayResult::Unknown),
            Authorization::Unavailable => {
                Err(PaymentError::TransientGateway("connection reset".to_string()))
            }
        }
    }

    async fn query_status(&self, reference: &GatewayReference) -> Result<GatewayStatus> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(reference.as_str())
            .cloned()
            .unwrap_or(GatewayStatus::Unknown))
    }

    async fn reverse(&self, _reference: &GatewayReference) -> Result<()> {
        if self.fail_reversals.load(Ordering::SeqCst) {
            return Err(PaymentError::TransientGateway("reversal timed out".to_string()));
        }
        self.reversals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Remembers every event it is handed; optionally fails each delivery.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TransactionEvent>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    pub fn events(&self) -> Vec<TransactionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, transaction: TransactionId) -> Vec<TransactionEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.transaction().id == transaction)
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: &TransactionEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentError::StorageError("sink offline".to_string()));
        }
        Ok(())
    }
}

/// In-memory ledger that can be told to fail its next appends or reads.
#[derive(Default)]
pub struct FlakyLedger {
    inner: InMemoryLedgerStore,
    failing_appends: AtomicUsize,
    failing_reads: AtomicUsize,
}

impl FlakyLedger {
    pub fn fail_next_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    async fn create_account(
        &self,
        currency: Currency,
        kind: AccountKind,
        label: Option<String>,
    ) -> Result<Account> {
        self.inner.create_account(currency, kind, label).await
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>> {
        if Self::take(&self.failing_reads) {
            return Err(PaymentError::StorageError("read timed out".to_string()));
        }
        self.inner.account(id).await
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        self.inner.all_accounts().await
    }

    async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<Account> {
        self.inner.set_account_status(id, status).await
    }

    async fn append_postings(
        &self,
        transaction: TransactionId,
        postings: Vec<PostingDraft>,
    ) -> Result<CommitReceipt> {
        if Self::take(&self.failing_appends) {
            return Err(PaymentError::StorageError("disk unavailable".to_string()));
        }
        self.inner.append_postings(transaction, postings).await
    }

    async fn balance(&self, id: AccountId, as_of: Option<u64>) -> Result<BalanceSnapshot> {
        self.inner.balance(id, as_of).await
    }

    async fn postings_page(
        &self,
        id: AccountId,
        range: SequenceRange,
        limit: usize,
    ) -> Result<Vec<Posting>> {
        self.inner.postings_page(id, range, limit).await
    }

    async fn postings_for_transaction(&self, transaction: TransactionId) -> Result<Vec<Posting>> {
        self.inner.postings_for_transaction(transaction).await
    }
}

/// In-memory transaction store that can be told to lose its next writes
/// into a terminal state.
#[derive(Default)]
pub struct FlakyTransactions {
    inner: InMemoryTransactionStore,
    failing_settlements: AtomicUsize,
}

impl FlakyTransactions {
    pub fn lose_next_settlements(&self, count: usize) {
        self.failing_settlements.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransactionStore for FlakyTransactions {
    async fn insert(&self, txn: Transaction) -> Result<()> {
        self.inner.insert(txn).await
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.inner.get(id).await
    }

    async fn compare_and_set(
        &self,
        expected_revision: u64,
        next: Transaction,
    ) -> Result<Option<Transaction>> {
        if next.state.is_terminal() && FlakyLedger::take(&self.failing_settlements) {
            return Err(PaymentError::TransactionNotFound(next.id));
        }
        self.inner.compare_and_set(expected_revision, next).await
    }

    async fn list_by_state(&self, state: TransactionState) -> Result<Vec<Transaction>> {
        self.inner.list_by_state(state).await
    }
}

/// A coordinator wired to test doubles, with handles on all of them.
pub struct Harness {
    pub coordinator: Arc<TransactionCoordinator>,
    pub ledger: LedgerStoreRef,
    pub transactions: TransactionStoreRef,
    pub gateway: Arc<ScriptedGateway>,
    pub sink: Arc<RecordingSink>,
}

pub struct HarnessBuilder {
    ledger: LedgerStoreRef,
    transactions: TransactionStoreRef,
    sink: Arc<RecordingSink>,
    config: EngineConfig,
}

impl HarnessBuilder {
    pub fn ledger(mut self, ledger: LedgerStoreRef) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn transactions(mut self, transactions: TransactionStoreRef) -> Self {
        self.transactions = transactions;
        self
    }

    pub fn sink(mut self, sink: RecordingSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Harness {
        let gateway = Arc::new(ScriptedGateway::default());
        let transactions = self.transactions;
        let collaborators = Collaborators {
            gateway: gateway.clone(),
            directory: Arc::new(LedgerDirectory::new(self.ledger.clone())),
            notifier: self.sink.clone(),
        };
        let coordinator = Arc::new(TransactionCoordinator::new(
            self.ledger.clone(),
            transactions.clone(),
            collaborators,
            self.config,
        ));
        Harness {
            coordinator,
            ledger: self.ledger,
            transactions,
            gateway,
            sink: self.sink,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            ledger: Arc::new(InMemoryLedgerStore::new()),
            transactions: Arc::new(InMemoryTransactionStore::new()),
            sink: Arc::new(RecordingSink::default()),
            config: EngineConfig::default(),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub async fn open(&self) -> AccountId {
        self.coordinator
            .open_account(Currency::Usd, None)
            .await
            .unwrap()
            .id
    }

    pub async fn open_external(&self) -> AccountId {
        self.coordinator
            .open_external_account(Currency::Usd, None)
            .await
            .unwrap()
            .id
    }

    /// An internal account holding `amount`, funded from a fresh external account.
    pub async fn funded(&self, amount: i64) -> AccountId {
        let bank = self.open_external().await;
        let account = self.open().await;
        let result = self
            .pay(bank, account, amount, &format!("fund-{}", account))
            .await
            .unwrap();
        assert_eq!(result.status, TransactionState::Committed);
        account
    }

    pub async fn pay(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: i64,
        key: &str,
    ) -> Result<TransactionResult> {
        self.coordinator.submit(request(source, destination, amount, key)).await
    }

    pub async fn balance(&self, account: AccountId) -> i64 {
        self.coordinator.get_balance(account).await.unwrap().balance
    }

    pub async fn available(&self, account: AccountId) -> i64 {
        self.coordinator.get_balance(account).await.unwrap().available
    }

    pub async fn postings_of(&self, transaction: TransactionId) -> Vec<Posting> {
        self.ledger.postings_for_transaction(transaction).await.unwrap()
    }

    /// A worker that treats everything as stale.
    pub fn worker(&self) -> ReconciliationWorker {
        ReconciliationWorker::new(self.coordinator.clone()).with_staleness(Duration::ZERO)
    }
}

pub fn request(source: AccountId, destination: AccountId, amount: i64, key: &str) -> PaymentRequest {
    PaymentRequest {
        source,
        destination,
        amount_minor_units: amount,
        currency: Currency::Usd,
        idempotency_key: IdempotencyKey::new(key).unwrap(),
    }
}

pub const BATCH_HEADER: [&str; 6] = ["type", "account", "counterparty", "amount", "currency", "key"];

/// Writes a batch that funds `accounts` accounts and then makes `rows`
/// random payments between them.
pub fn generate_batch_csv(path: &Path, accounts: usize, rows: usize) -> std::result::Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    let mut rng = rand::thread_rng();

    wtr.write_record(BATCH_HEADER)?;
    wtr.write_record(["external", "bank", "", "", "USD", ""])?;
    for i in 1..=accounts {
        let label = format!("acct{}", i);
        wtr.write_record(["open", &label, "", "", "USD", ""])?;
        wtr.write_record(["pay", "bank", &label, "100.00", "USD", &format!("fund-{}", i)])?;
    }

    for i in 1..=rows {
        let from = rng.gen_range(1..=accounts);
        let to = rng.gen_range(1..=accounts);
        let cents: u32 = rng.gen_range(1..=2_500);
        wtr.write_record([
            "pay",
            &format!("acct{}", from),
            &format!("acct{}", to),
            &format!("{}.{:02}", cents / 100, cents % 100),
            "USD",
            &format!("pay-{}", i),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
