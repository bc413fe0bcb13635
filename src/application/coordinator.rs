use crate::application::cache::BalanceCache;
use crate::application::history::PostingCursor;
use crate::application::holds::HoldBook;
use crate::application::idempotency::{IdempotencyCheck, IdempotencyRegistry};
use crate::config::EngineConfig;
use crate::domain::account::{Account, AccountId, AccountKind, AccountStatus};
use crate::domain::event::TransactionEvent;
use crate::domain::money::{Amount, Currency};
use crate::domain::ports::{
    AccountDirectory, GatewayResult, GatewayStatus, LedgerStoreRef, NotificationSink,
    PaymentGateway, TransactionStoreRef,
};
use crate::domain::posting::{SequenceRange, transfer_pair};
use crate::domain::transaction::{
    FailureReason, GatewayReference, PaymentRequest, Transaction, TransactionId,
    TransactionResult, TransactionState,
};
use crate::error::{PaymentError, Result};
use crate::locks::KeyedLocks;
use chrono::{TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Span, debug, error, info, instrument, warn};

/// The capability interfaces the coordinator talks to. Swapped wholesale
/// between production and tests.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn PaymentGateway>,
    pub directory: Arc<dyn AccountDirectory>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// Balance as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountBalance {
    pub account: AccountId,
    /// Sum of committed postings.
    pub balance: i64,
    /// `balance` minus funds held by `Reserved` transactions.
    pub available: i64,
    pub version: u64,
}

/// What reconciliation did with one claimed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Committed,
    Compensated,
    /// Still indeterminate; retried on a later pass.
    Unresolved,
}

/// Drives payments through `Pending → Reserved → Committed | Compensated | Failed`.
///
/// Only the source account is locked, and only around the balance check with
/// hold placement and around the final append. No lock is held while the
/// gateway is called. Every state change is a compare-and-set against the
/// transaction store, so the reconciliation worker can race with an in-flight
/// submission without either one double-applying anything.
pub struct TransactionCoordinator {
    ledger: LedgerStoreRef,
    transactions: TransactionStoreRef,
    registry: IdempotencyRegistry,
    cache: BalanceCache,
    holds: HoldBook,
    account_locks: KeyedLocks<AccountId>,
    gateway: Arc<dyn PaymentGateway>,
    directory: Arc<dyn AccountDirectory>,
    notifier: Arc<dyn NotificationSink>,
    config: EngineConfig,
}

impl TransactionCoordinator {
    pub fn new(
        ledger: LedgerStoreRef,
        transactions: TransactionStoreRef,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Self {
        Self {
            cache: BalanceCache::new(ledger.clone(), config.balance_cache_capacity),
            registry: IdempotencyRegistry::new(config.idempotency_retention),
            holds: HoldBook::new(),
            account_locks: KeyedLocks::new(),
            ledger,
            transactions,
            gateway: collaborators.gateway,
            directory: collaborators.directory,
            notifier: collaborators.notifier,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &LedgerStoreRef {
        &self.ledger
    }

    pub fn registry(&self) -> &IdempotencyRegistry {
        &self.registry
    }

    /// Submits a payment. Safe to retry with the same idempotency key.
    ///
    /// Business outcomes, declines included, come back as `Ok`. `Err` means the
    /// key was reused with different parameters or the infrastructure failed.
    #[instrument(skip(self, request), fields(key = %request.idempotency_key, txn = tracing::field::Empty))]
    pub async fn submit(&self, request: PaymentRequest) -> Result<TransactionResult> {
        let candidate = TransactionId::new();
        let key = request.idempotency_key.clone();

        match self
            .registry
            .check_or_reserve(&key, &request.fingerprint(), candidate)?
        {
            IdempotencyCheck::Completed(id, result) => {
                debug!(%id, "replaying completed result");
                return Ok(result);
            }
            IdempotencyCheck::InProgress(id) => {
                debug!(%id, "request already in progress");
                return self.current_result(id).await;
            }
            IdempotencyCheck::Fresh => {}
        }
        Span::current().record("txn", tracing::field::display(candidate));

        let txn = Transaction::pending(candidate, &request);
        if let Err(e) = self.transactions.insert(txn.clone()).await {
            self.registry.release(&key, candidate);
            return Err(e);
        }

        let result = self.execute(txn).await;
        if let Err(e) = &result {
            // a transaction that reached Reserved keeps its key until reconciled
            if let Ok(Some(stored)) = self.transactions.get(candidate).await
                && stored.state == TransactionState::Pending
            {
                self.registry.release(&key, candidate);
            }
            warn!(error = %e, code = e.reason_code(), "submit failed");
        }
        result
    }

    async fn execute(&self, txn: Transaction) -> Result<TransactionResult> {
        let requires_gateway = match self.validate(&txn).await? {
            Ok(requires_gateway) => requires_gateway,
            Err(reason) => return self.settle(txn, TransactionState::Failed, Some(reason)).await,
        };

        let reserved = match self.reserve(txn, requires_gateway).await? {
            Ok(reserved) => reserved,
            Err(settled) => return Ok(settled),
        };

        if !reserved.requires_gateway {
            return self.commit(reserved).await;
        }

        let reference = gateway_reference(&reserved);
        let amount = Amount::new(reserved.amount)?;
        match self
            .gateway
            .authorize(&reference, amount, reserved.source, reserved.destination)
            .await
        {
            Ok(GatewayResult::Approved(issued)) => {
                match self.record_reference(reserved, issued).await? {
                    Ok(reserved) => self.commit(reserved).await,
                    Err(current) => Ok(current),
                }
            }
            Ok(GatewayResult::Declined(reason)) => {
                self.compensate(reserved, FailureReason::GatewayDeclined(reason), false)
                    .await
            }
            Ok(GatewayResult::Unknown) => {
                warn!(%reference, "gateway outcome unknown, left for reconciliation");
                Ok(reserved.result())
            }
            Err(e) => {
                if e.is_transient_gateway() {
                    warn!(%reference, error = %e, "gateway call failed, left for reconciliation");
                } else {
                    error!(%reference, error = %e, "gateway call failed, left for reconciliation");
                }
                Ok(reserved.result())
            }
        }
    }

    /// Stores the reference the gateway issued on approval so reversals and
    /// status queries use it. `Err(result)` when another party moved the
    /// transaction first.
    async fn record_reference(
        &self,
        reserved: Transaction,
        issued: GatewayReference,
    ) -> Result<std::result::Result<Transaction, TransactionResult>> {
        if reserved.gateway_reference.as_ref() == Some(&issued) {
            return Ok(Ok(reserved));
        }
        let mut next = reserved.transition(TransactionState::Reserved, None)?;
        next.gateway_reference = Some(issued);
        match self.transactions.compare_and_set(reserved.revision, next).await? {
            Some(updated) => Ok(Ok(updated)),
            None => Ok(Err(self.current_result(reserved.id).await?)),
        }
    }

    /// Either the gateway requirement, or the reason the request is rejected
    /// before anything is held.
    async fn validate(&self, txn: &Transaction) -> Result<std::result::Result<bool, FailureReason>> {
        if txn.amount <= 0 {
            return Ok(Err(FailureReason::InvalidAmount));
        }
        if txn.source == txn.destination {
            return Ok(Err(FailureReason::SameAccount));
        }

        let mut requires_gateway = false;
        for id in [txn.source, txn.destination] {
            let Some(currency) = self.directory.currency_of(id).await? else {
                return Ok(Err(FailureReason::UnknownAccount(id)));
            };
            if !self.directory.is_active(id).await? {
                return Ok(Err(FailureReason::InactiveAccount(id)));
            }
            if currency != txn.currency {
                return Ok(Err(FailureReason::CurrencyMismatch));
            }
            if self.directory.kind_of(id).await? == Some(AccountKind::External) {
                requires_gateway = true;
            }
        }
        Ok(Ok(requires_gateway))
    }

    /// Checks funds and places the hold under the source lock, then moves the
    /// transaction to `Reserved`. `Err(result)` carries a settled outcome.
    async fn reserve(
        &self,
        txn: Transaction,
        requires_gateway: bool,
    ) -> Result<std::result::Result<Transaction, TransactionResult>> {
        let source_is_external =
            self.directory.kind_of(txn.source).await? == Some(AccountKind::External);

        let guard = self.account_locks.lock(&txn.source).await;
        if !source_is_external {
            let cached = self.cache.get_cached_balance(txn.source).await?;
            let held = self.holds.held(txn.source);
            if cached.amount.saturating_sub(held) < txn.amount {
                // the cache may lag behind credits; only the store can decline
                let confirmed = self.ledger.balance(txn.source, None).await?;
                if confirmed.amount.saturating_sub(held) < txn.amount {
                    drop(guard);
                    debug!(
                        balance = confirmed.amount,
                        held,
                        requested = txn.amount,
                        "insufficient funds"
                    );
                    let settled = self
                        .settle(txn, TransactionState::Failed, Some(FailureReason::InsufficientFunds))
                        .await?;
                    return Ok(Err(settled));
                }
            }
            self.holds.place(txn.source, txn.id, txn.amount);
        }

        let mut next = txn.transition(TransactionState::Reserved, None)?;
        next.requires_gateway = requires_gateway;
        next.hold_placed = !source_is_external;
        if requires_gateway {
            next.gateway_reference = Some(GatewayReference::for_transaction(txn.id));
        }

        let stored = self.transactions.compare_and_set(txn.revision, next).await;
        match stored {
            Ok(Some(reserved)) => {
                drop(guard);
                debug!(held = reserved.hold_placed, "reserved");
                Ok(Ok(reserved))
            }
            Ok(None) => {
                self.holds.release(txn.source, txn.id);
                drop(guard);
                Ok(Err(self.current_result(txn.id).await?))
            }
            Err(e) => {
                self.holds.release(txn.source, txn.id);
                Err(e)
            }
        }
    }

    /// Appends the posting pair and settles as `Committed`.
    ///
    /// Storage failures leave the transaction `Reserved` with its hold; any
    /// other rejection compensates.
    async fn commit(&self, txn: Transaction) -> Result<TransactionResult> {
        let amount = Amount::new(txn.amount)?;
        let postings = transfer_pair(txn.source, txn.destination, amount);

        let guard = self.account_locks.lock(&txn.source).await;
        match self.ledger.append_postings(txn.id, postings).await {
            Ok(receipt) => {
                for account in [txn.source, txn.destination] {
                    if let Some(version) = receipt.version_of(account) {
                        self.cache.invalidate(account, version);
                    }
                }
                self.holds.release(txn.source, txn.id);
                drop(guard);
                if receipt.replayed {
                    debug!(txn = %txn.id, "postings already recorded");
                }
                self.settle(txn, TransactionState::Committed, None).await
            }
            Err(e) if e.is_storage() => {
                drop(guard);
                error!(txn = %txn.id, error = %e, "posting append failed, left for reconciliation");
                Err(e)
            }
            Err(e) => {
                drop(guard);
                if e.is_programmer_error() {
                    error!(txn = %txn.id, error = %e, "ledger rejected postings");
                } else {
                    warn!(txn = %txn.id, error = %e, "ledger rejected postings");
                }
                let reverse = txn.requires_gateway;
                self.compensate(txn, FailureReason::PostingRejected(e.reason_code().to_string()), reverse)
                    .await
            }
        }
    }

    /// Releases the hold, reverses the gateway side if asked to, and settles
    /// as `Compensated`. A failed reversal leaves the transaction `Reserved`.
    async fn compensate(
        &self,
        txn: Transaction,
        reason: FailureReason,
        reverse_gateway: bool,
    ) -> Result<TransactionResult> {
        if reverse_gateway {
            let reference = gateway_reference(&txn);
            if let Err(e) = self.gateway.reverse(&reference).await {
                warn!(%reference, error = %e, "gateway reversal failed, left for reconciliation");
                return Ok(txn.result());
            }
        }
        self.holds.release(txn.source, txn.id);
        self.settle(txn, TransactionState::Compensated, Some(reason)).await
    }

    /// Moves `txn` to a terminal state, then completes the idempotency record
    /// and publishes the event.
    ///
    /// A lost compare-and-set is retried against the stored value unless that
    /// value is already terminal, in which case it is reported as is.
    async fn settle(
        &self,
        txn: Transaction,
        state: TransactionState,
        reason: Option<FailureReason>,
    ) -> Result<TransactionResult> {
        let mut current = txn;
        loop {
            let next = current.transition(state, reason.clone())?;
            if let Some(stored) = self.transactions.compare_and_set(current.revision, next).await? {
                let result = stored.result();
                self.registry
                    .complete(&stored.idempotency_key, stored.id, result.clone());
                match state {
                    TransactionState::Committed => {
                        info!(txn = %stored.id, amount = stored.amount, currency = %stored.currency, "committed");
                        self.notify(TransactionEvent::TransactionCommitted(stored)).await;
                    }
                    _ => {
                        info!(txn = %stored.id, state = %stored.state, reason = ?stored.failure_reason, "settled");
                        self.notify(TransactionEvent::TransactionFailed(stored)).await;
                    }
                }
                return Ok(result);
            }

            current = self
                .transactions
                .get(current.id)
                .await?
                .ok_or(PaymentError::TransactionNotFound(current.id))?;
            if current.state.is_terminal() || !current.state.can_transition_to(state) {
                return Ok(current.result());
            }
        }
    }

    async fn notify(&self, event: TransactionEvent) {
        if let Err(e) = self.notifier.notify(&event).await {
            warn!(event = event.name(), txn = %event.transaction().id, error = %e, "notification failed");
        }
    }

    async fn current_result(&self, id: TransactionId) -> Result<TransactionResult> {
        Ok(match self.transactions.get(id).await? {
            Some(txn) => txn.result(),
            // reserved in the registry, not yet persisted by its owner
            None => TransactionResult {
                status: TransactionState::Pending,
                transaction_id: id,
                reason: None,
            },
        })
    }

    pub async fn get_status(&self, id: TransactionId) -> Result<TransactionResult> {
        Ok(self.transaction(id).await?.result())
    }

    pub async fn transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.transactions
            .get(id)
            .await?
            .ok_or(PaymentError::TransactionNotFound(id))
    }

    pub async fn get_balance(&self, account: AccountId) -> Result<AccountBalance> {
        let snapshot = self.cache.get_cached_balance(account).await?;
        Ok(AccountBalance {
            account,
            balance: snapshot.amount,
            available: snapshot.amount.saturating_sub(self.holds.held(account)),
            version: snapshot.version,
        })
    }

    pub async fn transaction_history(
        &self,
        account: AccountId,
        range: SequenceRange,
    ) -> Result<PostingCursor> {
        if self.ledger.account(account).await?.is_none() {
            return Err(PaymentError::AccountNotFound(account));
        }
        Ok(PostingCursor::new(self.ledger.clone(), account, range))
    }

    pub async fn open_account(&self, currency: Currency, label: Option<String>) -> Result<Account> {
        self.ledger
            .create_account(currency, AccountKind::Internal, label)
            .await
    }

    pub async fn open_external_account(
        &self,
        currency: Currency,
        label: Option<String>,
    ) -> Result<Account> {
        self.ledger
            .create_account(currency, AccountKind::External, label)
            .await
    }

    pub async fn set_account_status(&self, id: AccountId, status: AccountStatus) -> Result<Account> {
        let account = self.ledger.set_account_status(id, status).await?;
        info!(account = %id, %status, "account status changed");
        Ok(account)
    }

    /// Rebuilds holds and idempotency records from the transaction store.
    ///
    /// Terminal transactions older than the retention window are skipped;
    /// the rest get a full retention window from now.
    pub async fn recover(&self) -> Result<usize> {
        let mut all = Vec::new();
        for state in [
            TransactionState::Pending,
            TransactionState::Reserved,
            TransactionState::Committed,
            TransactionState::Compensated,
            TransactionState::Failed,
        ] {
            all.extend(self.transactions.list_by_state(state).await?);
        }
        all.sort_by_key(|txn| txn.created_at);

        let retention_cutoff = cutoff(self.config.idempotency_retention);
        let mut restored = 0;
        for txn in all {
            if txn.state.is_terminal() {
                if retention_cutoff.is_some_and(|cutoff| txn.updated_at < cutoff) {
                    continue;
                }
                self.registry.restore(
                    txn.idempotency_key.clone(),
                    txn.fingerprint(),
                    txn.id,
                    Some(txn.result()),
                );
            } else {
                if txn.state == TransactionState::Reserved && txn.hold_placed {
                    self.holds.place(txn.source, txn.id, txn.amount);
                }
                self.registry
                    .restore(txn.idempotency_key.clone(), txn.fingerprint(), txn.id, None);
            }
            restored += 1;
        }
        info!(restored, "recovered transaction state");
        Ok(restored)
    }

    /// Transactions in `state` not updated within `staleness`, oldest first.
    pub(crate) async fn stale(
        &self,
        state: TransactionState,
        staleness: Duration,
    ) -> Result<Vec<Transaction>> {
        let Some(cutoff) = cutoff(staleness) else {
            return Ok(Vec::new());
        };
        let mut stale = self.transactions.list_by_state(state).await?;
        stale.retain(|txn| txn.updated_at <= cutoff);
        Ok(stale)
    }

    /// Takes ownership of a `Reserved` transaction for one reconciliation
    /// attempt. `None` when another worker (or the submitting request) moved
    /// it first.
    pub(crate) async fn claim(&self, txn: &Transaction) -> Result<Option<Transaction>> {
        let mut next = txn.transition(TransactionState::Reserved, None)?;
        next.claimed_at = Some(next.updated_at);
        self.transactions.compare_and_set(txn.revision, next).await
    }

    /// Resolves a claimed `Reserved` transaction from the gateway's
    /// authoritative status.
    pub(crate) async fn resolve(&self, txn: Transaction) -> Result<Resolution> {
        let status = if txn.requires_gateway {
            let reference = gateway_reference(&txn);
            match self.gateway.query_status(&reference).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(%reference, error = %e, "gateway status query failed");
                    GatewayStatus::Unknown
                }
            }
        } else {
            // internal payments only get here when the append itself failed
            GatewayStatus::Approved
        };

        let result = match status {
            GatewayStatus::Approved => self.commit(txn).await?,
            GatewayStatus::Declined => {
                self.compensate(
                    txn,
                    FailureReason::GatewayDeclined("declined on status query".to_string()),
                    false,
                )
                .await?
            }
            GatewayStatus::Unknown => return Ok(Resolution::Unresolved),
        };
        Ok(match result.status {
            TransactionState::Committed => Resolution::Committed,
            TransactionState::Compensated => Resolution::Compensated,
            _ => Resolution::Unresolved,
        })
    }

    /// Fails a `Pending` transaction whose submission never got to reserve.
    pub(crate) async fn abandon(&self, txn: Transaction) -> Result<TransactionResult> {
        self.settle(txn, TransactionState::Failed, Some(FailureReason::Abandoned))
            .await
    }
}

fn gateway_reference(txn: &Transaction) -> GatewayReference {
    txn.gateway_reference
        .clone()
        .unwrap_or_else(|| GatewayReference::for_transaction(txn.id))
}

/// `now - age`, or `None` when that predates what chrono can represent.
fn cutoff(age: Duration) -> Option<chrono::DateTime<Utc>> {
    let age = TimeDelta::from_std(age).ok()?;
    Utc::now().checked_sub_signed(age)
}
