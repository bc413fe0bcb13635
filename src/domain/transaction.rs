use crate::domain::account::AccountId;
use crate::domain::money::Currency;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Client-supplied token guaranteeing at most one effective execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub const MAX_LEN: usize = 255;

    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(PaymentError::ValidationError(
                "Idempotency key must not be empty".to_string(),
            ));
        }
        if key.len() > Self::MAX_LEN {
            return Err(PaymentError::ValidationError(format!(
                "Idempotency key exceeds {} bytes",
                Self::MAX_LEN
            )));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Pending,
    Reserved,
    Committed,
    Compensated,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Compensated | TransactionState::Failed
        )
    }

    /// The transition table. Reserved -> Reserved is how reconciliation claims
    /// a transaction and how a gateway reference gets recorded.
    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Pending, Reserved)
                | (Pending, Failed)
                | (Reserved, Reserved)
                | (Reserved, Committed)
                | (Reserved, Compensated)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Pending => "pending",
            TransactionState::Reserved => "reserved",
            TransactionState::Committed => "committed",
            TransactionState::Compensated => "compensated",
            TransactionState::Failed => "failed",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transaction did not commit (or has not yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    InvalidAmount,
    SameAccount,
    UnknownAccount(AccountId),
    InactiveAccount(AccountId),
    CurrencyMismatch,
    InsufficientFunds,
    GatewayDeclined(String),
    PostingRejected(String),
    /// Left `Pending` past the staleness window without a hold being placed.
    Abandoned,
    /// Not a failure: the outcome is being resolved by reconciliation.
    AwaitingReconciliation,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::InvalidAmount => "invalid_amount",
            FailureReason::SameAccount => "same_account",
            FailureReason::UnknownAccount(_) => "unknown_account",
            FailureReason::InactiveAccount(_) => "inactive_account",
            FailureReason::CurrencyMismatch => "currency_mismatch",
            FailureReason::InsufficientFunds => "insufficient_funds",
            FailureReason::GatewayDeclined(_) => "gateway_declined",
            FailureReason::PostingRejected(_) => "posting_rejected",
            FailureReason::Abandoned => "abandoned",
            FailureReason::AwaitingReconciliation => "awaiting_reconciliation",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::UnknownAccount(id) | FailureReason::InactiveAccount(id) => {
                write!(f, "{} ({})", self.code(), id)
            }
            FailureReason::GatewayDeclined(detail) | FailureReason::PostingRejected(detail) => {
                write!(f, "{} ({})", self.code(), detail)
            }
            _ => f.write_str(self.code()),
        }
    }
}

/// Reference under which the gateway knows a payment.
///
/// Assigned before `authorize` is called so a timed-out authorization can
/// still be looked up later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayReference(String);

impl GatewayReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn for_transaction(id: TransactionId) -> Self {
        Self(format!("creo-{}", id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GatewayReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A caller's request to move money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub source: AccountId,
    pub destination: AccountId,
    pub amount_minor_units: i64,
    pub currency: Currency,
    pub idempotency_key: IdempotencyKey,
}

impl PaymentRequest {
    pub fn fingerprint(&self) -> RequestFingerprint {
        RequestFingerprint {
            source: self.source,
            destination: self.destination,
            amount_minor_units: self.amount_minor_units,
            currency: self.currency,
        }
    }
}

/// The parameters a retried request must repeat exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestFingerprint {
    pub source: AccountId,
    pub destination: AccountId,
    pub amount_minor_units: i64,
    pub currency: Currency,
}

/// What `submit` and `get_status` report back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub status: TransactionState,
    pub transaction_id: TransactionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub idempotency_key: IdempotencyKey,
    pub source: AccountId,
    pub destination: AccountId,
    /// Requested minor units. Only guaranteed positive once past `Pending`.
    pub amount: i64,
    pub currency: Currency,
    pub state: TransactionState,
    pub failure_reason: Option<FailureReason>,
    pub gateway_reference: Option<GatewayReference>,
    /// Set on reservation when either side is an external account.
    pub requires_gateway: bool,
    /// Whether funds are held against the source account while `Reserved`.
    pub hold_placed: bool,
    /// Bumped by the store on every compare-and-set.
    pub revision: u64,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn pending(id: TransactionId, request: &PaymentRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            idempotency_key: request.idempotency_key.clone(),
            source: request.source,
            destination: request.destination,
            amount: request.amount_minor_units,
            currency: request.currency,
            state: TransactionState::Pending,
            failure_reason: None,
            gateway_reference: None,
            requires_gateway: false,
            hold_placed: false,
            revision: 0,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds the next version of this transaction, enforcing the transition
    /// table. The store still has to accept it via compare-and-set.
    pub fn transition(&self, next: TransactionState, reason: Option<FailureReason>) -> Result<Self> {
        if !self.state.can_transition_to(next) {
            return Err(PaymentError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        Ok(Self {
            state: next,
            failure_reason: reason.or_else(|| self.failure_reason.clone()),
            updated_at: Utc::now(),
            ..self.clone()
        })
    }

    pub fn fingerprint(&self) -> RequestFingerprint {
        RequestFingerprint {
            source: self.source,
            destination: self.destination,
            amount_minor_units: self.amount,
            currency: self.currency,
        }
    }

    pub fn result(&self) -> TransactionResult {
        let reason = match self.state {
            TransactionState::Reserved => Some(FailureReason::AwaitingReconciliation),
            _ => self.failure_reason.clone(),
        };
        TransactionResult {
            status: self.state,
            transaction_id: self.id,
            reason,
        }
    }
}
