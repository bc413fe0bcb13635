use crate::domain::money::Currency;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Ledger account identifier.
///
/// Backed by a UUIDv7, so ids sort in creation order. The ordering is also
/// the global lock order used when a commit touches several accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
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

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Frozen,
    Closed,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccountStatus::Active => "active",
            AccountStatus::Frozen => "frozen",
            AccountStatus::Closed => "closed",
        })
    }
}

/// Where the funds behind an account live.
///
/// External accounts mirror balances held at another institution. Moving
/// money in or out of them requires the payment gateway, and they may run
/// negative since they only settle against the outside world.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Internal,
    External,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccountKind::Internal => "internal",
            AccountKind::External => "external",
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Account {
    pub id: AccountId,
    pub currency: Currency,
    pub kind: AccountKind,
    pub status: AccountStatus,
    /// Optional human-readable handle, used by batch input to address accounts.
    pub label: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl Account {
    pub fn new(currency: Currency, kind: AccountKind, label: Option<String>) -> Self {
        Self {
            id: AccountId::new(),
            currency,
            kind,
            status: AccountStatus::Active,
            label,
            opened_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn is_external(&self) -> bool {
        self.kind == AccountKind::External
    }

    /// Fails unless the account may receive new postings.
    pub fn ensure_postable(&self) -> Result<()> {
        match self.status {
            AccountStatus::Active => Ok(()),
            AccountStatus::Frozen => Err(PaymentError::AccountFrozen(self.id)),
            AccountStatus::Closed => Err(PaymentError::AccountClosed(self.id)),
        }
    }

    /// Returns a copy with the new lifecycle status. Closed is terminal.
    pub fn with_status(&self, status: AccountStatus) -> Result<Self> {
        if self.status == AccountStatus::Closed && status != AccountStatus::Closed {
            return Err(PaymentError::AccountClosed(self.id));
        }
        Ok(Self {
            status,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_bytes() {
        let id = AccountId::new();
        assert_eq!(AccountId::from_bytes(*id.as_bytes()), id);
        assert_ne!(id, AccountId::new());
    }

    #[test]
    fn test_new_account_is_active() {
        let account = Account::new(Currency::Usd, AccountKind::Internal, None);
        assert!(account.is_active());
        assert!(!account.is_external());
        assert!(account.ensure_postable().is_ok());
    }

    #[test]
    fn test_frozen_account_rejects_postings() {
        let account = Account::new(Currency::Usd, AccountKind::Internal, None)
            .with_status(AccountStatus::Frozen)
            .unwrap();
        assert!(matches!(
            account.ensure_postable(),
            Err(PaymentError::AccountFrozen(id)) if id == account.id
        ));

        let thawed = account.with_status(AccountStatus::Active).unwrap();
        assert!(thawed.ensure_postable().is_ok());
    }

    #[test]
    fn test_closed_is_terminal() {
        let closed = Account::new(Currency::Eur, AccountKind::External, Some("ext".into()))
            .with_status(AccountStatus::Closed)
            .unwrap();
        assert!(matches!(
            closed.with_status(AccountStatus::Active),
            Err(PaymentError::AccountClosed(_))
        ));
        assert!(matches!(
            closed.ensure_postable(),
            Err(PaymentError::AccountClosed(_))
        ));
    }

    #[test]
    fn test_account_serialization() {
        let account = Account::new(Currency::Gbp, AccountKind::Internal, Some("alice".into()));
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["currency"], "GBP");
        assert_eq!(json["kind"], "internal");
        assert_eq!(json["status"], "active");
        let back: Account = serde_json::from_value(json).unwrap();
        assert_eq!(back, account);
    }
}
