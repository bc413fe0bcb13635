use crate::domain::account::{AccountId, AccountKind};
use crate::domain::money::Currency;
use crate::domain::ports::{AccountDirectory, LedgerStoreRef};
use crate::error::Result;
use async_trait::async_trait;

/// Answers account lookups from the ledger store that owns the accounts.
pub struct LedgerDirectory {
    ledger: LedgerStoreRef,
}

impl LedgerDirectory {
    pub fn new(ledger: LedgerStoreRef) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl AccountDirectory for LedgerDirectory {
    async fn is_active(&self, id: AccountId) -> Result<bool> {
        Ok(self
            .ledger
            .account(id)
            .await?
            .is_some_and(|account| account.is_active()))
    }

    async fn currency_of(&self, id: AccountId) -> Result<Option<Currency>> {
        Ok(self.ledger.account(id).await?.map(|account| account.currency))
    }

    async fn kind_of(&self, id: AccountId) -> Result<Option<AccountKind>> {
        Ok(self.ledger.account(id).await?.map(|account| account.kind))
    }
}
