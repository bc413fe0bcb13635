use crate::domain::account::AccountId;
use crate::domain::transaction::TransactionId;
use dashmap::DashMap;
use std::collections::HashMap;

/// Funds tentatively reserved against accounts by `Reserved` transactions.
///
/// Holds are not postings. They only reduce what the balance check treats as
/// available, and disappear once the postings are written or the transaction
/// is compensated.
#[derive(Default)]
pub struct HoldBook {
    holds: DashMap<AccountId, HashMap<TransactionId, i64>>,
}

impl HoldBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&self, account: AccountId, transaction: TransactionId, amount: i64) {
        self.holds
            .entry(account)
            .or_default()
            .insert(transaction, amount);
    }

    /// Idempotent; returns the released amount if a hold existed.
    pub fn release(&self, account: AccountId, transaction: TransactionId) -> Option<i64> {
        let mut entry = self.holds.get_mut(&account)?;
        let released = entry.remove(&transaction);
        let empty = entry.is_empty();
        drop(entry);
        if empty {
            self.holds.remove_if(&account, |_, held| held.is_empty());
        }
        released
    }

    pub fn held(&self, account: AccountId) -> i64 {
        self.holds
            .get(&account)
            .map(|held| held.values().fold(0i64, |acc, amount| acc.saturating_add(*amount)))
            .unwrap_or(0)
    }
}
