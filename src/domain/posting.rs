use crate::domain::account::AccountId;
use crate::domain::money::Amount;
use crate::domain::transaction::TransactionId;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A posting before the ledger has assigned it a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingDraft {
    pub account: AccountId,
    /// Signed minor units: negative debits the account, positive credits it.
    pub amount: i64,
}

/// An immutable ledger entry. Never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub account: AccountId,
    pub amount: i64,
    pub transaction_id: TransactionId,
    /// Position in the ledger-wide sequence; strictly increasing per account.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

/// Balance of one account as of a ledger version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub account: AccountId,
    pub amount: i64,
    /// Sequence of the last posting included, `0` when the account has none.
    pub version: u64,
}

impl BalanceSnapshot {
    pub fn empty(account: AccountId) -> Self {
        Self {
            account,
            amount: 0,
            version: 0,
        }
    }

    /// Folds a newer posting for the same account into the snapshot.
    ///
    /// Fails when the balance would leave the `i64` range.
    pub fn apply(&self, posting: &Posting) -> Result<Self> {
        let amount = self.amount.checked_add(posting.amount).ok_or_else(|| {
            PaymentError::ValidationError(format!(
                "Balance of account {} would overflow",
                self.account
            ))
        })?;
        Ok(Self {
            account: self.account,
            amount,
            version: posting.sequence,
        })
    }
}

/// Outcome of a successful `append_postings` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub transaction_id: TransactionId,
    pub postings: Vec<Posting>,
    /// `true` when the postings were already recorded and nothing was written.
    pub replayed: bool,
}

impl CommitReceipt {
    /// The balance version the commit produced for `account`, if it touched it.
    pub fn version_of(&self, account: AccountId) -> Option<u64> {
        self.postings
            .iter()
            .filter(|p| p.account == account)
            .map(|p| p.sequence)
            .max()
    }
}

/// Inclusive range of ledger sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    pub from: u64,
    pub to: Option<u64>,
}

impl SequenceRange {
    pub fn all() -> Self {
        Self { from: 0, to: None }
    }

    pub fn between(from: u64, to: u64) -> Self {
        Self { from, to: Some(to) }
    }

    pub fn contains(&self, sequence: u64) -> bool {
        sequence >= self.from && self.to.is_none_or(|to| sequence <= to)
    }

    /// The same upper bound with a new lower bound.
    pub fn resume_at(&self, from: u64) -> Self {
        Self { from, to: self.to }
    }
}

impl Default for SequenceRange {
    fn default() -> Self {
        Self::all()
    }
}

/// The debit/credit pair moving `amount` from `source` to `destination`.
pub fn transfer_pair(source: AccountId, destination: AccountId, amount: Amount) -> Vec<PostingDraft> {
    vec![
        PostingDraft {
            account: source,
            amount: -amount.minor_units(),
        },
        PostingDraft {
            account: destination,
            amount: amount.minor_units(),
        },
    ]
}

/// Checks the double-entry invariant for one transaction's postings.
pub fn ensure_balanced(transaction: TransactionId, postings: &[PostingDraft]) -> Result<()> {
    if postings.is_empty() {
        return Err(PaymentError::ValidationError(format!(
            "Transaction {} has no postings",
            transaction
        )));
    }
    if postings.iter().any(|p| p.amount == 0) {
        return Err(PaymentError::ValidationError(format!(
            "Transaction {} contains a zero-amount posting",
            transaction
        )));
    }
    let sum: i128 = postings.iter().map(|p| p.amount as i128).sum();
    if sum != 0 {
        return Err(PaymentError::UnbalancedPostings { transaction, sum });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_pair_is_balanced() {
        let txn = TransactionId::new();
        let pair = transfer_pair(AccountId::new(), AccountId::new(), Amount::new(400).unwrap());
        assert_eq!(pair[0].amount, -400);
        assert_eq!(pair[1].amount, 400);
        assert!(ensure_balanced(txn, &pair).is_ok());
    }

    #[test]
    fn test_unbalanced_postings_rejected() {
        let txn = TransactionId::new();
        let drafts = vec![
            PostingDraft {
                account: AccountId::new(),
                amount: -400,
            },
            PostingDraft {
                account: AccountId::new(),
                amount: 300,
            },
        ];
        assert!(matches!(
            ensure_balanced(txn, &drafts),
            Err(PaymentError::UnbalancedPostings { sum: -100, .. })
        ));
    }

    #[test]
    fn test_degenerate_posting_sets_rejected() {
        let txn = TransactionId::new();
        assert!(matches!(
            ensure_balanced(txn, &[]),
            Err(PaymentError::ValidationError(_))
        ));
        let zero = [PostingDraft {
            account: AccountId::new(),
            amount: 0,
        }];
        assert!(matches!(
            ensure_balanced(txn, &zero),
            Err(PaymentError::ValidationError(_))
        ));
    }

    #[test]
    fn test_sum_does_not_overflow() {
        let txn = TransactionId::new();
        let drafts = vec![
            PostingDraft {
                account: AccountId::new(),
                amount: i64::MAX,
            },
            PostingDraft {
                account: AccountId::new(),
                amount: i64::MAX,
            },
        ];
        assert!(matches!(
            ensure_balanced(txn, &drafts),
            Err(PaymentError::UnbalancedPostings { .. })
        ));
    }

    #[test]
    fn test_snapshot_apply_checks_overflow() {
        let account = AccountId::new();
        let posting = |amount, sequence| Posting {
            account,
            amount,
            transaction_id: TransactionId::new(),
            sequence,
            timestamp: Utc::now(),
        };
        let full = BalanceSnapshot::empty(account)
            .apply(&posting(i64::MAX, 1))
            .unwrap();
        assert_eq!(full.version, 1);
        assert!(matches!(
            full.apply(&posting(1, 2)),
            Err(PaymentError::ValidationError(_))
        ));
        assert_eq!(full.apply(&posting(-1, 2)).unwrap().amount, i64::MAX - 1);
    }

    #[test]
    fn test_sequence_range() {
        let range = SequenceRange::between(3, 5);
        assert!(!range.contains(2));
        assert!(range.contains(3));
        assert!(range.contains(5));
        assert!(!range.contains(6));
        assert!(SequenceRange::all().contains(u64::MAX));
        assert_eq!(range.resume_at(4), SequenceRange::between(4, 5));
    }

    #[test]
    fn test_receipt_version_lookup() {
        let txn = TransactionId::new();
        let a = AccountId::new();
        let b = AccountId::new();
        let receipt = CommitReceipt {
            transaction_id: txn,
            postings: vec![
                Posting {
                    account: a,
                    amount: -1,
                    transaction_id: txn,
                    sequence: 7,
                    timestamp: Utc::now(),
                },
                Posting {
                    account: b,
                    amount: 1,
                    transaction_id: txn,
                    sequence: 8,
                    timestamp: Utc::now(),
                },
            ],
            replayed: false,
        };
        assert_eq!(receipt.version_of(a), Some(7));
        assert_eq!(receipt.version_of(b), Some(8));
        assert_eq!(receipt.version_of(AccountId::new()), None);
    }
}
