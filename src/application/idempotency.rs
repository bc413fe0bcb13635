use crate::domain::transaction::{
    IdempotencyKey, RequestFingerprint, TransactionId, TransactionResult,
};
use crate::error::{PaymentError, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

/// What a request with a given key is allowed to do.
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyCheck {
    /// First sighting: the caller now owns the key and must execute.
    Fresh,
    /// Another execution holds the key and has not finished.
    InProgress(TransactionId),
    /// The key already produced a terminal outcome.
    Completed(TransactionId, TransactionResult),
}

#[derive(Debug, Clone)]
struct IdempotencyRecord {
    fingerprint: RequestFingerprint,
    transaction_id: TransactionId,
    outcome: Option<TransactionResult>,
    /// Unset while in progress: in-flight records never expire.
    expires_at: Option<Instant>,
}

impl IdempotencyRecord {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// The single gate deduplicating retried payment requests.
///
/// Check-and-reserve runs under the `DashMap` entry lock for the key, so two
/// concurrent callers with the same key can never both see `Fresh`, while
/// different keys only share a shard lock for the duration of a map access.
pub struct IdempotencyRegistry {
    records: DashMap<IdempotencyKey, IdempotencyRecord>,
    retention: Duration,
}

impl IdempotencyRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            records: DashMap::new(),
            retention,
        }
    }

    fn expiry(&self, now: Instant) -> Option<Instant> {
        // an unrepresentable deadline means "never"
        now.checked_add(self.retention)
    }

    /// Atomically reads the key or claims it for `candidate`.
    ///
    /// Fails with `Conflict` when the key is live but was first used with
    /// different request parameters.
    pub fn check_or_reserve(
        &self,
        key: &IdempotencyKey,
        fingerprint: &RequestFingerprint,
        candidate: TransactionId,
    ) -> Result<IdempotencyCheck> {
        let now = Instant::now();
        let fresh = IdempotencyRecord {
            fingerprint: *fingerprint,
            transaction_id: candidate,
            outcome: None,
            expires_at: None,
        };

        match self.records.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired(now) {
                    slot.insert(fresh);
                    return Ok(IdempotencyCheck::Fresh);
                }
                let record = slot.get();
                if record.fingerprint != *fingerprint {
                    return Err(PaymentError::Conflict(key.clone()));
                }
                Ok(match &record.outcome {
                    Some(result) => IdempotencyCheck::Completed(record.transaction_id, result.clone()),
                    None => IdempotencyCheck::InProgress(record.transaction_id),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(IdempotencyCheck::Fresh)
            }
        }
    }

    /// Records the terminal outcome for the execution that owns `key`.
    ///
    /// Returns `false` when the key is no longer held by `transaction`
    /// (expired and re-claimed, or released).
    pub fn complete(
        &self,
        key: &IdempotencyKey,
        transaction: TransactionId,
        snapshot: TransactionResult,
    ) -> bool {
        let expires_at = self.expiry(Instant::now());
        match self.records.get_mut(key) {
            Some(mut record) if record.transaction_id == transaction => {
                record.outcome = Some(snapshot);
                record.expires_at = expires_at;
                true
            }
            _ => false,
        }
    }

    /// Drops an in-progress claim so the client's retry starts over.
    pub fn release(&self, key: &IdempotencyKey, transaction: TransactionId) {
        self.records.remove_if(key, |_, record| {
            record.transaction_id == transaction && record.outcome.is_none()
        });
    }

    /// Re-registers a key from a persisted transaction after a restart.
    ///
    /// An outcome is restored with a fresh retention window; `None` restores
    /// an in-progress claim.
    pub fn restore(
        &self,
        key: IdempotencyKey,
        fingerprint: RequestFingerprint,
        transaction: TransactionId,
        outcome: Option<TransactionResult>,
    ) {
        let expires_at = outcome
            .as_ref()
            .and_then(|_| self.expiry(Instant::now()));
        self.records.insert(
            key,
            IdempotencyRecord {
                fingerprint,
                transaction_id: transaction,
                outcome,
                expires_at,
            },
        );
    }

    /// Removes the record if it is past retention. Returns whether it did.
    pub fn expire(&self, key: &IdempotencyKey) -> bool {
        let now = Instant::now();
        self.records
            .remove_if(key, |_, record| record.is_expired(now))
            .is_some()
    }

    /// Removes every record past retention.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
