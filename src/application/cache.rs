use crate::domain::account::AccountId;
use crate::domain::ports::LedgerStoreRef;
use crate::domain::posting::BalanceSnapshot;
use crate::error::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

#[derive(Debug, Default)]
struct Slot {
    /// Lowest version this slot may serve; raised by every invalidation.
    floor: u64,
    cached: Option<(BalanceSnapshot, u64)>,
}

/// Read-optimized projection of account balances.
///
/// Commits invalidate entries instead of updating them. Each slot remembers
/// the newest committed version it was told about, and a value fetched from
/// the store before that version is dropped instead of cached, so a slow
/// reader can never re-populate the cache with a balance older than one it
/// already saw committed.
pub struct BalanceCache {
    ledger: LedgerStoreRef,
    capacity: usize,
    slots: DashMap<AccountId, Slot>,
    cached: AtomicUsize,
    clock: AtomicU64,
}

impl BalanceCache {
    pub fn new(ledger: LedgerStoreRef, capacity: usize) -> Self {
        Self {
            ledger,
            capacity,
            slots: DashMap::new(),
            cached: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn get_cached_balance(&self, account: AccountId) -> Result<BalanceSnapshot> {
        let hit = self.slots.get_mut(&account).and_then(|mut slot| {
            let now = self.tick();
            slot.cached.as_mut().map(|(snapshot, last_used)| {
                *last_used = now;
                *snapshot
            })
        });
        if let Some(snapshot) = hit {
            debug!(%account, version = snapshot.version, "balance cache hit");
            return Ok(snapshot);
        }

        debug!(%account, "balance cache miss");
        let snapshot = self.ledger.balance(account, None).await?;
        self.populate(snapshot);
        Ok(snapshot)
    }

    fn populate(&self, snapshot: BalanceSnapshot) {
        if self.capacity == 0 {
            return;
        }
        {
            let mut slot = self.slots.entry(snapshot.account).or_default();
            if snapshot.version < slot.floor {
                // a commit landed while we were reading
                return;
            }
            if slot.cached.replace((snapshot, self.tick())).is_none() {
                self.cached.fetch_add(1, Ordering::Relaxed);
            }
        }
        if self.len() > self.capacity {
            self.evict();
        }
    }

    /// Drops the cached balance of `account` after a commit produced
    /// `committed_version` for it.
    pub fn invalidate(&self, account: AccountId, committed_version: u64) {
        let mut slot = self.slots.entry(account).or_default();
        slot.floor = slot.floor.max(committed_version);
        if slot.cached.take().is_some() {
            self.cached.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Evicts the least recently used entries, with some slack so a full
    /// cache does not rescan on every miss.
    fn evict(&self) {
        let mut by_age: Vec<(u64, AccountId)> = self
            .slots
            .iter()
            .filter_map(|slot| slot.cached.map(|(_, used)| (used, *slot.key())))
            .collect();
        let excess = by_age.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        let target = (excess + self.capacity / 8).min(by_age.len());
        by_age.sort_unstable();

        for (used, account) in by_age.into_iter().take(target) {
            if let Some(mut slot) = self.slots.get_mut(&account)
                && slot.cached.is_some_and(|(_, current)| current == used)
            {
                slot.cached = None;
                self.cached.fetch_sub(1, Ordering::Relaxed);
            }
        }
        debug!(cached = self.len(), "balance cache evicted");
    }

    /// Number of balances currently cached.
    pub fn len(&self) -> usize {
        self.cached.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
