use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slots<K> = DashMap<K, Arc<Mutex<()>>>;

/// One async mutex per key, created on first use and dropped again once
/// nobody holds or waits for it.
///
/// Work on disjoint keys never contends. Callers needing several keys must go
/// through [`KeyedLocks::lock_all`], which acquires them in ascending order so
/// two multi-key holders cannot deadlock.
pub struct KeyedLocks<K: Eq + Hash> {
    slots: Arc<Slots<K>>,
}

/// Held lock on one key. Unlocks on drop.
pub struct KeyGuard<K: Eq + Hash> {
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    slots: Arc<Slots<K>>,
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        self.guard.take();
        // waiters clone the slot before awaiting it, so a count of one means
        // only the map still refers to it
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Ord + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }

    fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, key: &K) -> KeyGuard<K> {
        // the map guard must be gone before awaiting
        let slot = self.slot(key);
        let guard = slot.lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            key: key.clone(),
            slots: self.slots.clone(),
        }
    }

    pub async fn lock_all(&self, keys: &[K]) -> Vec<KeyGuard<K>> {
        let mut ordered = keys.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for key in &ordered {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Number of keys currently locked or waited on.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Ord + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
