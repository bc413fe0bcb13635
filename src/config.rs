use crate::domain::money::Currency;
use std::time::Duration;

/// Tunables for the coordinator, the idempotency registry, the balance
/// cache and the reconciliation worker.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How long a completed idempotency record is kept.
    pub idempotency_retention: Duration,
    /// Delay between reconciliation passes.
    pub reconciliation_interval: Duration,
    /// A `Reserved` or `Pending` transaction untouched for this long is
    /// picked up by reconciliation.
    pub reconciliation_staleness: Duration,
    /// Upper bound on cached balance entries.
    pub balance_cache_capacity: usize,
    pub supported_currencies: Vec<Currency>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idempotency_retention: Duration::from_secs(24 * 60 * 60),
            reconciliation_interval: Duration::from_secs(5),
            reconciliation_staleness: Duration::from_secs(30),
            balance_cache_capacity: 10_000,
            supported_currencies: vec![Currency::Usd, Currency::Eur, Currency::Gbp],
        }
    }
}
