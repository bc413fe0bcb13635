//! Application layer: the transaction coordinator and the components it
//! orchestrates.
//!
//! The coordinator owns the transaction lifecycle and goes through the
//! idempotency registry, the balance cache and the hold book before it
//! touches the ledger. The reconciliation worker resolves what the
//! coordinator leaves indeterminate.

pub mod cache;
pub mod coordinator;
pub mod history;
pub mod holds;
pub mod idempotency;
pub mod reconciliation;
