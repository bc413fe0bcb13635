//! Domain layer: ledger value types, the transaction state machine and the
//! ports the application layer talks to.

pub mod account;
pub mod event;
pub mod money;
pub mod ports;
pub mod posting;
pub mod transaction;
