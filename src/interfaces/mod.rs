//! Outer adapters driving the coordinator.

pub mod csv;
