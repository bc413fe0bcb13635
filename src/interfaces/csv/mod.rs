//! Batch CSV input and output for the command-line runner.

pub mod balance_writer;
pub mod batch;
pub mod command_reader;
