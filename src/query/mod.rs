//! Statement execution for the ledger core.
//!
//! This module isolates store access and retry handling from the gateway
//! that orchestrates a request.

pub mod executor;

pub use executor::{ExecutionResult, InsertedValues, QueryExecutor};
