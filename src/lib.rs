//! ledger-core - deterministic command core for a personal transaction ledger.
//!
//! Resolves bilingual date phrases, validates generated SQL against the
//! `transactions` schema, executes it with bound parameters and reports the
//! outcome. This library exposes the core modules for the binary and for
//! integration tests.

pub mod cli;
pub mod config;
pub mod dates;
pub mod db;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod query;
pub mod report;
pub mod safety;
