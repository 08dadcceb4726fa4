//! Integration tests for ledger-core.
//!
//! MySQL tests are skipped unless DATABASE_URL is a mysql:// URL.

pub mod dates_test;
pub mod mysql_test;
pub mod pipeline_test;
pub mod safety_test;
