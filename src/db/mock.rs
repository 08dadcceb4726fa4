//! Mock transaction store for testing.
//!
//! Returns canned rows, counts calls and can be scripted to fail, so retry
//! behavior and the "rejected SQL never reaches the store" guarantee can be
//! tested without a database.

use super::{DailyTotal, StoreBackend, TransactionRecord, TransactionStore};
use crate::error::{LedgerError, Result};
use crate::safety::ValidatedStatement;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// A mock store that returns predefined results.
#[derive(Debug, Default)]
pub struct MockStore {
    records: Vec<TransactionRecord>,
    daily_totals: Vec<DailyTotal>,
    affected: u64,
    failures: Mutex<VecDeque<LedgerError>>,
    calls: AtomicUsize,
    next_id: AtomicU64,
    executed: Mutex<Vec<String>>,
}

impl MockStore {
    /// Creates a new mock store with no rows.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Self::default()
        }
    }

    /// Rows returned by `fetch_records`.
    pub fn with_records(mut self, records: Vec<TransactionRecord>) -> Self {
        self.records = records;
        self
    }

    /// Rows returned by `fetch_daily_totals`.
    pub fn with_daily_totals(mut self, days: Vec<DailyTotal>) -> Self {
        self.daily_totals = days;
        self
    }

    /// Row count returned by `execute`.
    pub fn with_affected(mut self, affected: u64) -> Self {
        self.affected = affected;
        self
    }

    /// Queues errors returned, in order, by the next store calls.
    pub fn failing_with(self, errors: Vec<LedgerError>) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.extend(errors);
        }
        self
    }

    /// Number of statement calls made so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// SQL of every statement received, in order.
    pub fn executed_sql(&self) -> Vec<String> {
        self.executed.lock().map(|sql| sql.clone()).unwrap_or_default()
    }

    fn record_call(&self, statement: &ValidatedStatement) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(statement.sql().to_string());
        }
        let next_failure = self
            .failures
            .lock()
            .map_err(|_| LedgerError::internal("mock store lock poisoned"))?
            .pop_front();
        match next_failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TransactionStore for MockStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }

    async fn fetch_records(&self, statement: &ValidatedStatement) -> Result<Vec<TransactionRecord>> {
        self.record_call(statement)?;
        Ok(self.records.clone())
    }

    async fn fetch_daily_totals(&self, statement: &ValidatedStatement) -> Result<Vec<DailyTotal>> {
        self.record_call(statement)?;
        Ok(self.daily_totals.clone())
    }

    async fn insert(&self, statement: &ValidatedStatement) -> Result<u64> {
        self.record_call(statement)?;
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn execute(&self, statement: &ValidatedStatement) -> Result<u64> {
        self.record_call(statement)?;
        Ok(self.affected)
    }

    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
