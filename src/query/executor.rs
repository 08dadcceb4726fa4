//! Statement execution with retry on transient failures.
//!
//! Provides isolated execution that can be tested independently of the
//! gateway. Only [`ValidatedStatement`]s are accepted.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::db::{DailyTotal, TransactionRecord, TransactionStore};
use crate::error::{LedgerError, Result};
use crate::safety::{BoundValue, OperationKind, ParamSlot, Relation, ValidatedStatement};

/// Executes validated statements against a transaction store.
pub struct QueryExecutor {
    store: Arc<dyn TransactionStore>,
    retry: RetryPolicy,
}

impl QueryExecutor {
    /// Creates a new executor over `store`.
    pub fn new(store: Arc<dyn TransactionStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Executes `statement`, retrying transient failures with exponential backoff.
    ///
    /// Once retries are exhausted the last error is surfaced as a fatal
    /// execution error.
    pub async fn execute(&self, statement: &ValidatedStatement) -> Result<ExecutionResult> {
        let start = Instant::now();
        let operation = statement.operation();

        let result = match (operation, statement.relation()) {
            (OperationKind::Query, Relation::TransactionSummary) => {
                let days = self
                    .with_retry(statement, || self.store.fetch_daily_totals(statement))
                    .await?;
                ExecutionResult::daily(days)
            }
            (OperationKind::Query, Relation::Transactions) => {
                let rows = self
                    .with_retry(statement, || self.store.fetch_records(statement))
                    .await?;
                ExecutionResult::records(rows)
            }
            (OperationKind::Insert, _) => {
                let id = self
                    .with_retry(statement, || self.store.insert(statement))
                    .await?;
                ExecutionResult::inserted(id, InsertedValues::from_statement(statement))
            }
            (OperationKind::Update | OperationKind::Delete, _) => {
                let affected = self
                    .with_retry(statement, || self.store.execute(statement))
                    .await?;
                ExecutionResult::mutated(operation, affected)
            }
        };

        info!(
            "Executed {} on {} in {:?}: {} row(s), {} affected",
            operation,
            statement.relation().as_str(),
            start.elapsed(),
            result.rows.len() + result.daily_totals.len(),
            result.affected_count
        );
        Ok(result)
    }

    async fn with_retry<T, F, Fut>(&self, statement: &ValidatedStatement, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "Attempt {} of {} for '{}' failed (transient error: {}), retrying in {:?}",
                        attempt,
                        max_attempts,
                        statement.sql(),
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(LedgerError::Execution {
                    retryable: true,
                    message,
                }) => {
                    warn!("Giving up on '{}' after {} attempt(s)", statement.sql(), attempt);
                    return Err(LedgerError::fatal(format!(
                        "{message} (gave up after {attempt} attempt(s))"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Column values an insert wrote, read from its bound parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InsertedValues {
    pub transaction_date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub remark: Option<String>,
}

impl InsertedValues {
    pub fn from_statement(statement: &ValidatedStatement) -> Self {
        let mut values = Self::default();
        if let Some(BoundValue::Date(day)) = statement.bound(ParamSlot::EntryDate) {
            values.transaction_date = Some(*day);
        }
        if let Some(BoundValue::Decimal(amount)) = statement.bound(ParamSlot::Amount) {
            values.amount = Some(*amount);
        }
        if let Some(BoundValue::Text(remark)) = statement.bound(ParamSlot::Remark) {
            values.remark = Some(remark.clone());
        }
        values
    }
}

/// Outcome of executing one statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// Operation that produced the result.
    pub operation: OperationKind,

    /// Rows read from `transactions`.
    pub rows: Vec<TransactionRecord>,

    /// Rows read from `transaction_summary`.
    pub daily_totals: Vec<DailyTotal>,

    /// Rows changed by an insert, update or delete.
    pub affected_count: u64,

    /// Identifier generated by an insert.
    pub new_id: Option<u64>,

    /// Values written by an insert.
    pub inserted: Option<InsertedValues>,

    /// Set when the rows came from `transaction_summary`.
    pub summary_view: bool,
}

impl ExecutionResult {
    pub fn records(rows: Vec<TransactionRecord>) -> Self {
        Self {
            operation: OperationKind::Query,
            rows,
            daily_totals: Vec::new(),
            affected_count: 0,
            new_id: None,
            inserted: None,
            summary_view: false,
        }
    }

    pub fn daily(days: Vec<DailyTotal>) -> Self {
        Self {
            operation: OperationKind::Query,
            rows: Vec::new(),
            daily_totals: days,
            affected_count: 0,
            new_id: None,
            inserted: None,
            summary_view: true,
        }
    }

    pub fn inserted(id: u64, values: InsertedValues) -> Self {
        Self {
            operation: OperationKind::Insert,
            rows: Vec::new(),
            daily_totals: Vec::new(),
            affected_count: 1,
            new_id: Some(id),
            inserted: Some(values),
            summary_view: false,
        }
    }

    pub fn mutated(operation: OperationKind, affected: u64) -> Self {
        Self {
            operation,
            rows: Vec::new(),
            daily_totals: Vec::new(),
            affected_count: affected,
            new_id: None,
            inserted: None,
            summary_view: false,
        }
    }

    /// Returns true if the result came from the summary view.
    pub fn is_daily(&self) -> bool {
        self.summary_view
    }
}
