//! Instruction gateway.
//!
//! Single entry point of the core. An instruction flows through
//! authorization, date resolution, SQL validation, execution and reporting;
//! the first failing stage short-circuits into an [`ErrorPayload`]. Rejected
//! SQL cannot reach the store: the executor only accepts a
//! [`ValidatedStatement`].

mod hint;

pub use hint::extract_sql;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::dates::{self, DateRange};
use crate::db::TransactionStore;
use crate::error::{ErrorPayload, LedgerError, Result};
use crate::query::QueryExecutor;
use crate::report::{report, Report};
use crate::safety::{OperationKind, ParameterValues, SqlValidator, ValidatedStatement};

/// Inclusive calendar span supplied in place of a date phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplicitRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// A normalized request from the conversational layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub operation: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_phrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_date_range: Option<ExplicitRange>,
    /// Signed amount: income positive, expense negative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    /// SQL produced by the external generation step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_sql_hint: Option<String>,
    /// Target of an `UPDATE`/`DELETE ... WHERE id = ?`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<u64>,
}

impl Instruction {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            date_phrase: None,
            explicit_date_range: None,
            amount: None,
            remark: None,
            raw_sql_hint: None,
            record_id: None,
        }
    }

    pub fn with_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.date_phrase = Some(phrase.into());
        self
    }

    pub fn with_explicit_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.explicit_date_range = Some(ExplicitRange { start, end });
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.raw_sql_hint = Some(sql.into());
        self
    }

    pub fn with_record_id(mut self, id: u64) -> Self {
        self.record_id = Some(id);
        self
    }

    /// Parses an instruction from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| LedgerError::internal(format!("Malformed instruction: {e}")))
    }
}

/// Response returned to the conversational layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatewayResponse {
    Ok { result: Report, message: String },
    Error { error: ErrorPayload },
}

impl GatewayResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Serializes the response as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LedgerError::internal(format!("Cannot serialize response: {e}")))
    }
}

impl From<Result<Report>> for GatewayResponse {
    fn from(result: Result<Report>) -> Self {
        match result {
            Ok(report) => Self::Ok {
                message: report.render_text(),
                result: report,
            },
            Err(e) => Self::Error {
                error: e.to_payload(),
            },
        }
    }
}

/// Orchestrates instructions end to end. `Send + Sync`; share it via `Arc`.
pub struct InstructionGateway {
    validator: SqlValidator,
    executor: QueryExecutor,
    allowed_callers: HashSet<String>,
}

impl InstructionGateway {
    /// Creates a gateway over `store` using the retry and caller settings
    /// from `config`.
    pub fn new(store: Arc<dyn TransactionStore>, config: &Config) -> Self {
        Self {
            validator: SqlValidator::new(),
            executor: QueryExecutor::new(store, config.retry),
            allowed_callers: config.gateway.allowed_callers.iter().cloned().collect(),
        }
    }

    /// Rejects callers that are not on the allow-list.
    pub fn authorize(&self, caller: &str) -> Result<()> {
        if self.allowed_callers.contains(caller) {
            Ok(())
        } else {
            Err(LedgerError::unauthorized(format!(
                "caller '{caller}' may not issue ledger instructions"
            )))
        }
    }

    /// Runs every stage up to, but not including, execution.
    pub fn prepare(
        &self,
        caller: &str,
        instruction: &Instruction,
        today: NaiveDate,
    ) -> Result<ValidatedStatement> {
        self.authorize(caller)?;

        let values = parameter_values(instruction, today)?;
        let sql = instruction
            .raw_sql_hint
            .as_deref()
            .and_then(extract_sql)
            .unwrap_or_default();

        let verdict = self.validator.validate(&sql, instruction.operation, &values);
        if let Some(rule) = &verdict.reason {
            warn!("Rejected {} from '{}': {}", instruction.operation, caller, rule);
        }
        verdict.into_statement()
    }

    /// Processes one instruction.
    pub async fn process(
        &self,
        caller: &str,
        instruction: &Instruction,
        today: NaiveDate,
    ) -> Result<Report> {
        let statement = self.prepare(caller, instruction, today)?;
        let result = self.executor.execute(&statement).await?;
        info!("Processed {} for '{}'", instruction.operation, caller);
        Ok(report(result))
    }

    /// Processes one instruction and folds any failure into the response.
    pub async fn handle(
        &self,
        caller: &str,
        instruction: &Instruction,
        today: NaiveDate,
    ) -> GatewayResponse {
        let result = self.process(caller, instruction, today).await;
        if let Err(e) = &result {
            warn!("{} failed at {} stage: {}", instruction.operation, e.stage(), e);
        }
        result.into()
    }

    /// Processes independent instructions concurrently, preserving order.
    pub async fn handle_many(
        &self,
        requests: &[(String, Instruction)],
        today: NaiveDate,
    ) -> Vec<GatewayResponse> {
        join_all(
            requests
                .iter()
                .map(|(caller, instruction)| self.handle(caller, instruction, today)),
        )
        .await
    }
}

/// Builds the bindable values of an instruction.
///
/// An explicit range wins over the phrase. An insert with neither is dated
/// `today`.
fn parameter_values(instruction: &Instruction, today: NaiveDate) -> Result<ParameterValues> {
    let mut values = ParameterValues {
        amount: instruction.amount,
        remark: instruction.remark.clone(),
        record_id: instruction.record_id,
        ..ParameterValues::default()
    };

    match (&instruction.explicit_date_range, &instruction.date_phrase) {
        (Some(explicit), _) => {
            values.range = Some(DateRange::inclusive(explicit.start, explicit.end)?);
        }
        (None, Some(phrase)) if !phrase.trim().is_empty() => {
            values.range = Some(dates::resolve(phrase, today)?);
        }
        _ if instruction.operation == OperationKind::Insert => {
            values.entry_date = Some(today);
        }
        _ => {}
    }

    Ok(values)
}
