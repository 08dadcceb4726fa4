//! Result reporting.
//!
//! Turns an [`ExecutionResult`] into the structured report returned to the
//! caller, plus the human-readable text the conversational layer relays.
//! Amounts are signed: income is positive, expense negative.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt::Write as _;

use crate::db::{DailyTotal, TransactionRecord};
use crate::query::ExecutionResult;
use crate::safety::OperationKind;

/// Aggregate figures over a set of records. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct Summary {
    pub total_count: u64,
    pub sum_amount: Decimal,
    /// `sum_amount / total_count`, or zero when there are no records.
    pub avg_amount: Decimal,
    pub income_total: Decimal,
    pub expense_total: Decimal,
    pub net: Decimal,
}

/// Summarizes `records`.
pub fn summarize(records: &[TransactionRecord]) -> Summary {
    let mut summary = Summary {
        total_count: records.len() as u64,
        ..Summary::default()
    };

    for record in records {
        summary.sum_amount += record.amount;
        if record.amount.is_sign_negative() {
            summary.expense_total += record.amount;
        } else {
            summary.income_total += record.amount;
        }
    }

    summary.net = summary.income_total + summary.expense_total;
    summary.avg_amount = average(summary.sum_amount, summary.total_count);
    summary
}

/// Overall figures across the days of a daily report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct DailyOverview {
    pub day_count: u64,
    pub total_count: u64,
    pub sum_amount: Decimal,
    pub avg_amount: Decimal,
}

fn overview(days: &[DailyTotal]) -> DailyOverview {
    let total_count: u64 = days.iter().map(|d| d.record_count).sum();
    let sum_amount: Decimal = days.iter().map(|d| d.total_amount).sum();
    DailyOverview {
        day_count: days.len() as u64,
        total_count,
        sum_amount,
        avg_amount: average(sum_amount, total_count),
    }
}

fn average(sum: Decimal, count: u64) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        (sum / Decimal::from(count)).round_dp(2)
    }
}

/// Structured result of one instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Report {
    /// Query over `transactions`.
    Summary {
        summary: Summary,
        records: Vec<TransactionRecord>,
        lines: Vec<String>,
    },
    /// Query over `transaction_summary`.
    Daily {
        overview: DailyOverview,
        days: Vec<DailyTotal>,
        lines: Vec<String>,
    },
    /// Insert confirmation.
    Confirmation {
        new_id: u64,
        transaction_date: Option<NaiveDate>,
        amount: Option<Decimal>,
        remark: Option<String>,
    },
    /// Update or delete outcome.
    Mutation {
        operation: OperationKind,
        affected_count: u64,
    },
}

/// Builds the report for `result`. An insert confirmation echoes the values
/// the statement actually wrote.
pub fn report(result: ExecutionResult) -> Report {
    match result.operation {
        OperationKind::Query if result.is_daily() => {
            let lines = result.daily_totals.iter().map(DailyTotal::display_line).collect();
            Report::Daily {
                overview: overview(&result.daily_totals),
                days: result.daily_totals,
                lines,
            }
        }
        OperationKind::Query => {
            let lines = result
                .rows
                .iter()
                .map(TransactionRecord::display_line)
                .collect();
            Report::Summary {
                summary: summarize(&result.rows),
                records: result.rows,
                lines,
            }
        }
        OperationKind::Insert => {
            let written = result.inserted.unwrap_or_default();
            Report::Confirmation {
                new_id: result.new_id.unwrap_or_default(),
                transaction_date: written.transaction_date,
                amount: written.amount,
                remark: written.remark,
            }
        }
        operation @ (OperationKind::Update | OperationKind::Delete) => Report::Mutation {
            operation,
            affected_count: result.affected_count,
        },
    }
}

impl Report {
    /// Renders the report as the message relayed to the user.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        match self {
            Report::Summary {
                summary, lines, ..
            } => {
                if lines.is_empty() {
                    out.push_str("No matching records.\n");
                } else {
                    let _ = writeln!(out, "Query results ({} records):\n", summary.total_count);
                    for line in lines {
                        let _ = writeln!(out, "{line}");
                    }
                    out.push('\n');
                }
                let _ = writeln!(
                    out,
                    "Count: {} | Sum: {:.2} | Average: {:.2}",
                    summary.total_count, summary.sum_amount, summary.avg_amount
                );
                let _ = write!(
                    out,
                    "Income: {:.2} | Expense: {:.2} | Net: {:.2}",
                    summary.income_total, summary.expense_total, summary.net
                );
            }
            Report::Daily {
                overview, lines, ..
            } => {
                let _ = writeln!(out, "Daily totals ({} days):\n", overview.day_count);
                for line in lines {
                    let _ = writeln!(out, "{line}");
                }
                let _ = write!(
                    out,
                    "\nCount: {} | Sum: {:.2} | Average: {:.2}",
                    overview.total_count, overview.sum_amount, overview.avg_amount
                );
            }
            Report::Confirmation {
                new_id,
                transaction_date,
                amount,
                remark,
            } => {
                let _ = write!(out, "OK: Recorded transaction #{new_id}");
                if let Some(day) = transaction_date {
                    let _ = write!(out, " on {day}");
                }
                if let Some(amount) = amount {
                    let _ = write!(out, ", amount {amount:.2}");
                }
                if let Some(remark) = remark {
                    let _ = write!(out, " ({remark})");
                }
            }
            Report::Mutation {
                operation,
                affected_count: 0,
            } => {
                let _ = write!(out, "Warning: {operation} matched no rows.");
            }
            Report::Mutation {
                operation,
                affected_count,
            } => {
                let _ = write!(out, "OK: {operation} affected {affected_count} row(s).");
            }
        }
        out
    }
}
