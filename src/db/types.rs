//! Row types for the transaction store.
//!
//! Defines the decoded shapes of `transactions` rows and
//! `transaction_summary` view rows.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single ledger entry. Positive amounts are income, negative are expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Store-assigned identifier; never changes once assigned.
    pub id: u64,

    /// Calendar day of the transaction.
    pub transaction_date: NaiveDate,

    /// Signed amount with two decimal places.
    pub amount: Decimal,

    /// Free-form note.
    pub remark: Option<String>,

    pub created_at: Option<NaiveDateTime>,

    pub updated_at: Option<NaiveDateTime>,
}

impl TransactionRecord {
    /// Creates a record with no remark or timestamps.
    pub fn new(id: u64, transaction_date: NaiveDate, amount: Decimal) -> Self {
        Self {
            id,
            transaction_date,
            amount,
            remark: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    /// Returns true for income entries.
    pub fn is_income(&self) -> bool {
        self.amount.is_sign_positive() && !self.amount.is_zero()
    }

    /// Formats the record as a single report line.
    pub fn display_line(&self) -> String {
        let mut line = format!(
            "- id: {} | transaction_date: {} | amount: {:.2}",
            self.id, self.transaction_date, self.amount
        );
        if let Some(remark) = &self.remark {
            line.push_str(" | remark: ");
            line.push_str(remark);
        }
        line
    }
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_line())
    }
}

/// One row of the `transaction_summary` view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTotal {
    pub transaction_date: NaiveDate,
    pub record_count: u64,
    pub total_amount: Decimal,
    pub avg_amount: Decimal,
}

impl DailyTotal {
    /// Formats the day as a single report line.
    pub fn display_line(&self) -> String {
        format!(
            "- {}: {} record(s), total {:.2}, average {:.2}",
            self.transaction_date, self.record_count, self.total_amount, self.avg_amount
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_display_line_with_remark() {
        let record = TransactionRecord::new(3, date(2024, 3, 12), Decimal::from_str("-35.5").unwrap())
            .with_remark("lunch");
        assert_eq!(
            record.display_line(),
            "- id: 3 | transaction_date: 2024-03-12 | amount: -35.50 | remark: lunch"
        );
    }

    #[test]
    fn test_display_line_without_remark() {
        let record = TransactionRecord::new(1, date(2024, 3, 1), Decimal::from(100));
        assert_eq!(
            record.display_line(),
            "- id: 1 | transaction_date: 2024-03-01 | amount: 100.00"
        );
    }

    #[test]
    fn test_income_sign() {
        assert!(TransactionRecord::new(1, date(2024, 3, 1), Decimal::from(5)).is_income());
        assert!(!TransactionRecord::new(2, date(2024, 3, 1), Decimal::from(-5)).is_income());
        assert!(!TransactionRecord::new(3, date(2024, 3, 1), Decimal::ZERO).is_income());
    }

    #[test]
    fn test_daily_total_line() {
        let day = DailyTotal {
            transaction_date: date(2024, 3, 12),
            record_count: 2,
            total_amount: Decimal::from(60),
            avg_amount: Decimal::from(30),
        };
        assert_eq!(
            day.display_line(),
            "- 2024-03-12: 2 record(s), total 60.00, average 30.00"
        );
    }
}
