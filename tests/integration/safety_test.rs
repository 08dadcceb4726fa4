//! SQL validation integration tests.
//!
//! Drives the validator through the public API the gateway uses.

use chrono::NaiveDate;
use ledger_core::dates::resolve;
use ledger_core::error::LedgerError;
use ledger_core::safety::{validate_sql, BoundValue, OperationKind, ParameterValues, ValidationRule};
use pretty_assertions::assert_eq;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 13).unwrap()
}

fn this_month() -> ParameterValues {
    ParameterValues::new().with_range(resolve("本月", today()).unwrap())
}

#[test]
fn test_separator_is_rejected() {
    let verdict = validate_sql(
        "SELECT * FROM transactions WHERE transaction_date >= ?; DELETE FROM transactions",
        OperationKind::Query,
        &this_month(),
    );
    assert!(!verdict.accepted);
    assert_eq!(verdict.reason, Some(ValidationRule::StatementStacking));
    assert_eq!(verdict.normalized_sql, None);
    assert!(verdict.bound_parameters.is_empty());
}

#[test]
fn test_rejection_names_the_keyword() {
    let cases = [
        ("DROP TABLE transactions", OperationKind::Delete, "DROP"),
        ("TRUNCATE TABLE transactions", OperationKind::Delete, "TRUNCATE"),
        (
            "ALTER TABLE transactions ADD COLUMN note TEXT",
            OperationKind::Update,
            "ALTER",
        ),
        (
            "SELECT * FROM transactions WHERE transaction_date >= ? AND SLEEP(0) = 0",
            OperationKind::Query,
            "SLEEP",
        ),
    ];

    for (sql, op, keyword) in cases {
        let verdict = validate_sql(sql, op, &this_month());
        assert_eq!(
            verdict.reason,
            Some(ValidationRule::ForbiddenKeyword(keyword.to_string())),
            "sql {sql}"
        );
        let err = verdict.into_statement().unwrap_err();
        assert!(err.to_string().contains(keyword), "message {err}");
    }
}

#[test]
fn test_write_without_where_is_rejected() {
    let values = this_month().with_amount("12.00".parse().unwrap());
    let update = validate_sql("UPDATE transactions SET amount = ?", OperationKind::Update, &values);
    assert_eq!(
        update.reason,
        Some(ValidationRule::MissingWhereClause(OperationKind::Update))
    );

    let delete = validate_sql("DELETE FROM transactions", OperationKind::Delete, &values);
    assert_eq!(
        delete.reason,
        Some(ValidationRule::MissingWhereClause(OperationKind::Delete))
    );
}

#[test]
fn test_rejection_is_idempotent() {
    let sql = "SELECT * FROM transactions WHERE remark = 'x' OR 1 = 1";
    let first = validate_sql(sql, OperationKind::Query, &this_month());
    let second = validate_sql(sql, OperationKind::Query, &this_month());
    assert!(!first.accepted);
    assert_eq!(first, second);
}

#[test]
fn test_accepted_month_query_binds_range() {
    let verdict = validate_sql(
        "SELECT * FROM transactions WHERE transaction_date >= ? AND transaction_date < ? ORDER BY transaction_date",
        OperationKind::Query,
        &this_month(),
    );
    assert!(verdict.accepted, "{:?}", verdict.reason);
    assert_eq!(
        verdict.bound_parameters,
        vec![
            BoundValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            BoundValue::Date(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()),
        ]
    );
}

#[test]
fn test_declared_kind_must_match() {
    let err = validate_sql(
        "SELECT * FROM transactions WHERE transaction_date >= ?",
        OperationKind::Delete,
        &this_month(),
    )
    .into_statement()
    .unwrap_err();
    assert!(matches!(err, LedgerError::SchemaMismatch(_)));
}

#[test]
fn test_verdict_json_names_the_rule() {
    let verdict = validate_sql("DELETE FROM transactions", OperationKind::Delete, &this_month());
    let json = serde_json::to_value(&verdict).unwrap();
    assert_eq!(json["accepted"], false);
    assert_eq!(json["reason"]["rule"], "missing_where_clause");
}
