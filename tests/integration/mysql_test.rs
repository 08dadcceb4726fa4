//! Gateway tests against a live MySQL server.
//!
//! Skipped unless DATABASE_URL is a mysql:// URL. Rows are written on a fixed
//! date in the past and deleted again by id.

use std::sync::Arc;

use chrono::NaiveDate;
use ledger_core::config::{Config, StoreConfig};
use ledger_core::db::{self, StoreBackend, TransactionStore};
use ledger_core::gateway::{Instruction, InstructionGateway};
use ledger_core::report::Report;
use ledger_core::safety::OperationKind;
use rust_decimal::Decimal;

const CALLER: &str = "coordinator";
const TEST_DAY: &str = "1999-12-31";

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL")
        .ok()
        .filter(|url| url.starts_with("mysql://"))
}

/// Helper to create a store with the schema in place.
async fn get_test_store() -> Option<Arc<dyn TransactionStore>> {
    let url = get_test_database_url()?;
    let config = StoreConfig::from_connection_string(&url).ok()?;
    let store = db::connect(&config).await.ok()?;
    store.ensure_schema().await.ok()?;
    Some(store)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 13).unwrap()
}

#[tokio::test]
async fn test_mysql_insert_query_delete() {
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    assert_eq!(store.backend(), StoreBackend::MySql);

    let gateway = InstructionGateway::new(store.clone(), &Config::default());
    let amount: Decimal = "-1.23".parse().unwrap();

    let insert = Instruction::new(OperationKind::Insert)
        .with_phrase(TEST_DAY)
        .with_amount(amount)
        .with_remark("integration test row")
        .with_sql("INSERT INTO transactions (transaction_date, amount, remark) VALUES (?, ?, ?)");
    let id = match gateway.process(CALLER, &insert, today()).await.unwrap() {
        Report::Confirmation { new_id, .. } => new_id,
        other => panic!("expected confirmation, got {other:?}"),
    };

    let query = Instruction::new(OperationKind::Query)
        .with_record_id(id)
        .with_sql("SELECT * FROM transactions WHERE id = ?");
    match gateway.process(CALLER, &query, today()).await.unwrap() {
        Report::Summary { records, .. } => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].amount, amount);
            assert_eq!(records[0].transaction_date.to_string(), TEST_DAY);
            assert!(records[0].created_at.is_some());
        }
        other => panic!("expected summary, got {other:?}"),
    }

    let delete = Instruction::new(OperationKind::Delete)
        .with_record_id(id)
        .with_sql("DELETE FROM transactions WHERE id = ?");
    assert_eq!(
        gateway.process(CALLER, &delete, today()).await.unwrap(),
        Report::Mutation {
            operation: OperationKind::Delete,
            affected_count: 1,
        }
    );

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_mysql_summary_view() {
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let gateway = InstructionGateway::new(store.clone(), &Config::default());
    let query = Instruction::new(OperationKind::Query)
        .with_phrase(TEST_DAY)
        .with_sql("SELECT * FROM transaction_summary WHERE transaction_date = ?");

    let report = gateway.process(CALLER, &query, today()).await.unwrap();
    assert!(matches!(report, Report::Daily { .. }));

    store.close().await.unwrap();
}
