//! End-to-end gateway tests against an embedded SQLite store.
//!
//! Each test opens a fresh database file in a temporary directory.

use std::sync::Arc;

use chrono::NaiveDate;
use ledger_core::config::{Config, StoreConfig};
use ledger_core::db::{self, TransactionStore};
use ledger_core::error::Stage;
use ledger_core::gateway::{GatewayResponse, Instruction, InstructionGateway};
use ledger_core::report::Report;
use ledger_core::safety::OperationKind;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use tempfile::TempDir;

const CALLER: &str = "coordinator";

const INSERT_SQL: &str =
    "INSERT INTO transactions (transaction_date, amount, remark) VALUES (?, ?, ?)";
const RANGE_SQL: &str = "SELECT * FROM transactions WHERE transaction_date >= ? AND transaction_date < ? ORDER BY id";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 13).unwrap()
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Opens a store with the schema in place. The directory must outlive it.
async fn open_store() -> (TempDir, Arc<dyn TransactionStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = db::connect(&StoreConfig::sqlite(dir.path().join("ledger.db")))
        .await
        .unwrap();
    store.ensure_schema().await.unwrap();
    (dir, store)
}

fn gateway(store: Arc<dyn TransactionStore>) -> InstructionGateway {
    let mut config = Config::default();
    config.retry.base_delay_ms = 1;
    InstructionGateway::new(store, &config)
}

async fn record(gateway: &InstructionGateway, phrase: &str, amount: &str, remark: &str) -> u64 {
    let instruction = Instruction::new(OperationKind::Insert)
        .with_phrase(phrase)
        .with_amount(dec(amount))
        .with_remark(remark)
        .with_sql(INSERT_SQL);

    match gateway.process(CALLER, &instruction, today()).await.unwrap() {
        Report::Confirmation { new_id, .. } => new_id,
        other => panic!("expected confirmation, got {other:?}"),
    }
}

async fn query(gateway: &InstructionGateway, phrase: &str) -> Report {
    let instruction = Instruction::new(OperationKind::Query)
        .with_phrase(phrase)
        .with_sql(RANGE_SQL);
    gateway.process(CALLER, &instruction, today()).await.unwrap()
}

#[tokio::test]
async fn test_insert_then_query_round_trip() {
    let (_dir, store) = open_store().await;
    let gateway = gateway(store.clone());

    let id = record(&gateway, "今天", "-35.50", "午饭").await;

    match query(&gateway, "today").await {
        Report::Summary { records, lines, .. } => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].id, id);
            assert_eq!(records[0].transaction_date, today());
            assert_eq!(records[0].amount, dec("-35.50"));
            assert_eq!(records[0].remark.as_deref(), Some("午饭"));
            assert_eq!(
                lines,
                vec![format!(
                    "- id: {id} | transaction_date: 2024-03-13 | amount: -35.50 | remark: 午饭"
                )]
            );
        }
        other => panic!("expected summary, got {other:?}"),
    }

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_week_summary_aggregates_signed_amounts() {
    let (_dir, store) = open_store().await;
    let gateway = gateway(store.clone());

    record(&gateway, "yesterday", "100", "salary").await;
    record(&gateway, "today", "-40", "groceries").await;
    record(&gateway, "today", "25", "refund").await;
    record(&gateway, "last week", "-999", "outside the range").await;

    match query(&gateway, "this week").await {
        Report::Summary { summary, .. } => {
            assert_eq!(summary.total_count, 3);
            assert_eq!(summary.sum_amount, dec("85"));
            assert_eq!(summary.income_total, dec("125"));
            assert_eq!(summary.expense_total, dec("-40"));
            assert_eq!(summary.net, dec("85"));
            assert_eq!(summary.avg_amount, dec("28.33"));
        }
        other => panic!("expected summary, got {other:?}"),
    }

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_range_has_zero_average() {
    let (_dir, store) = open_store().await;
    let gateway = gateway(store.clone());

    match query(&gateway, "last month").await {
        Report::Summary { summary, records, .. } => {
            assert!(records.is_empty());
            assert_eq!(summary.total_count, 0);
            assert_eq!(summary.avg_amount, Decimal::ZERO);
        }
        other => panic!("expected summary, got {other:?}"),
    }

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_daily_totals_from_summary_view() {
    let (_dir, store) = open_store().await;
    let gateway = gateway(store.clone());

    record(&gateway, "yesterday", "100", "salary").await;
    record(&gateway, "today", "-40", "groceries").await;
    record(&gateway, "today", "-20", "coffee").await;

    let instruction = Instruction::new(OperationKind::Query)
        .with_phrase("本周")
        .with_sql(
            "SELECT * FROM transaction_summary WHERE transaction_date >= ? AND transaction_date < ? ORDER BY transaction_date",
        );

    match gateway.process(CALLER, &instruction, today()).await.unwrap() {
        Report::Daily { overview, days, .. } => {
            assert_eq!(days.len(), 2);
            assert_eq!(days[1].transaction_date, today());
            assert_eq!(days[1].record_count, 2);
            assert_eq!(days[1].total_amount, dec("-60"));
            assert_eq!(overview.total_count, 3);
            assert_eq!(overview.sum_amount, dec("40"));
        }
        other => panic!("expected daily report, got {other:?}"),
    }

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_update_and_delete_by_id() {
    let (_dir, store) = open_store().await;
    let gateway = gateway(store.clone());

    let id = record(&gateway, "today", "-12", "taxi").await;

    let update = Instruction::new(OperationKind::Update)
        .with_amount(dec("-15.75"))
        .with_record_id(id)
        .with_sql("UPDATE transactions SET amount = ? WHERE id = ?");
    assert_eq!(
        gateway.process(CALLER, &update, today()).await.unwrap(),
        Report::Mutation {
            operation: OperationKind::Update,
            affected_count: 1,
        }
    );

    match query(&gateway, "today").await {
        Report::Summary { records, .. } => assert_eq!(records[0].amount, dec("-15.75")),
        other => panic!("expected summary, got {other:?}"),
    }

    let delete = Instruction::new(OperationKind::Delete)
        .with_record_id(id)
        .with_sql("DELETE FROM transactions WHERE id = ?");
    let report = gateway.process(CALLER, &delete, today()).await.unwrap();
    assert_eq!(report.render_text(), "OK: delete affected 1 row(s).");

    let again = gateway.process(CALLER, &delete, today()).await.unwrap();
    assert_eq!(again.render_text(), "Warning: delete matched no rows.");

    assert_eq!(store.health_check().await.unwrap(), 0);
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_remark_search_matches_substring() {
    let (_dir, store) = open_store().await;
    let gateway = gateway(store.clone());

    record(&gateway, "today", "-40", "weekly groceries").await;
    record(&gateway, "today", "-9", "coffee").await;

    let instruction = Instruction::new(OperationKind::Query)
        .with_remark("groceries")
        .with_sql("SELECT * FROM transactions WHERE remark LIKE ?");

    match gateway.process(CALLER, &instruction, today()).await.unwrap() {
        Report::Summary { records, .. } => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].remark.as_deref(), Some("weekly groceries"));
        }
        other => panic!("expected summary, got {other:?}"),
    }

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_rejected_write_leaves_store_untouched() {
    let (_dir, store) = open_store().await;
    let gateway = gateway(store.clone());

    record(&gateway, "today", "10", "kept").await;

    let attacks = [
        (OperationKind::Delete, "DELETE FROM transactions"),
        (OperationKind::Delete, "DELETE FROM transactions WHERE 1 = 1"),
        (OperationKind::Delete, "DELETE FROM transactions WHERE 0 = 0"),
        (OperationKind::Delete, "DELETE FROM transactions WHERE TRUE"),
        (OperationKind::Delete, "DELETE FROM transactions WHERE id = ? OR 0 = 0"),
        (OperationKind::Delete, "DELETE FROM transactions WHERE id = ? OR id = id"),
        (OperationKind::Delete, "DELETE FROM transactions WHERE amount > 0"),
        (OperationKind::Update, "UPDATE transactions SET remark = NULL WHERE 0 = 0"),
        (OperationKind::Query, "SELECT * FROM transactions; DROP TABLE transactions"),
        (OperationKind::Update, "UPDATE transactions SET id = ? WHERE id = ?"),
    ];

    for (operation, sql) in attacks {
        let instruction = Instruction::new(operation)
            .with_record_id(1)
            .with_sql(sql);
        match gateway.handle(CALLER, &instruction, today()).await {
            GatewayResponse::Error { error } => assert_eq!(error.stage, Stage::Validate, "{sql}"),
            other => panic!("expected rejection of {sql}, got {other:?}"),
        }
    }

    assert_eq!(store.health_check().await.unwrap(), 1);
    match query(&gateway, "today").await {
        Report::Summary { records, .. } => assert_eq!(records[0].remark.as_deref(), Some("kept")),
        other => panic!("expected summary, got {other:?}"),
    }
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_confirmation_matches_stored_row() {
    let (_dir, store) = open_store().await;
    let gateway = gateway(store.clone());

    let instruction = Instruction::new(OperationKind::Insert)
        .with_phrase("today")
        .with_amount(dec("100"))
        .with_remark("lunch")
        .with_sql("INSERT INTO transactions (transaction_date, amount, remark) VALUES (?, ?, NULL)");
    let confirmation = gateway.process(CALLER, &instruction, today()).await.unwrap();
    assert_eq!(
        confirmation.render_text(),
        "OK: Recorded transaction #1 on 2024-03-13, amount 100.00"
    );

    match query(&gateway, "today").await {
        Report::Summary { records, .. } => assert_eq!(records[0].remark, None),
        other => panic!("expected summary, got {other:?}"),
    }

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_remark_search_with_percent_sign() {
    let (_dir, store) = open_store().await;
    let gateway = gateway(store.clone());

    record(&gateway, "today", "-20", "50% off shoes").await;
    record(&gateway, "today", "-30", "500 off coupon").await;

    let instruction = Instruction::new(OperationKind::Query)
        .with_remark("50%")
        .with_sql("SELECT * FROM transactions WHERE remark LIKE ?");

    match gateway.process(CALLER, &instruction, today()).await.unwrap() {
        Report::Summary { records, .. } => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].remark.as_deref(), Some("50% off shoes"));
        }
        other => panic!("expected summary, got {other:?}"),
    }

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_aggregate_projection_is_rejected_before_execution() {
    let (_dir, store) = open_store().await;
    let gateway = gateway(store.clone());

    let instruction = Instruction::new(OperationKind::Query)
        .with_phrase("today")
        .with_sql("SELECT SUM(amount) FROM transactions WHERE transaction_date >= ?");

    match gateway.handle(CALLER, &instruction, today()).await {
        GatewayResponse::Error { error } => {
            assert_eq!(error.stage, Stage::Validate);
            assert_eq!(error.rule, Some("incomplete_projection"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_instruction_json_through_gateway() {
    let (_dir, store) = open_store().await;
    let gateway = gateway(store.clone());

    let instruction = Instruction::from_json(
        r#"{
            "operation": "insert",
            "date_phrase": "前天",
            "amount": "88.80",
            "remark": "红包",
            "raw_sql_hint": "```sql\nINSERT INTO transactions (transaction_date, amount, remark) VALUES (?, ?, ?)\n```"
        }"#,
    )
    .unwrap();

    let response = gateway.handle(CALLER, &instruction, today()).await;
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["result"]["type"], "confirmation");
    assert_eq!(json["result"]["transaction_date"], "2024-03-11");
    assert_eq!(json["result"]["new_id"], 1);

    store.close().await.unwrap();
}
