//! SQLite transaction store implementation.
//!
//! Embedded backend with the same table shape as MySQL. SQLite has no exact
//! decimal type, so amounts travel as doubles and are rounded back to two
//! places on decode.

use crate::config::StoreConfig;
use crate::db::{
    with_timeout, DailyTotal, StoreBackend, TransactionRecord, TransactionStore, SQLITE_SCHEMA,
};
use crate::error::{LedgerError, Result};
use crate::safety::{BoundValue, ParamSlot, ValidatedStatement};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::borrow::Cow;
use std::time::Duration;
use tracing::info;

/// SQLite has no default LIKE escape character.
const LIKE_ESCAPE: &str = " ESCAPE '\\'";

/// How long SQLite waits on a locked database before reporting busy.
const BUSY_TIMEOUT_SECS: u64 = 5;

/// SQLite transaction store.
#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    statement_timeout: Duration,
}

impl SqliteStore {
    /// Creates a new SqliteStore from an existing connection pool.
    pub fn from_pool(pool: SqlitePool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    /// Opens (creating if needed) the configured database file.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let path = config
            .path
            .as_ref()
            .ok_or_else(|| LedgerError::config("SQLite database path is required"))?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await
            .map_err(|e| {
                LedgerError::config(format!("Cannot open {}: {e}", config.display_string()))
            })?;

        info!("Opened {}", config.display_string());
        Ok(Self::from_pool(pool, config.statement_timeout()))
    }
}

#[async_trait]
impl TransactionStore for SqliteStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Sqlite
    }

    async fn fetch_records(&self, statement: &ValidatedStatement) -> Result<Vec<TransactionRecord>> {
        let sql = sqlite_sql(statement);
        let rows = with_timeout(
            self.statement_timeout,
            false,
            bind_all(sqlx::query(&sql), statement.params())?.fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(decode_record).collect()
    }

    async fn fetch_daily_totals(&self, statement: &ValidatedStatement) -> Result<Vec<DailyTotal>> {
        let sql = sqlite_sql(statement);
        let rows = with_timeout(
            self.statement_timeout,
            false,
            bind_all(sqlx::query(&sql), statement.params())?.fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(decode_daily_total).collect()
    }

    async fn insert(&self, statement: &ValidatedStatement) -> Result<u64> {
        let sql = sqlite_sql(statement);
        let result = with_timeout(
            self.statement_timeout,
            true,
            bind_all(sqlx::query(&sql), statement.params())?.execute(&self.pool),
        )
        .await?;

        u64::try_from(result.last_insert_rowid())
            .map_err(|_| LedgerError::internal("negative row id"))
    }

    async fn execute(&self, statement: &ValidatedStatement) -> Result<u64> {
        let sql = sqlite_sql(statement);
        let result = with_timeout(
            self.statement_timeout,
            true,
            bind_all(sqlx::query(&sql), statement.params())?.execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }

    async fn ensure_schema(&self) -> Result<()> {
        for ddl in SQLITE_SCHEMA {
            with_timeout(
                self.statement_timeout,
                true,
                sqlx::raw_sql(ddl).execute(&self.pool),
            )
            .await?;
        }
        info!("SQLite schema is in place");
        Ok(())
    }

    async fn health_check(&self) -> Result<u64> {
        let count: i64 = with_timeout(
            self.statement_timeout,
            false,
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions").fetch_one(&self.pool),
        )
        .await?;

        u64::try_from(count).map_err(|_| LedgerError::internal("negative record count"))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Remark patterns escape wildcards with a backslash, which SQLite only
/// honors when the LIKE names it.
fn sqlite_sql(statement: &ValidatedStatement) -> Cow<'_, str> {
    if statement.bound(ParamSlot::RemarkPattern).is_some() {
        Cow::Owned(
            statement
                .sql()
                .replace(" LIKE ?", &format!(" LIKE ?{}", LIKE_ESCAPE)),
        )
    } else {
        Cow::Borrowed(statement.sql())
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [BoundValue],
) -> Result<Query<'q, Sqlite, SqliteArguments<'q>>> {
    for param in params {
        query = match param {
            BoundValue::Date(day) => query.bind(*day),
            BoundValue::Decimal(amount) => {
                let value = amount
                    .to_f64()
                    .ok_or_else(|| LedgerError::internal(format!("amount {amount} is not representable")))?;
                query.bind(value)
            }
            BoundValue::Text(text) => query.bind(text.as_str()),
            BoundValue::Id(id) => {
                let value = i64::try_from(*id)
                    .map_err(|_| LedgerError::internal(format!("id {id} exceeds SQLite range")))?;
                query.bind(value)
            }
        };
    }
    Ok(query)
}

fn decode_record(row: &SqliteRow) -> Result<TransactionRecord> {
    let id: i64 = required(row, "id")?;
    let transaction_date: NaiveDate = required(row, "transaction_date")?;
    let amount: f64 = required(row, "amount")?;

    Ok(TransactionRecord {
        id: u64::try_from(id).map_err(|_| LedgerError::internal("negative row id"))?,
        transaction_date,
        amount: to_decimal(amount)?,
        remark: optional(row, "remark"),
        created_at: optional::<NaiveDateTime>(row, "created_at"),
        updated_at: optional::<NaiveDateTime>(row, "updated_at"),
    })
}

fn decode_daily_total(row: &SqliteRow) -> Result<DailyTotal> {
    let transaction_date: NaiveDate = required(row, "transaction_date")?;
    let record_count: i64 = required(row, "record_count")?;
    let total_amount: Option<f64> = required(row, "total_amount")?;
    let avg_amount: Option<f64> = required(row, "avg_amount")?;

    Ok(DailyTotal {
        transaction_date,
        record_count: u64::try_from(record_count).unwrap_or_default(),
        total_amount: to_decimal(total_amount.unwrap_or_default())?,
        avg_amount: to_decimal(avg_amount.unwrap_or_default())?,
    })
}

fn required<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get_unchecked(column)
        .map_err(|e| crate::db::classify_error(e, false))
}

/// Missing or undecodable optional columns read as `None`.
fn optional<T>(row: &SqliteRow, column: &str) -> Option<T>
where
    T: for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get_unchecked::<Option<T>, _>(column).ok().flatten()
}

fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(2))
        .ok_or_else(|| LedgerError::fatal(format!("stored amount {value} is not a valid decimal")))
}
