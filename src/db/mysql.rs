//! MySQL transaction store implementation.
//!
//! Provides the `MySqlStore` struct that implements the `TransactionStore`
//! trait for MySQL and MariaDB databases using sqlx.

use crate::config::StoreConfig;
use crate::db::{
    with_timeout, DailyTotal, StoreBackend, TransactionRecord, TransactionStore, MYSQL_SCHEMA,
};
use crate::error::{LedgerError, Result};
use crate::safety::{BoundValue, ValidatedStatement};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sqlx::mysql::{MySql, MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// MySQL transaction store.
#[derive(Debug)]
pub struct MySqlStore {
    pool: MySqlPool,
    statement_timeout: Duration,
}

impl MySqlStore {
    /// Creates a new MySqlStore from an existing connection pool.
    pub fn from_pool(pool: MySqlPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    /// Connects to MySQL, retrying transient failures with exponential backoff.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = MySqlPoolOptions::new()
                .max_connections(config.pool_size)
                .acquire_timeout(config.acquire_timeout())
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    info!("Connected to {}", config.display_string());
                    return Ok(Self::from_pool(pool, config.statement_timeout()));
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        break;
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) => map_connection_error(e, config),
            None => LedgerError::internal("no connection attempt was made"),
        })
    }
}

#[async_trait]
impl TransactionStore for MySqlStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::MySql
    }

    async fn fetch_records(&self, statement: &ValidatedStatement) -> Result<Vec<TransactionRecord>> {
        let rows = with_timeout(
            self.statement_timeout,
            false,
            bind_all(sqlx::query(statement.sql()), statement.params()).fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(decode_record).collect()
    }

    async fn fetch_daily_totals(&self, statement: &ValidatedStatement) -> Result<Vec<DailyTotal>> {
        let rows = with_timeout(
            self.statement_timeout,
            false,
            bind_all(sqlx::query(statement.sql()), statement.params()).fetch_all(&self.pool),
        )
        .await?;

        rows.iter().map(decode_daily_total).collect()
    }

    async fn insert(&self, statement: &ValidatedStatement) -> Result<u64> {
        let result = with_timeout(
            self.statement_timeout,
            true,
            bind_all(sqlx::query(statement.sql()), statement.params()).execute(&self.pool),
        )
        .await?;

        Ok(result.last_insert_id())
    }

    async fn execute(&self, statement: &ValidatedStatement) -> Result<u64> {
        let result = with_timeout(
            self.statement_timeout,
            true,
            bind_all(sqlx::query(statement.sql()), statement.params()).execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }

    async fn ensure_schema(&self) -> Result<()> {
        for ddl in MYSQL_SCHEMA {
            with_timeout(
                self.statement_timeout,
                true,
                sqlx::raw_sql(ddl).execute(&self.pool),
            )
            .await?;
        }
        info!("MySQL schema is in place");
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

fn bind_all<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [BoundValue],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            BoundValue::Date(day) => query.bind(*day),
            BoundValue::Decimal(amount) => query.bind(*amount),
            BoundValue::Text(text) => query.bind(text.as_str()),
            BoundValue::Id(id) => query.bind(*id),
        };
    }
    query
}

/// Decodes a `transactions` row. Only `id`, `transaction_date` and `amount`
/// are required; the other columns may be left out of the projection.
fn decode_record(row: &MySqlRow) -> Result<TransactionRecord> {
    let id: u64 = row.try_get("id").map_err(decode_error)?;
    let transaction_date: NaiveDate = row.try_get("transaction_date").map_err(decode_error)?;
    let amount: Decimal = row.try_get("amount").map_err(decode_error)?;

    Ok(TransactionRecord {
        id,
        transaction_date,
        amount,
        remark: optional_column(row, "remark")?,
        created_at: optional_column::<NaiveDateTime>(row, "created_at")?,
        updated_at: optional_column::<NaiveDateTime>(row, "updated_at")?,
    })
}

fn decode_daily_total(row: &MySqlRow) -> Result<DailyTotal> {
    let transaction_date: NaiveDate = row.try_get("transaction_date").map_err(decode_error)?;
    let record_count: i64 = row.try_get("record_count").map_err(decode_error)?;
    let total_amount: Option<Decimal> = row.try_get("total_amount").map_err(decode_error)?;
    let avg_amount: Option<Decimal> = row.try_get("avg_amount").map_err(decode_error)?;

    Ok(DailyTotal {
        transaction_date,
        record_count: u64::try_from(record_count).unwrap_or_default(),
        total_amount: total_amount.unwrap_or_default(),
        avg_amount: avg_amount.map(|a| a.round_dp(2)).unwrap_or_default(),
    })
}

fn optional_column<T>(row: &MySqlRow, column: &str) -> Result<Option<T>>
where
    T: for<'r> sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
{
    match row.try_get::<Option<T>, _>(column) {
        Ok(value) => Ok(value),
        Err(sqlx::Error::ColumnNotFound(_)) => Ok(None),
        Err(e) => Err(decode_error(e)),
    }
}

fn decode_error(error: sqlx::Error) -> LedgerError {
    crate::db::classify_error(error, false)
}

/// Determines if a connection error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    if matches!(error, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) {
        return true;
    }

    // Access and unknown-database errors are not transient
    if error_str.contains("access denied") || error_str.contains("unknown database") {
        return false;
    }

    error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("too many connections")
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &StoreConfig) -> LedgerError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port;
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        LedgerError::transient(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("access denied") {
        LedgerError::config(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("unknown database") {
        LedgerError::config(format!("Database '{database}' does not exist."))
    } else if error_str.contains("timed out") {
        LedgerError::transient(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        LedgerError::fatal(error.to_string())
    }
}
