//! Transaction store abstraction.
//!
//! Provides a trait-based interface over the `transactions` table so the
//! production MySQL store and the embedded SQLite store can be used
//! interchangeably. Store methods only accept [`ValidatedStatement`]s.

mod mock;
mod mysql;
mod schema;
mod sqlite;
mod types;

pub use mock::MockStore;
pub use mysql::MySqlStore;
pub use schema::{MYSQL_SCHEMA, SQLITE_SCHEMA, SUMMARY_VIEW, TRANSACTIONS_TABLE};
pub use sqlite::SqliteStore;
pub use types::{DailyTotal, TransactionRecord};

use crate::config::StoreConfig;
use crate::error::{LedgerError, Result};
use crate::safety::ValidatedStatement;
use async_trait::async_trait;
use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

/// Supported store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    MySql,
    Sqlite,
}

impl StoreBackend {
    /// Returns the backend as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Parses a backend from a string or URL scheme.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Some(Self::MySql),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Returns the default port for this backend.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::Sqlite => 0,
        }
    }
}

/// Creates a transaction store for the configured backend.
///
/// This is the central factory function for store connections.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn TransactionStore>> {
    match config.backend {
        StoreBackend::MySql => {
            let store = MySqlStore::connect(config).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Sqlite => {
            let store = SqliteStore::connect(config).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Trait defining the interface for transaction stores.
///
/// Every method runs a single statement atomically; nothing spans
/// multiple statements.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Returns the backend this store talks to.
    fn backend(&self) -> StoreBackend;

    /// Runs a query over `transactions` and decodes the rows.
    async fn fetch_records(&self, statement: &ValidatedStatement) -> Result<Vec<TransactionRecord>>;

    /// Runs a query over `transaction_summary` and decodes the rows.
    async fn fetch_daily_totals(&self, statement: &ValidatedStatement) -> Result<Vec<DailyTotal>>;

    /// Runs an INSERT and returns the generated id.
    async fn insert(&self, statement: &ValidatedStatement) -> Result<u64>;

    /// Runs an UPDATE or DELETE and returns the affected row count.
    async fn execute(&self, statement: &ValidatedStatement) -> Result<u64>;

    /// Creates the table, indexes and view if missing.
    async fn ensure_schema(&self) -> Result<()>;

    /// Checks connectivity and returns the current record count.
    async fn health_check(&self) -> Result<u64>;

    /// Closes the underlying pool.
    async fn close(&self) -> Result<()>;
}

/// MySQL deadlock and lock-wait timeout error numbers.
const MYSQL_DEADLOCK: u16 = 1213;
const MYSQL_LOCK_WAIT_TIMEOUT: u16 = 1205;

/// SQLite primary result codes for busy and locked databases.
const SQLITE_BUSY: u32 = 5;
const SQLITE_LOCKED: u32 = 6;

/// Maps a sqlx error to a ledger error, deciding whether it may be retried.
///
/// `is_write` marks statements that change data. A write is only retryable
/// when the failure proves the statement did not take effect: no connection
/// could be obtained, or the server rolled it back.
pub(crate) fn classify_error(error: sqlx::Error, is_write: bool) -> LedgerError {
    match error {
        sqlx::Error::PoolTimedOut => {
            LedgerError::transient("timed out waiting for a store connection")
        }
        sqlx::Error::Io(ref io) if io.kind() == ErrorKind::ConnectionRefused => {
            LedgerError::transient(format!("store unreachable: {io}"))
        }
        sqlx::Error::Io(io) if is_write => LedgerError::fatal(format!(
            "connection lost during write, outcome unknown: {io}"
        )),
        sqlx::Error::Io(io) => LedgerError::transient(format!("connection error: {io}")),
        sqlx::Error::Database(db) => {
            if is_rolled_back_conflict(db.as_ref()) {
                LedgerError::transient(format!("store busy: {}", db.message()))
            } else {
                LedgerError::fatal(db.message().to_string())
            }
        }
        sqlx::Error::ColumnNotFound(column) => {
            LedgerError::fatal(format!("result set is missing column '{column}'"))
        }
        sqlx::Error::ColumnDecode { index, source } => {
            LedgerError::fatal(format!("could not decode column {index}: {source}"))
        }
        other => LedgerError::fatal(other.to_string()),
    }
}

fn is_rolled_back_conflict(db: &dyn sqlx::error::DatabaseError) -> bool {
    if let Some(mysql) = db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
        return matches!(mysql.number(), MYSQL_DEADLOCK | MYSQL_LOCK_WAIT_TIMEOUT);
    }
    if db.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_some() {
        return db
            .code()
            .and_then(|code| code.parse::<u32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED));
    }
    db.code().is_some_and(|code| code == "40001")
}

/// Runs a store future under the statement timeout.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, is_write: bool, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| classify_error(e, is_write)),
        Err(_) if is_write => Err(LedgerError::fatal(format!(
            "write timed out after {} seconds, outcome unknown",
            timeout.as_secs()
        ))),
        Err(_) => Err(LedgerError::transient(format!(
            "query timed out after {} seconds",
            timeout.as_secs()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!(StoreBackend::parse("MySQL"), Some(StoreBackend::MySql));
        assert_eq!(StoreBackend::parse("mariadb"), Some(StoreBackend::MySql));
        assert_eq!(StoreBackend::parse("sqlite"), Some(StoreBackend::Sqlite));
        assert_eq!(StoreBackend::parse("postgres"), None);
        assert_eq!(StoreBackend::MySql.default_port(), 3306);
    }

    #[test]
    fn test_pool_timeout_is_transient_for_writes() {
        assert!(classify_error(sqlx::Error::PoolTimedOut, true).is_retryable());
    }

    #[test]
    fn test_refused_connection_is_transient() {
        let io = std::io::Error::new(ErrorKind::ConnectionRefused, "refused");
        assert!(classify_error(sqlx::Error::Io(io), true).is_retryable());
    }

    #[test]
    fn test_reset_during_write_is_fatal() {
        let io = std::io::Error::new(ErrorKind::ConnectionReset, "reset");
        let err = classify_error(sqlx::Error::Io(io), true);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("outcome unknown"));

        let io = std::io::Error::new(ErrorKind::ConnectionReset, "reset");
        assert!(classify_error(sqlx::Error::Io(io), false).is_retryable());
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let err = classify_error(sqlx::Error::ColumnNotFound("amount".to_string()), false);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("amount"));
    }

    #[test]
    fn test_completed_call_is_classified() {
        let value = tokio_test::block_on(with_timeout(Duration::from_secs(1), true, async {
            Ok::<_, sqlx::Error>(7u64)
        }))
        .unwrap();
        assert_eq!(value, 7);

        let err = tokio_test::block_on(with_timeout::<u64, _>(
            Duration::from_secs(1),
            true,
            async { Err(sqlx::Error::PoolTimedOut) },
        ))
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_read_timeout_is_transient() {
        let err = with_timeout::<(), _>(Duration::from_millis(10), false, async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_write_timeout_is_fatal() {
        let err = with_timeout::<(), _>(Duration::from_millis(10), true, async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(!err.is_retryable());
    }
}
