//! DDL for the transaction store.
//!
//! The MySQL definitions are the canonical persisted schema; the SQLite ones
//! mirror their shape for the embedded backend.

/// Table holding ledger entries.
pub const TRANSACTIONS_TABLE: &str = "transactions";

/// Read-only per-day aggregate view.
pub const SUMMARY_VIEW: &str = "transaction_summary";

/// MySQL schema statements, in execution order.
pub const MYSQL_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS transactions (
    id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT,
    transaction_date DATE NOT NULL,
    amount DECIMAL(15,2) NOT NULL,
    remark TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
    PRIMARY KEY (id),
    INDEX idx_transaction_date (transaction_date),
    INDEX idx_amount (amount),
    INDEX idx_date_amount (transaction_date, amount)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"#,
    r#"CREATE OR REPLACE VIEW transaction_summary AS
SELECT
    transaction_date,
    COUNT(*) AS record_count,
    SUM(amount) AS total_amount,
    AVG(amount) AS avg_amount
FROM transactions
GROUP BY transaction_date"#,
];

/// SQLite schema statements, in execution order.
pub const SQLITE_SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_date DATE NOT NULL,
    amount DECIMAL(15,2) NOT NULL,
    remark TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)"#,
    "CREATE INDEX IF NOT EXISTS idx_transaction_date ON transactions (transaction_date)",
    "CREATE INDEX IF NOT EXISTS idx_amount ON transactions (amount)",
    "CREATE INDEX IF NOT EXISTS idx_date_amount ON transactions (transaction_date, amount)",
    r#"CREATE TRIGGER IF NOT EXISTS trg_transactions_updated_at
AFTER UPDATE ON transactions
FOR EACH ROW
WHEN NEW.updated_at IS OLD.updated_at
BEGIN
    UPDATE transactions SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
END"#,
    r#"CREATE VIEW IF NOT EXISTS transaction_summary AS
SELECT
    transaction_date,
    COUNT(*) AS record_count,
    SUM(amount) AS total_amount,
    AVG(amount) AS avg_amount
FROM transactions
GROUP BY transaction_date"#,
];
