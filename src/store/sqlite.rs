//! The SQLite implementation of `Store`. Every column is TEXT, mirroring the spreadsheet shape of
//! `Row`, and uniqueness is enforced by the schema.

use crate::model::{ChatId, DateRange, Row};
use crate::store::migrations;
use crate::store::{Appended, Store, StoreError, Table};
use crate::Result;
use anyhow::{bail, Context};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const POOL_SIZE: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite extended result codes that mean "try again later".
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";
const SQLITE_BUSY_RECOVERY: &str = "261";
const SQLITE_LOCKED_SHAREDCACHE: &str = "262";
const SQLITE_BUSY_SNAPSHOT: &str = "517";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// - Validates that no file currently exists at `path`
    /// - Creates a new SQLite file at `path`
    /// - Initializes the schema to the latest version
    pub async fn init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            bail!("A database already exists at {}", path.display());
        }
        Self::connect(path, true).await
    }

    /// - Validates that there is a SQLite file at `path`
    /// - Brings the schema up to date if it is older than this program
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!(
                "No database found at {}, run the init command first",
                path.display()
            );
        }
        Self::connect(path, false).await
    }

    /// Loads the database at `path`, creating it if it does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::connect(path, !path.exists()).await
    }

    async fn connect(path: &Path, create: bool) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .context("Failed to parse SQLite connection string")?
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_SIZE)
            .acquire_timeout(BUSY_TIMEOUT)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;

        let current = migrations::current_version(&pool).await?;
        if current > migrations::LATEST_VERSION {
            bail!(
                "The database at {} has schema version {current}, which is newer than this program \
                 supports ({})",
                path.display(),
                migrations::LATEST_VERSION
            );
        }
        migrations::run(&pool, current, migrations::LATEST_VERSION).await?;
        info!("Opened database at {}", path.display());
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn read_row(table: Table, row: &SqliteRow) -> std::result::Result<Row, StoreError> {
        let mut out = Row::new();
        for column in table.columns() {
            let value: String = row
                .try_get(column.as_str())
                .with_context(|| format!("Unreadable column '{column}' in table '{table}'"))
                .map_err(StoreError::Fatal)?;
            out.set(column, value);
        }
        Ok(out)
    }

    fn insert_sql(table: Table, row: &Row) -> (String, Vec<String>) {
        let (columns, values): (Vec<&str>, Vec<String>) =
            row.iter().map(|(k, v)| (k, v.to_string())).unzip();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );
        (sql, values)
    }
}

/// Sorts a sqlx error into transient and fatal failures.
fn classify(e: sqlx::Error, what: String) -> StoreError {
    let transient = match &e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some(
                SQLITE_BUSY
                    | SQLITE_LOCKED
                    | SQLITE_BUSY_RECOVERY
                    | SQLITE_LOCKED_SHAREDCACHE
                    | SQLITE_BUSY_SNAPSHOT
            )
        ),
        _ => false,
    };
    let e = anyhow::Error::new(e).context(what);
    if transient {
        StoreError::Transient(e)
    } else {
        StoreError::Fatal(e)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn append_row(&self, table: Table, row: Row) -> std::result::Result<(), StoreError> {
        table.check_row(&row)?;
        let (sql, values) = Self::insert_sql(table, &row);
        let mut query = sqlx::query(&sql);
        for value in values {
            query = query.bind(value);
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, format!("Failed to append a row to '{table}'")))?;
        Ok(())
    }

    async fn append_unique(
        &self,
        table: Table,
        row: Row,
    ) -> std::result::Result<Appended, StoreError> {
        table.check_row(&row)?;
        let key = table.unique_key();
        let key_value = row.get(&key).unwrap_or_default().to_string();
        let (insert, values) = Self::insert_sql(table, &row);
        let sql = format!("{insert} ON CONFLICT({key}) DO NOTHING");
        let mut query = sqlx::query(&sql);
        for value in values {
            query = query.bind(value);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, format!("Failed to append a row to '{table}'")))?;

        if result.rows_affected() == 1 {
            return Ok(Appended::Inserted);
        }

        debug!("Row with {key}={key_value} already exists in '{table}'");
        let existing = self
            .find_by(table, &key, &key_value)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                StoreError::Fatal(anyhow::anyhow!(
                    "Insert into '{table}' was ignored but no row has {key}={key_value}"
                ))
            })?;
        Ok(Appended::Duplicate(existing))
    }

    async fn find_by(
        &self,
        table: Table,
        field: &str,
        value: &str,
    ) -> std::result::Result<Vec<Row>, StoreError> {
        table.check_field(field)?;
        let sql = format!("SELECT * FROM {table} WHERE {field} = ? ORDER BY rowid");
        let rows = sqlx::query(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(e, format!("Failed to query '{table}' by {field}")))?;
        rows.iter().map(|r| Self::read_row(table, r)).collect()
    }

    async fn query_range(
        &self,
        table: Table,
        chat_id: &ChatId,
        range: DateRange,
    ) -> std::result::Result<Vec<Row>, StoreError> {
        let date_column = table.date_column();
        let sql = format!(
            "SELECT * FROM {table} WHERE chat_id = ? AND {date_column} >= ? AND {date_column} < ? \
             ORDER BY rowid"
        );
        let rows = sqlx::query(&sql)
            .bind(chat_id.as_str())
            .bind(range.start.format("%Y-%m-%d").to_string())
            .bind(range.end.format("%Y-%m-%d").to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify(e, format!("Failed to query a date range of '{table}'")))?;
        rows.iter().map(|r| Self::read_row(table, r)).collect()
    }

    async fn health(&self) -> std::result::Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, "Database health check failed".to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Month;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn tx_row(key: &str, chat: &str, occurred_on: &str) -> Row {
        Row::new()
            .with("transaction_id", format!("tx-{key}"))
            .with("chat_id", chat)
            .with("direction", "saida")
            .with("amount", "10.00")
            .with("description", "café")
            .with("category", "outros")
            .with("occurred_on", occurred_on)
            .with("message_id", key)
            .with("idempotency_key", format!("{chat}:{key}"))
            .with("received_at", "2024-03-10T12:00:00.000Z")
            .with("recorded_at", "2024-03-10T12:00:00.100Z")
    }

    async fn store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::init(dir.path().join("ledger.sqlite"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_init_refuses_existing_file_and_load_requires_one() {
        let (dir, _store) = store().await;
        let path = dir.path().join("ledger.sqlite");
        assert!(SqliteStore::init(&path).await.is_err());
        assert!(SqliteStore::load(&path).await.is_ok());
        assert!(SqliteStore::load(dir.path().join("missing.sqlite"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_append_unique_and_find() {
        let (_dir, store) = store().await;
        let row = tx_row("7", "42", "2024-03-10");
        assert_eq!(
            store
                .append_unique(Table::Movimentos, row.clone())
                .await
                .unwrap(),
            Appended::Inserted
        );
        let mut retry = tx_row("7", "42", "2024-03-10");
        retry.set("transaction_id", "tx-other");
        assert_eq!(
            store.append_unique(Table::Movimentos, retry).await.unwrap(),
            Appended::Duplicate(row.clone())
        );
        let found = store
            .find_by(Table::Movimentos, "chat_id", "42")
            .await
            .unwrap();
        assert_eq!(found, vec![row]);
    }

    #[tokio::test]
    async fn test_query_range_is_half_open() {
        let (_dir, store) = store().await;
        for (key, date) in [("1", "2024-02-29"), ("2", "2024-03-01"), ("3", "2024-04-01")] {
            store
                .append_row(Table::Movimentos, tx_row(key, "42", date))
                .await
                .unwrap();
        }
        store
            .append_row(Table::Movimentos, tx_row("4", "43", "2024-03-05"))
            .await
            .unwrap();
        let rows = store
            .query_range(
                Table::Movimentos,
                &ChatId::from("42"),
                Month::new(2024, 3).unwrap().range(),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("message_id"), Some("2"));
    }

    #[tokio::test]
    async fn test_concurrent_appends_insert_once() {
        let (_dir, store) = store().await;
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for attempt in 0..8 {
            let store = store.clone();
            let mut row = tx_row("9", "42", "2024-03-10");
            row.set("transaction_id", format!("tx-attempt-{attempt}"));
            handles.push(tokio::spawn(async move {
                store.append_unique(Table::Movimentos, row).await.unwrap()
            }));
        }
        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() == Appended::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        let rows = store
            .find_by(Table::Movimentos, "idempotency_key", "42:9")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_plain_append_is_fatal() {
        let (_dir, store) = store().await;
        let row = tx_row("1", "42", "2024-03-10");
        store.append_row(Table::Movimentos, row.clone()).await.unwrap();
        let err = store.append_row(Table::Movimentos, row).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
