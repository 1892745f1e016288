//! The spreadsheet-style persistent store. Records cross this boundary as `Row`s (column name to
//! cell text) in one of a fixed set of tables.

mod memory;
mod migrations;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::{ChatId, DateRange, Row, TransactionColumn, UserColumn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A store failure, classified by whether trying again could help.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O trouble, a busy or locked database, a pool or call timeout.
    #[error("transient store failure: {0:#}")]
    Transient(anyhow::Error),
    /// Schema problems, corrupted rows, or misuse of the store API.
    #[error("store failure: {0:#}")]
    Fatal(anyhow::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// The outcome of a conditional append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Appended {
    Inserted,
    /// A row with the same unique key already existed and is returned unchanged.
    Duplicate(Row),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Movimentos,
    Usuarios,
}

serde_plain::derive_display_from_serialize!(Table);
serde_plain::derive_fromstr_from_deserialize!(Table);

impl Table {
    pub fn columns(&self) -> Vec<String> {
        match self {
            Table::Movimentos => TransactionColumn::ALL.iter().map(|c| c.to_string()).collect(),
            Table::Usuarios => UserColumn::ALL.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// The column that `append_unique` treats as the uniqueness key.
    pub fn unique_key(&self) -> String {
        match self {
            Table::Movimentos => TransactionColumn::IdempotencyKey.to_string(),
            Table::Usuarios => UserColumn::ChatId.to_string(),
        }
    }

    /// The column that `query_range` filters on.
    pub fn date_column(&self) -> String {
        match self {
            Table::Movimentos => TransactionColumn::OccurredOn.to_string(),
            Table::Usuarios => UserColumn::FirstSeen.to_string(),
        }
    }

    pub(crate) fn has_column(&self, name: &str) -> bool {
        self.columns().iter().any(|c| c == name)
    }

    /// Checks that `row` has exactly this table's columns.
    pub(crate) fn check_row(&self, row: &Row) -> Result<(), StoreError> {
        if let Some((unknown, _)) = row.iter().find(|(k, _)| !self.has_column(k)) {
            return Err(StoreError::Fatal(anyhow::anyhow!(
                "Table '{self}' has no column named '{unknown}'"
            )));
        }
        if let Some(missing) = self.columns().iter().find(|c| row.get(c).is_none()) {
            return Err(StoreError::Fatal(anyhow::anyhow!(
                "Row for table '{self}' is missing column '{missing}'"
            )));
        }
        Ok(())
    }

    pub(crate) fn check_field(&self, field: &str) -> Result<(), StoreError> {
        if self.has_column(field) {
            Ok(())
        } else {
            Err(StoreError::Fatal(anyhow::anyhow!(
                "Table '{self}' has no column named '{field}'"
            )))
        }
    }
}

/// Row storage with an atomic conditional append.
#[async_trait]
pub trait Store: Send + Sync {
    async fn append_row(&self, table: Table, row: Row) -> Result<(), StoreError>;

    /// Appends `row` unless a row with the same `table.unique_key()` value exists, in which case
    /// the existing row is returned. The check and the insert are atomic.
    async fn append_unique(&self, table: Table, row: Row) -> Result<Appended, StoreError>;

    /// All rows whose `field` equals `value`, in insertion order.
    async fn find_by(&self, table: Table, field: &str, value: &str)
        -> Result<Vec<Row>, StoreError>;

    /// All rows of `chat_id` whose `table.date_column()` falls in `range`, in insertion order.
    async fn query_range(
        &self,
        table: Table,
        chat_id: &ChatId,
        range: DateRange,
    ) -> Result<Vec<Row>, StoreError>;

    /// Checks that the store can be reached.
    async fn health(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
