use crate::model::{ChatId, DateRange, Row};
use crate::store::{Appended, Store, StoreError, Table};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// An in-process `Store`. Every operation holds a single lock, so `append_unique` is atomic.
///
/// Failures can be injected to exercise retry paths: `failing_appends(n)` makes the next `n`
/// appends fail transiently, and `corrupted()` makes every call fail fatally.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<Table, Vec<Row>>>,
    transient_failures: AtomicUsize,
    corrupted: AtomicBool,
    appends: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_appends(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn corrupted(self) -> Self {
        self.corrupted.store(true, Ordering::SeqCst);
        self
    }

    /// The number of append attempts, successful or not.
    pub fn append_attempts(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    /// A snapshot of every row in `table`.
    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.lock().get(&table).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Table, Vec<Row>>> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_health(&self) -> Result<(), StoreError> {
        if self.corrupted.load(Ordering::SeqCst) {
            return Err(StoreError::Fatal(anyhow::anyhow!(
                "The in-memory store is marked as corrupted"
            )));
        }
        Ok(())
    }

    fn before_append(&self) -> Result<(), StoreError> {
        let _ = self.appends.fetch_add(1, Ordering::SeqCst);
        self.check_health()?;
        let failed = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Transient(anyhow::anyhow!(
                "Injected transient failure"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_row(&self, table: Table, row: Row) -> Result<(), StoreError> {
        self.before_append()?;
        table.check_row(&row)?;
        self.lock().entry(table).or_default().push(row);
        Ok(())
    }

    async fn append_unique(&self, table: Table, row: Row) -> Result<Appended, StoreError> {
        self.before_append()?;
        table.check_row(&row)?;
        let key = table.unique_key();
        let value = row.get(&key).unwrap_or_default().to_string();
        let mut tables = self.lock();
        let rows = tables.entry(table).or_default();
        if let Some(existing) = rows.iter().find(|r| r.get(&key) == Some(value.as_str())) {
            return Ok(Appended::Duplicate(existing.clone()));
        }
        rows.push(row);
        Ok(Appended::Inserted)
    }

    async fn find_by(
        &self,
        table: Table,
        field: &str,
        value: &str,
    ) -> Result<Vec<Row>, StoreError> {
        self.check_health()?;
        table.check_field(field)?;
        Ok(self
            .lock()
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.get(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query_range(
        &self,
        table: Table,
        chat_id: &ChatId,
        range: DateRange,
    ) -> Result<Vec<Row>, StoreError> {
        self.check_health()?;
        let date_column = table.date_column();
        let start = range.start.format("%Y-%m-%d").to_string();
        let end = range.end.format("%Y-%m-%d").to_string();
        Ok(self
            .lock()
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| r.get("chat_id") == Some(chat_id.as_str()))
                    .filter(|r| {
                        r.get(&date_column)
                            .is_some_and(|d| d >= start.as_str() && d < end.as_str())
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn health(&self) -> Result<(), StoreError> {
        self.check_health()
    }
}
