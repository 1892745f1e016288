//! Appends accepted transactions to the store, at least once and at most once per message.

use crate::model::{idempotency_key, ChatId, MessageId, Transaction, TransactionColumn};
use crate::retry::{self, RetryError, RetryPolicy};
use crate::store::{Appended, Store, StoreError, Table};
use crate::Result;
use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "transaction", rename_all = "snake_case")]
pub enum RecordResult {
    /// The transaction was written, with `recorded_at` set.
    Recorded(Transaction),
    /// The message had already been recorded. This is the stored copy; nothing new was written.
    AlreadyRecorded(Transaction),
    /// The store kept failing transiently. Nothing was written.
    PersistenceFailed { attempts: u32 },
}

#[derive(Clone)]
pub struct LedgerWriter {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl LedgerWriter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            retry: RetryPolicy::store_default(),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Writes `transaction` unless its message was already recorded. Transient store failures
    /// are retried; anything else is returned as an error.
    pub async fn record(&self, transaction: Transaction) -> Result<RecordResult> {
        let transaction = transaction.stamped(Utc::now());
        let row = transaction.to_row();
        let key = transaction.idempotency_key();

        let store = &self.store;
        let timeout = self.timeout;
        let row = &row;
        let result = retry::run(
            &self.retry,
            "ledger append",
            StoreError::is_transient,
            move || bounded(timeout, store.append_unique(Table::Movimentos, row.clone())),
        )
        .await;

        match result {
            Ok(Appended::Inserted) => {
                info!(
                    chat_id = %transaction.chat_id(),
                    transaction_id = transaction.transaction_id(),
                    "Recorded {} of {}",
                    transaction.direction(),
                    transaction.amount()
                );
                Ok(RecordResult::Recorded(transaction))
            }
            Ok(Appended::Duplicate(existing)) => {
                info!("Message {key} was already recorded");
                let existing = Transaction::from_row(&existing)
                    .with_context(|| format!("The stored transaction for {key} is unreadable"))?;
                Ok(RecordResult::AlreadyRecorded(existing))
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!("Could not record {key} after {attempts} attempts: {last}");
                Ok(RecordResult::PersistenceFailed { attempts })
            }
            Err(RetryError::Permanent(e)) => {
                Err(anyhow::Error::new(e).context(format!("Unable to record {key}")))
            }
        }
    }

    /// Returns the stored transaction for a message, if there is one.
    pub async fn lookup(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
    ) -> std::result::Result<Option<Transaction>, StoreError> {
        let key = idempotency_key(chat_id, message_id);
        let field = TransactionColumn::IdempotencyKey.to_string();
        let rows = bounded(
            self.timeout,
            self.store.find_by(Table::Movimentos, &field, &key),
        )
        .await?;
        rows.first()
            .map(Transaction::from_row)
            .transpose()
            .map_err(StoreError::Fatal)
    }
}

/// Runs a store call under `timeout`. Running out of time counts as a transient failure.
async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = std::result::Result<T, StoreError>>,
) -> std::result::Result<T, StoreError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Transient(anyhow::anyhow!(
            "Store call timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}
