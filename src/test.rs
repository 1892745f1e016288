//! Shared test utilities for creating test environments.
//!
//! This module is only compiled when running tests (`#[cfg(test)]`).

use crate::commands::{open_store, Bot};
use crate::store::{Store, Table};
use crate::{Config, Mode};
use tempfile::TempDir;

/// Test environment that sets up a chat-ledger home directory with a Config and an initialized
/// SQLite ledger. Holds TempDir to keep the directory alive for the duration of the test.
pub struct TestEnv {
    _temp_dir: TempDir,
    config: Config,
}

impl TestEnv {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::create(temp_dir.path().join("chat-ledger"))
            .await
            .unwrap();
        Self {
            _temp_dir: temp_dir,
            config,
        }
    }

    /// Returns a clone of the Config.
    pub fn config(&self) -> Config {
        self.config.clone()
    }

    /// A bot over this environment's ledger, with the scripted NLU.
    pub async fn bot(&self) -> Bot {
        Bot::from_config(&self.config, Mode::Test).await.unwrap()
    }

    /// The number of transactions recorded for `chat_id`.
    pub async fn transaction_count(&self, chat_id: &str) -> usize {
        let store = open_store(&self.config).await.unwrap();
        let rows = store
            .find_by(Table::Movimentos, "chat_id", chat_id)
            .await
            .unwrap();
        store.close().await;
        rows.len()
    }
}
