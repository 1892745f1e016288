//! Command handlers for the chat-ledger CLI.
//!
//! This module contains implementations for all CLI subcommands, plus the chat router that the
//! `message` and `serve` commands share.

mod balance;
mod bot;
mod check;
mod init;
mod message;
mod serve;

use crate::nlu::{Nlu, OpenAiNlu, ScriptedNlu};
use crate::store::SqliteStore;
use crate::{Config, Mode, Result};
use anyhow::Context;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info};

pub use balance::{balance, report};
pub use bot::{Bot, Reply, MAX_MESSAGE_CHARS};
pub use check::{check, Health};
pub use init::init;
pub use message::message;
pub use serve::{serve, serve_lines, ServeSummary};

/// The output type for a command. This allows the command to return a consistent message and,
/// optionally, structured data.
#[derive(Debug, Clone, Serialize)]
pub struct Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// A message that can be printed to the user regarding the outcome of the command execution.
    message: String,

    /// Any structured data that needs to be output from the call.
    structure: Option<T>,
}

impl<T, S> From<S> for Out<T>
where
    T: Debug + Clone + Serialize,
    S: Into<String>,
{
    fn from(value: S) -> Self {
        Out::new_message(value)
    }
}

impl<T> Out<T>
where
    T: Serialize + Clone + Debug,
{
    /// Create a new `Out` object that has `Some(structure)`.
    pub fn new<S>(message: S, structure: T) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: Some(structure),
        }
    }

    /// Create a new `Out` object that has `None` for `structure`.
    pub fn new_message<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            message: message.into(),
            structure: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn structure(&self) -> Option<&T> {
        self.structure.as_ref()
    }

    /// Print the message to `info!` and the structured data (if it exists) as JSON to `debug!`.
    pub fn print(&self) {
        info!("{}", self.message);
        if let Some(structure) = self.structure() {
            if let Ok(json) = serde_json::to_string_pretty(structure) {
                debug!("Command output:\n\n{json}\n\n");
            }
        }
    }
}

/// Opens the ledger named by `config`. The database must already exist.
pub(crate) async fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::load(config.sqlite_path())
        .await
        .context("Unable to open the ledger, has `chat-ledger init` been run?")
}

/// The NLU collaborator for `mode`: the remote service, or the scripted double in test mode.
pub(crate) fn nlu_for(config: &Config, mode: Mode) -> Result<Arc<dyn Nlu>> {
    Ok(match mode {
        Mode::Test => Arc::new(ScriptedNlu::default()),
        Mode::Live => {
            let api_key = config
                .nlu_api_key()
                .context("An NLU API key is required outside of test mode")?;
            Arc::new(OpenAiNlu::new(
                config.nlu_base_url(),
                config.nlu_model(),
                api_key,
            )?)
        }
    })
}
