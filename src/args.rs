//! These structs provide the CLI interface for the chat-ledger CLI.

use crate::model::{ChatId, IncomingMessage, MessageId, Month};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// chat-ledger: turns chat messages about money into a ledger.
///
/// Messages like "paguei 35,90 de frete hoje" or "/entrada 150 venda produto" are parsed,
/// validated and recorded exactly once in a local SQLite ledger, from which balances and monthly
/// reports are computed.
///
/// Natural-language messages are interpreted by an OpenAI-compatible service. Set
/// CHAT_LEDGER_IN_TEST_MODE to use a scripted interpreter instead.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory, a default config.json and an empty ledger.
    ///
    /// This is the first command you should run. Afterwards, put your NLU API key in
    /// config.json or in CHAT_LEDGER_NLU_API_KEY.
    Init,
    /// Process a single chat message and print the reply.
    Message(MessageArgs),
    /// Show the lifetime balance of a chat, and the net of the current month.
    Balance(BalanceArgs),
    /// Show a chat's monthly report, grouped by category.
    Report(ReportArgs),
    /// Read JSON messages from stdin, one per line, and write JSON replies to stdout.
    Serve,
    /// Check that the configuration is valid and that the ledger and NLU service are reachable.
    Check,
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where the ledger and configuration are held. Defaults to ~/chat-ledger
    #[arg(long, env = "CHAT_LEDGER_HOME", default_value_t = default_home())]
    home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, home: PathBuf) -> Self {
        Self {
            log_level,
            home: home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn home(&self) -> &DisplayPath {
        &self.home
    }
}

/// (Not shown): Args for the `chat-ledger message` command.
#[derive(Debug, Parser, Clone)]
pub struct MessageArgs {
    /// The conversation the message belongs to.
    #[arg(long)]
    chat_id: String,

    /// The message's id within the chat. Sending the same id twice records it once. A random id
    /// is used when omitted.
    #[arg(long)]
    message_id: Option<String>,

    /// The sender's display name.
    #[arg(long)]
    display_name: Option<String>,

    /// When the message was received, e.g. 2024-03-10T15:00:00Z. Defaults to now.
    #[arg(long)]
    received_at: Option<DateTime<Utc>>,

    /// The message text, e.g. "paguei 35,90 de frete hoje"
    text: String,
}

impl MessageArgs {
    pub fn new(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            message_id: None,
            display_name: None,
            received_at: None,
            text: text.into(),
        }
    }

    pub fn to_message(&self) -> IncomingMessage {
        let message_id = self
            .message_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let message = IncomingMessage::new(
            ChatId::new(&self.chat_id),
            MessageId::new(message_id),
            &self.text,
            self.received_at.unwrap_or_else(Utc::now),
        );
        match &self.display_name {
            Some(name) => message.with_display_name(name),
            None => message,
        }
    }
}

/// (Not shown): Args for the `chat-ledger balance` command.
#[derive(Debug, Parser, Clone)]
pub struct BalanceArgs {
    #[arg(long)]
    chat_id: String,
}

impl BalanceArgs {
    pub fn chat_id(&self) -> ChatId {
        ChatId::new(&self.chat_id)
    }
}

/// (Not shown): Args for the `chat-ledger report` command.
#[derive(Debug, Parser, Clone)]
pub struct ReportArgs {
    #[arg(long)]
    chat_id: String,

    /// The month to report on: YYYY-MM, MM/YYYY or YYYY. Defaults to the current month.
    month: Option<Month>,
}

impl ReportArgs {
    pub fn chat_id(&self) -> ChatId {
        ChatId::new(&self.chat_id)
    }

    pub fn month(&self) -> Option<Month> {
        self.month
    }
}

fn default_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("chat-ledger"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --home or CHAT_LEDGER_HOME instead of relying on the default \
                directory. If you continue using the program right now, you may have problems!",
            );
            PathBuf::from("chat-ledger")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn path(&self) -> &Path {
        &self.0
    }
}
