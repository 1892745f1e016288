//! Configuration file handling for chat-ledger.
//!
//! The configuration file is stored at `$CHAT_LEDGER_HOME/config.json`. It holds the store
//! location, the NLU endpoint, rate-limit settings and the UTC offset used to resolve relative
//! dates. Secrets may live in the file or come from the environment.

use crate::nlu::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::store::SqliteStore;
use crate::{utils, Mode, Result};
use anyhow::{bail, ensure, Context};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const APP_NAME: &str = "chat-ledger";
const CONFIG_VERSION: u8 = 1;
const CONFIG_JSON: &str = "config.json";
const LEDGER_SQLITE: &str = "ledger.sqlite";

pub const BOT_TOKEN_ENV: &str = "CHAT_LEDGER_BOT_TOKEN";
pub const NLU_API_KEY_ENV: &str = "CHAT_LEDGER_NLU_API_KEY";

/// São Paulo, where the bot's users are.
const DEFAULT_UTC_OFFSET_MINUTES: i32 = -180;
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

serde_plain::derive_display_from_serialize!(Environment);
serde_plain::derive_fromstr_from_deserialize!(Environment);

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$CHAT_LEDGER_HOME` and from there it loads `$CHAT_LEDGER_HOME/config.json`.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
    bot_token: Option<String>,
    nlu_api_key: Option<String>,
}

impl Config {
    /// Creates the data directory, a default `config.json` and an empty SQLite ledger.
    ///
    /// # Errors
    /// - Returns an error if any file operations fail, or if a ledger already exists in `dir`.
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the chat-ledger home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;

        let config_path = root.join(CONFIG_JSON);
        let config_file = ConfigFile::default();
        config_file.save(&config_path).await?;

        let config = Self::from_parts(root, config_path, config_file);
        let store = SqliteStore::init(config.sqlite_path())
            .await
            .context("Unable to create SQLite DB")?;
        store.close().await;
        Ok(config)
    }

    /// This will
    /// - validate that the home directory and the config file exist
    /// - load the config file
    /// - apply secrets from the environment
    pub async fn load(home: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = home.into();
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("The chat-ledger home directory is missing")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!("The config file is missing '{}'", config_path.display())
        }
        let config_file = ConfigFile::load(&config_path).await?;
        Ok(Self::from_parts(root, config_path, config_file))
    }

    fn from_parts(root: PathBuf, config_path: PathBuf, config_file: ConfigFile) -> Self {
        let bot_token = secret(BOT_TOKEN_ENV, config_file.bot_token.as_deref());
        let nlu_api_key = secret(NLU_API_KEY_ENV, config_file.nlu.api_key.as_deref());
        Self {
            root,
            config_path,
            config_file,
            bot_token,
            nlu_api_key,
        }
    }

    /// Checks the numeric settings, and that an NLU key is present unless running in test mode.
    pub fn validate(&self, mode: Mode) -> Result<()> {
        let file = &self.config_file;
        ensure!(
            file.store.timeout_ms > 0,
            "store.timeout_ms must be greater than zero"
        );
        ensure!(
            file.nlu.timeout_ms > 0,
            "nlu.timeout_ms must be greater than zero"
        );
        ensure!(
            (0.0..=1.0).contains(&file.nlu.min_confidence),
            "nlu.min_confidence must be between 0 and 1, got {}",
            file.nlu.min_confidence
        );
        ensure!(
            file.rate_limit.max_requests > 0,
            "rate_limit.max_requests must be greater than zero"
        );
        ensure!(
            file.rate_limit.window_ms > 0,
            "rate_limit.window_ms must be greater than zero"
        );
        ensure!(
            file.utc_offset_minutes.abs() <= MAX_UTC_OFFSET_MINUTES,
            "utc_offset_minutes must be within ±{MAX_UTC_OFFSET_MINUTES}, got {}",
            file.utc_offset_minutes
        );
        if mode == Mode::Live && self.nlu_api_key.is_none() {
            bail!("No NLU API key, set nlu.api_key in config.json or {NLU_API_KEY_ENV}")
        }
        debug!("Configuration at {} is valid", self.config_path.display());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn environment(&self) -> Environment {
        self.config_file.environment
    }

    /// Returns the configured store path if it is absolute, otherwise resolves it against the
    /// home directory.
    pub fn sqlite_path(&self) -> PathBuf {
        let p = self
            .config_file
            .store
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(LEDGER_SQLITE));
        if p.is_absolute() {
            return p;
        }
        self.root.join(p)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.config_file.store.timeout_ms)
    }

    pub fn nlu_base_url(&self) -> &str {
        &self.config_file.nlu.base_url
    }

    pub fn nlu_model(&self) -> &str {
        &self.config_file.nlu.model
    }

    pub fn nlu_timeout(&self) -> Duration {
        Duration::from_millis(self.config_file.nlu.timeout_ms)
    }

    pub fn min_confidence(&self) -> f64 {
        self.config_file.nlu.min_confidence
    }

    pub fn nlu_api_key(&self) -> Option<&str> {
        self.nlu_api_key.as_deref()
    }

    pub fn bot_token(&self) -> Option<&str> {
        self.bot_token.as_deref()
    }

    pub fn rate_limit_max_requests(&self) -> usize {
        self.config_file.rate_limit.max_requests
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.config_file.rate_limit.window_ms)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        let minutes = self.config_file.utc_offset_minutes;
        FixedOffset::east_opt(minutes * 60)
            .with_context(|| format!("{minutes} minutes is not a valid UTC offset"))
    }
}

/// An environment variable wins over the file. Blank values count as absent.
fn secret(env_var: &str, from_file: Option<&str>) -> Option<String> {
    std::env::var(env_var)
        .ok()
        .or_else(|| from_file.map(str::to_string))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "chat-ledger",
///   "config_version": 1,
///   "environment": "prod",
///   "store": { "path": "ledger.sqlite", "timeout_ms": 5000 },
///   "nlu": {
///     "base_url": "https://api.openai.com/v1",
///     "model": "gpt-4o-mini",
///     "timeout_ms": 10000,
///     "min_confidence": 0.6
///   },
///   "rate_limit": { "window_ms": 1000, "max_requests": 2 },
///   "utc_offset_minutes": -180
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "chat-ledger"
    app_name: String,

    config_version: u8,

    #[serde(default)]
    environment: Environment,

    #[serde(default)]
    store: StoreSettings,

    #[serde(default)]
    nlu: NluSettings,

    #[serde(default)]
    rate_limit: RateLimitSettings,

    #[serde(default = "default_utc_offset_minutes")]
    utc_offset_minutes: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    bot_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
struct StoreSettings {
    /// Relative to the home directory, or absolute. Defaults to `ledger.sqlite`.
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
struct NluSettings {
    base_url: String,
    model: String,
    timeout_ms: u64,
    min_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
struct RateLimitSettings {
    window_ms: u64,
    max_requests: usize,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            environment: Environment::default(),
            store: StoreSettings::default(),
            nlu: NluSettings::default(),
            rate_limit: RateLimitSettings::default(),
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            bot_token: None,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: None,
            timeout_ms: duration_ms(crate::ledger::DEFAULT_STORE_TIMEOUT),
        }
    }
}

impl Default for NluSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: duration_ms(crate::extract::DEFAULT_NLU_TIMEOUT),
            min_confidence: crate::extract::DEFAULT_MIN_CONFIDENCE,
            api_key: None,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_ms: duration_ms(crate::rate_limit::DEFAULT_WINDOW),
            max_requests: crate::rate_limit::DEFAULT_MAX_REQUESTS,
        }
    }
}

fn default_utc_offset_minutes() -> i32 {
    DEFAULT_UTC_OFFSET_MINUTES
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl ConfigFile {
    /// Loads a ConfigFile from the specified path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or belongs to another program.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: ConfigFile = utils::deserialize(path.as_ref()).await?;
        ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );
        Ok(config)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let p = path.as_ref();
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(p, data)
            .await
            .context("Unable to write config file")
    }
}
