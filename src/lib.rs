pub mod aggregate;
pub mod args;
pub mod commands;
mod config;
mod error;
pub mod extract;
pub mod ledger;
pub mod model;
pub mod nlu;
pub mod normalize;
pub mod pipeline;
pub mod rate_limit;
pub mod rejection;
pub mod retry;
pub mod store;
pub mod users;
mod utils;
pub mod validate;

#[cfg(test)]
mod test;

pub use config::{Config, Environment, BOT_TOKEN_ENV, NLU_API_KEY_ENV};
pub use error::Error;
pub use error::Result;

/// When this is set to a non-empty value the program runs against scripted collaborators instead
/// of the remote NLU service.
pub const TEST_MODE_ENV: &str = "CHAT_LEDGER_IN_TEST_MODE";

/// Whether the program talks to real collaborators or scripted ones.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub enum Mode {
    #[default]
    Live,
    Test,
}

impl Mode {
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(value) if !value.is_empty() => Mode::Test,
            _ => Mode::Live,
        }
    }
}
