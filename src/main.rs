use chat_ledger::args::{Args, Command};
use chat_ledger::{commands, Config, Environment, Mode, Result};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, error, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    let environment = environment(args.common().home().path()).await;
    init_logger(log_level, environment);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    match main_inner(args).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

pub async fn main_inner(args: Args) -> Result<()> {
    trace!("{args:?}");
    let home = args.common().home().path();

    // When CHAT_LEDGER_IN_TEST_MODE is set and non-empty the scripted NLU is used instead of the
    // remote service.
    let mode = Mode::from_env();

    let _: () = match args.command() {
        Command::Init => commands::init(home).await?.print(),

        Command::Message(message_args) => {
            let config = Config::load(home).await?;
            commands::message(config, mode, message_args.to_message())
                .await?
                .print()
        }

        Command::Balance(balance_args) => {
            let config = Config::load(home).await?;
            commands::balance(config, balance_args.chat_id())
                .await?
                .print()
        }

        Command::Report(report_args) => {
            let config = Config::load(home).await?;
            commands::report(config, report_args.chat_id(), report_args.month())
                .await?
                .print()
        }

        Command::Serve => commands::serve(Config::load(home).await?, mode)
            .await?
            .print(),

        Command::Check => commands::check(Config::load(home).await?, mode)
            .await?
            .print(),
    };
    Ok(())
}

/// The environment named in the config file, or the default when there is no config yet.
async fn environment(home: &Path) -> Environment {
    match Config::load(home).await {
        Ok(config) => config.environment(),
        Err(_) => Environment::default(),
    }
}

/// Initializes the tracing subscriber. Logs go to stderr so that `serve` owns stdout.
pub fn init_logger(level: LevelFilter, environment: Environment) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use the given level for this crate only.
            let level = match environment {
                Environment::Prod => level.min(LevelFilter::INFO),
                Environment::Dev => level,
            };
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), level))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
