use clap::Parser;
use mocksync::cli::{Cli, Command};
use mocksync::config::{CliConfig, DEFAULT_LOG_LEVEL};
use mocksync::{commands, logging};
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref());

    let log_level = cli
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().and_then(|c| c.log_level.clone()))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    logging::init(&log_level);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Up(args) => commands::up(args, config, &log_level).await,
        Command::Proxy(args) => commands::proxy(args, config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
