mod cli;
mod commands;

use std::process::ExitCode;

use anyhow::{Context, Result};
use blockwatch_chain::ChainError;
use blockwatch_core::{ConfigError, WatchConfig, logging};
use clap::Parser;
use tracing::{debug, error};

use crate::cli::Cli;
use crate::commands::AppContext;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn load_config(cli: &Cli) -> Result<WatchConfig, ConfigError> {
    let config = match &cli.config {
        Some(path) => WatchConfig::load_from_path(path)?,
        None => WatchConfig::load()?,
    };
    config.validate()?;
    Ok(config)
}

/// Finds a user-facing hint anywhere in the error chain.
fn config_hint(err: &anyhow::Error) -> Option<String> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<ConfigError>() {
            return e.hint();
        }
        match cause.downcast_ref::<ChainError>() {
            Some(ChainError::Config(e)) => e.hint(),
            Some(ChainError::UnknownNetwork(_)) => {
                Some("add a [networks.<name>] table to the config file".into())
            }
            _ => None,
        }
    })
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli).context("Failed to load configuration")?;

    let filter = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.clone());
    let _log_guard = match &cli.log_dir {
        Some(dir) => Some(logging::init_logging_to_dir(dir, &filter)?),
        None => {
            logging::init_logging(&filter)?;
            None
        }
    };
    debug!("blockwatch v{VERSION}");

    let ctx = AppContext::new(config, cli.network, cli.rpc_url)?;
    commands::run(ctx, cli.command).await
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine; variables may come from the shell.
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            if let Some(hint) = config_hint(&e) {
                eprintln!("Hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_found_through_chain_error() {
        let err = anyhow::Error::new(ChainError::Config(ConfigError::MissingEnv {
            var: "INFURA_KEY".into(),
            network: "goerli".into(),
        }))
        .context("Cannot use network goerli");
        assert!(config_hint(&err).unwrap().contains("INFURA_KEY"));
    }

    #[test]
    fn no_hint_for_transport_errors() {
        let err = anyhow::Error::new(ChainError::Transport("connection refused".into()));
        assert!(config_hint(&err).is_none());
    }

    #[test]
    fn explicit_config_path_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_network = \"localhost\"\n").unwrap();
        let cli = Cli::try_parse_from([
            "blockwatch",
            "--config",
            path.to_str().unwrap(),
            "block-number",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.default_network, "localhost");
    }
}
