//! nova-vault - backup and restore of application records and media
//!
//! Main binary entry point for the command-line interface.

use anyhow::{Context, Result};
use clap::Parser;
use nova_vault::cli::{self, Cli, Commands};
use nova_vault::logging::{init_file_logging, init_logging};
use nova_vault::{Vault, VaultConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.log_file {
        Some(log_file) => init_file_logging(log_file, cli.verbose)?,
        None => init_logging(cli.verbose)?,
    }

    let config = VaultConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Schedule(args) => cli::schedule::run(args, &config, cli.config.as_deref()).await,
        Commands::Backup(args) => {
            let vault = Vault::open(config).context("failed to open vault")?;
            cli::backup::run(args, &vault).await
        }
        Commands::Restore(args) => {
            let vault = Vault::open(config).context("failed to open vault")?;
            cli::restore::run(args, &vault, cli.verbose).await
        }
    }
}
