//! Schedule command implementation.

use crate::config::VaultConfig;
use crate::scheduler::{on_calendar, SystemdScheduler};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Arguments for the schedule command
#[derive(Args)]
pub struct ScheduleArgs {
    #[command(subcommand)]
    pub command: ScheduleCommand,
}

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// Show the configured schedule of every backup type
    Show,
    /// Write systemd service and timer units for scheduled backup types
    Generate {
        /// Directory receiving the systemd/ unit files
        #[arg(short, long)]
        output: PathBuf,

        /// nova-vault executable invoked by the units
        #[arg(long)]
        executable: Option<PathBuf>,
    },
}

/// Run the schedule command
pub async fn run(args: ScheduleArgs, config: &VaultConfig, config_path: Option<&Path>) -> Result<()> {
    let registry = config.registry();

    match args.command {
        ScheduleCommand::Show => {
            for backup_type in registry.iter() {
                let when = match &backup_type.schedule {
                    Some(schedule) if schedule.enabled => on_calendar(schedule)?,
                    Some(_) => "disabled".to_string(),
                    None => "not scheduled".to_string(),
                };
                println!("{:<20}  {:<24}  {}", backup_type.key, when, backup_type.display_name());
            }
            Ok(())
        }
        ScheduleCommand::Generate { output, executable } => {
            let mut scheduler = SystemdScheduler::new(&output);
            if let Some(executable) = &executable {
                scheduler = scheduler.with_executable(executable);
            }
            if let Some(config_path) = config_path {
                scheduler = scheduler.with_config(config_path);
            }

            let outputs = scheduler
                .generate(&registry)
                .await
                .context("failed to generate systemd units")?;

            if outputs.is_empty() {
                println!("No backup type has an enabled schedule.");
                return Ok(());
            }

            for output in outputs {
                println!("Generated systemd units for '{}':", output.backup_type);
                println!("  Service: {}", output.service_path.display());
                println!("  Timer: {}", output.timer_path.display());
                println!();
                println!("To install and enable:");
                for command in &output.install_commands {
                    println!("  {}", command);
                }
                println!();
            }
            Ok(())
        }
    }
}
