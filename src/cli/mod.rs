//! Command-line interface for nova-vault.
//!
//! Triggers for backup and restore jobs plus schedule generation.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod backup;
pub mod restore;
pub mod schedule;

/// nova-vault - logical backups of application records and media
#[derive(Parser)]
#[command(name = "nova-vault")]
#[command(about = "Scheduled and on-demand backups of application records and media")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (default: <config dir>/nova-vault/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging; failed restore retries show the full error
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create, run and prune backups
    Backup(backup::BackupArgs),
    /// Create and retry restores
    Restore(restore::RestoreArgs),
    /// Generate systemd timers for scheduled backup types
    Schedule(schedule::ScheduleArgs),
}
