//! Backup command implementation.

use crate::backup::BackupReport;
use crate::jobs::BackupJob;
use crate::tenant::TenantId;
use crate::vault::Vault;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Arguments for the backup command
#[derive(Args)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupCommand,
}

#[derive(Subcommand)]
pub enum BackupCommand {
    /// Queue a backup job and wait for it, retrying transient failures
    Create {
        /// Backup type key
        #[arg(short = 't', long = "type", default_value = "all_models")]
        backup_type: String,

        /// Job name (default: "Backup <timestamp>")
        #[arg(short, long)]
        name: Option<String>,

        /// Tenant to back up (multi-tenant mode only)
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Run a backup immediately, without retries
    RunNow {
        #[arg(short = 't', long = "type", default_value = "all_models")]
        backup_type: String,

        #[arg(long)]
        tenant: Option<String>,

        /// Also copy the archive to this file or directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Create and run a scheduled backup of one type
    Scheduled {
        #[arg(short = 't', long = "type")]
        backup_type: String,
    },
    /// List backup jobs, newest first
    List {
        #[arg(short = 't', long = "type")]
        backup_type: Option<String>,
    },
    /// Apply the retention policy of one type
    Prune {
        #[arg(short = 't', long = "type")]
        backup_type: String,
    },
}

/// Run the backup command
pub async fn run(args: BackupArgs, vault: &Vault) -> Result<()> {
    match args.command {
        BackupCommand::Create {
            backup_type,
            name,
            tenant,
        } => {
            let job = vault
                .backups
                .create_job(name, &backup_type, tenant.map(TenantId::new))
                .context("failed to create backup job")?;
            println!("Created backup job {} ({})", job.id, job.name);
            wait_for(vault, job).await
        }
        BackupCommand::RunNow {
            backup_type,
            tenant,
            output,
        } => {
            let engine = vault.backups.clone();
            let tenant = tenant.map(TenantId::new);
            let report = tokio::task::spawn_blocking(move || {
                engine.run_synchronously(&backup_type, tenant, output.as_deref())
            })
            .await
            .context("backup worker failed")??;

            print_report(&report);
            Ok(())
        }
        BackupCommand::Scheduled { backup_type } => {
            let job = vault
                .backups
                .create_scheduled_job(&backup_type)
                .context("failed to create scheduled backup job")?;
            println!("Created backup job {} ({})", job.id, job.name);
            wait_for(vault, job).await
        }
        BackupCommand::List { backup_type } => {
            let jobs = vault.jobs.list_backups()?;
            let jobs: Vec<&BackupJob> = jobs
                .iter()
                .filter(|job| backup_type.as_deref().map_or(true, |t| job.backup_type == t))
                .collect();

            if jobs.is_empty() {
                println!("No backup jobs found.");
                return Ok(());
            }

            println!("{:<36}  {:<16}  {:<5}  {:<19}  {}", "ID", "TYPE", "DONE", "CREATED", "NAME");
            for job in jobs {
                println!(
                    "{:<36}  {:<16}  {:<5}  {:<19}  {}",
                    job.id,
                    job.backup_type,
                    job.done,
                    job.created_at.format("%Y-%m-%d %H:%M:%S"),
                    job.name
                );
            }
            Ok(())
        }
        BackupCommand::Prune { backup_type } => {
            let deleted = vault.backups.pruner().prune(&backup_type)?;
            println!("Pruned {} backups of type '{}'", deleted, backup_type);
            Ok(())
        }
    }
}

async fn wait_for(vault: &Vault, job: BackupJob) -> Result<()> {
    let outcome = vault
        .queue()
        .submit_backup(job.id)
        .await
        .context("backup worker failed")?;

    if !outcome.is_success() {
        println!("Backup job {} left pending (done = false)", job.id);
    }
    let report = outcome
        .into_result()
        .with_context(|| format!("backup job {} failed", job.id))?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &BackupReport) {
    println!("Backup completed successfully!");
    println!("  Job ID: {}", report.job_id);
    println!("  Type: {}", report.backup_type);
    println!("  Archive: {}", report.storage_path);
    println!("  SHA-256: {}", report.checksum);
    println!("  Records: {} ({} excluded field values)", report.records, report.removed_fields);
    println!(
        "  Media files: {} copied, {} missing",
        report.media.copied.len(),
        report.media.missing.len()
    );
    if report.pruned > 0 {
        println!("  Pruned old backups: {}", report.pruned);
    }
    if let Some(local_copy) = &report.local_copy {
        println!("  Local copy: {}", local_copy.display());
    }
}
