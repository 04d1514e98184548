//! Restore command implementation.

use crate::restore::RestoreReport;
use crate::tenant::TenantId;
use crate::vault::Vault;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use uuid::Uuid;

/// Arguments for the restore command
#[derive(Args)]
pub struct RestoreArgs {
    #[command(subcommand)]
    pub command: RestoreCommand,
}

#[derive(Subcommand)]
pub enum RestoreCommand {
    /// Restore an archive, by storage path or by the backup job that made it
    Create {
        /// Storage path of the archive, e.g. backups/backup_all_models_20240101_030000.zip
        #[arg(long, conflicts_with = "backup", required_unless_present = "backup")]
        file: Option<String>,

        /// Backup job whose archive to restore
        #[arg(long)]
        backup: Option<Uuid>,

        /// Backup type whose import exclusions apply (default: the backup's type, else all_models)
        #[arg(short = 't', long = "type")]
        restore_type: Option<String>,

        /// Delete existing records of the restored models first
        #[arg(long)]
        cleanup: bool,

        /// Tenant to restore into (taken from the backup job with --backup)
        #[arg(long, conflicts_with = "backup")]
        tenant: Option<String>,

        #[arg(short, long)]
        name: Option<String>,
    },
    /// Re-run a restore job synchronously and report the first error
    Retry {
        /// Restore job id
        id: Uuid,
    },
    /// List restore jobs, newest first
    List,
}

/// Run the restore command
pub async fn run(args: RestoreArgs, vault: &Vault, verbose: bool) -> Result<()> {
    match args.command {
        RestoreCommand::Create {
            file,
            backup,
            restore_type,
            cleanup,
            tenant,
            name,
        } => {
            let job = match (backup, file) {
                (Some(backup_id), _) => {
                    let mut job = vault
                        .restores
                        .create_from_backup(&backup_id, cleanup)
                        .with_context(|| format!("failed to create restore from backup {}", backup_id))?;
                    if name.is_some() || restore_type.is_some() {
                        job.name = name.unwrap_or(job.name);
                        job.restore_type = restore_type.unwrap_or(job.restore_type);
                        vault.jobs.save_restore(&job)?;
                    }
                    job
                }
                (None, Some(file)) => vault
                    .restores
                    .create_job(
                        name,
                        &file,
                        restore_type.as_deref().unwrap_or("all_models"),
                        cleanup,
                        tenant.map(TenantId::new),
                    )
                    .context("failed to create restore job")?,
                (None, None) => anyhow::bail!("either --file or --backup is required"),
            };
            println!("Created restore job {} ({})", job.id, job.name);

            let outcome = vault
                .queue()
                .submit_restore(job.id)
                .await
                .context("restore worker failed")?;
            let report = outcome
                .into_result()
                .with_context(|| format!("restore job {} failed", job.id))?;

            print_report(&report);
            Ok(())
        }
        RestoreCommand::Retry { id } => match vault.queue().retry_restore(&id) {
            Ok(report) => {
                print_report(&report);
                Ok(())
            }
            Err(e) if verbose => Err(e.into()),
            Err(e) => {
                eprintln!("Error processing restore: {}", e);
                std::process::exit(1);
            }
        },
        RestoreCommand::List => {
            let jobs = vault.jobs.list_restores()?;
            if jobs.is_empty() {
                println!("No restore jobs found.");
                return Ok(());
            }

            println!("{:<36}  {:<16}  {:<5}  {:<7}  {}", "ID", "TYPE", "DONE", "CLEANUP", "FILE");
            for job in jobs {
                println!(
                    "{:<36}  {:<16}  {:<5}  {:<7}  {}",
                    job.id, job.restore_type, job.done, job.cleanup_existing_data, job.file
                );
            }
            Ok(())
        }
    }
}

fn print_report(report: &RestoreReport) {
    println!("Restore completed successfully!");
    println!("  Job ID: {}", report.job_id);
    println!("  Archive type: {}", report.archived_type);
    println!("  Records imported: {}", report.imported);
    if report.skipped > 0 {
        println!("  Records skipped: {}", report.skipped);
    }
    if report.cleared > 0 {
        println!("  Existing records cleared: {}", report.cleared);
    }
    println!("  Media files restored: {}", report.media_restored);
}
