//! # nova-vault
//!
//! Scheduled and on-demand logical backups of application records and the
//! media files they reference.
//!
//! ## Features
//!
//! - **Backup types**: named selections of record types with per-type field
//!   exclusions and retention limits
//! - **Media collection**: file-valued fields are resolved to storage paths and
//!   copied into the archive, tolerating missing files
//! - **Versioned archives**: `backup.json`, `media/` and a manifest in one zip,
//!   with a SHA-256 recorded on the job
//! - **Restore**: optional cleanup of existing records, upsert import and media
//!   write-back
//! - **Retention**: oldest completed backups beyond the limit are pruned after
//!   every successful run
//! - **Scheduling**: bounded-retry job queue and systemd timers per backup type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nova_vault::{Vault, VaultConfig};
//!
//! # fn main() -> nova_vault::Result<()> {
//! let vault = Vault::open(VaultConfig::load(None)?)?;
//! let report = vault.backups.run_synchronously("essential_data", None, None)?;
//! println!("Stored {}", report.storage_path);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod backup;
pub mod cli;
pub mod config;
pub mod datasource;
pub mod error;
pub mod filter;
pub mod jobs;
pub mod logging;
pub mod media;
pub mod record;
pub mod registry;
pub mod restore;
pub mod retention;
pub mod scanner;
pub mod scheduler;
pub mod storage;
pub mod tenant;
pub mod vault;

// Re-export commonly used types
pub use backup::{BackupEngine, BackupReport, EngineSettings};
pub use config::VaultConfig;
pub use datasource::{DataSource, JsonDirDataSource, ModelSchema};
pub use error::{Error, Result};
pub use jobs::{BackupJob, JobStore, JsonJobStore, RestoreJob};
pub use record::SerializedRecord;
pub use registry::{BackupTypeConfig, BackupTypeRegistry};
pub use restore::{RestoreEngine, RestoreReport};
pub use storage::{FileStorage, LocalFsStorage};
pub use tenant::TenantId;
pub use vault::Vault;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
