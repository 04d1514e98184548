//! Persistent backup and restore job records

use crate::tenant::TenantId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;
use uuid::Uuid;

/// One backup execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: Uuid,
    pub name: String,
    /// Backup-type key
    #[serde(rename = "type")]
    pub backup_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantId>,
    /// Storage path of the archive
    #[serde(default)]
    pub file: Option<String>,
    /// SHA-256 of the archive, hex encoded
    #[serde(default)]
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub done: bool,
}

impl BackupJob {
    /// A pending job; unnamed jobs are called `Backup <timestamp>`
    pub fn new(name: Option<String>, backup_type: &str, tenant: Option<TenantId>) -> Self {
        let created_at = Utc::now();
        let name = match name {
            Some(name) if !name.trim().is_empty() => name,
            _ => format!("Backup {}", created_at.format("%Y-%m-%d %H:%M:%S")),
        };

        Self {
            id: Uuid::new_v4(),
            name,
            backup_type: backup_type.to_string(),
            tenant,
            file: None,
            checksum: None,
            created_at,
            started_at: None,
            finished_at: None,
            done: false,
        }
    }
}

/// One restore execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreJob {
    pub id: Uuid,
    pub name: String,
    /// Storage path of the archive to restore
    pub file: String,
    /// Job that produced the archive, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantId>,
    /// Backup-type key selecting which models are imported
    #[serde(rename = "type")]
    pub restore_type: String,
    #[serde(default)]
    pub cleanup_existing_data: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub done: bool,
}

impl RestoreJob {
    /// A pending restore; unnamed restores are called `Restore <timestamp>`
    pub fn new(
        name: Option<String>,
        file: &str,
        restore_type: &str,
        cleanup_existing_data: bool,
        tenant: Option<TenantId>,
    ) -> Self {
        let created_at = Utc::now();
        let name = match name {
            Some(name) if !name.trim().is_empty() => name,
            _ => format!("Restore {}", created_at.format("%Y-%m-%d %H:%M:%S")),
        };

        Self {
            id: Uuid::new_v4(),
            name,
            file: file.to_string(),
            backup: None,
            tenant,
            restore_type: restore_type.to_string(),
            cleanup_existing_data,
            created_at,
            started_at: None,
            finished_at: None,
            done: false,
        }
    }

    /// Restore the archive produced by `job`
    pub fn from_backup(job: &BackupJob, cleanup_existing_data: bool) -> Result<Self> {
        let file = job.file.as_deref().ok_or_else(|| Error::InvalidArchive {
            reason: format!("backup {} has no archive", job.id),
        })?;
        let mut restore = Self::new(None, file, &job.backup_type, cleanup_existing_data, job.tenant.clone());
        restore.backup = Some(job.id);
        Ok(restore)
    }
}

/// Metadata store for job records
pub trait JobStore: Send + Sync {
    /// Insert or update
    fn save_backup(&self, job: &BackupJob) -> Result<()>;
    fn get_backup(&self, id: &Uuid) -> Result<BackupJob>;
    fn delete_backup(&self, id: &Uuid) -> Result<()>;
    /// All backup jobs, newest first
    fn list_backups(&self) -> Result<Vec<BackupJob>>;

    /// Completed backups of one type, newest first
    fn completed_backups(&self, backup_type: &str) -> Result<Vec<BackupJob>> {
        Ok(self
            .list_backups()?
            .into_iter()
            .filter(|job| job.done && job.backup_type == backup_type)
            .collect())
    }

    fn save_restore(&self, job: &RestoreJob) -> Result<()>;
    fn get_restore(&self, id: &Uuid) -> Result<RestoreJob>;
    /// All restore jobs, newest first
    fn list_restores(&self) -> Result<Vec<RestoreJob>>;
}

/// One JSON file per job under `backups/` and `restores/`
#[derive(Debug)]
pub struct JsonJobStore {
    backups_path: PathBuf,
    restores_path: PathBuf,
}

impl JsonJobStore {
    pub fn new<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        let root_path = root_path.as_ref();
        let backups_path = root_path.join("backups");
        let restores_path = root_path.join("restores");

        fs::create_dir_all(&backups_path)?;
        fs::create_dir_all(&restores_path)?;

        Ok(Self {
            backups_path,
            restores_path,
        })
    }

    fn record_path(dir: &Path, id: &Uuid) -> PathBuf {
        dir.join(format!("{}.json", id))
    }

    fn write_record<T: Serialize>(dir: &Path, id: &Uuid, record: &T) -> Result<()> {
        let path = Self::record_path(dir, id);
        let mut staged = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(staged.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, record)?;
            writer.flush()?;
        }
        staged.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn read_record<T: DeserializeOwned>(dir: &Path, id: &Uuid) -> Result<T> {
        let file = match File::open(Self::record_path(dir, id)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::JobNotFound { id: *id }),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
        let mut records = Vec::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            let file = File::open(&path)?;
            match serde_json::from_reader(BufReader::new(file)) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable job record {}: {}", path.display(), e),
            }
        }

        Ok(records)
    }
}

impl JobStore for JsonJobStore {
    fn save_backup(&self, job: &BackupJob) -> Result<()> {
        Self::write_record(&self.backups_path, &job.id, job)
    }

    fn get_backup(&self, id: &Uuid) -> Result<BackupJob> {
        Self::read_record(&self.backups_path, id)
    }

    fn delete_backup(&self, id: &Uuid) -> Result<()> {
        match fs::remove_file(Self::record_path(&self.backups_path, id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::JobNotFound { id: *id }),
            Err(e) => Err(e.into()),
        }
    }

    fn list_backups(&self) -> Result<Vec<BackupJob>> {
        let mut jobs: Vec<BackupJob> = Self::read_all(&self.backups_path)?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(jobs)
    }

    fn save_restore(&self, job: &RestoreJob) -> Result<()> {
        Self::write_record(&self.restores_path, &job.id, job)
    }

    fn get_restore(&self, id: &Uuid) -> Result<RestoreJob> {
        Self::read_record(&self.restores_path, id)
    }

    fn list_restores(&self) -> Result<Vec<RestoreJob>> {
        let mut jobs: Vec<RestoreJob> = Self::read_all(&self.restores_path)?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(jobs)
    }
}
