//! Restore job orchestration

use crate::archive::{sha256_reader, ArchiveReader};
use crate::backup::EngineSettings;
use crate::datasource::DataSource;
use crate::jobs::{JobStore, RestoreJob};
use crate::record::{models_in, SerializedRecord};
use crate::registry::BackupTypeRegistry;
use crate::storage::FileStorage;
use crate::tenant::{ScopedTenant, TenantId, TenantScope};
use crate::{Error, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, Seek, SeekFrom};
use std::sync::Arc;
use tracing::{debug, info, span, warn, Level};
use uuid::Uuid;

/// Summary of one successful restore
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub job_id: Uuid,
    /// Backup type recorded in the archive manifest
    pub archived_type: String,
    pub imported: usize,
    /// Records of models excluded from import for this restore type
    pub skipped: usize,
    /// Pre-existing records removed before import
    pub cleared: usize,
    pub media_restored: usize,
}

/// Runs restore jobs against the configured collaborators
#[derive(Clone)]
pub struct RestoreEngine {
    registry: Arc<BackupTypeRegistry>,
    data_source: Arc<dyn DataSource>,
    storage: Arc<dyn FileStorage>,
    jobs: Arc<dyn JobStore>,
    tenant_scope: Arc<dyn TenantScope>,
    settings: EngineSettings,
}

impl RestoreEngine {
    pub fn new(
        registry: Arc<BackupTypeRegistry>,
        data_source: Arc<dyn DataSource>,
        storage: Arc<dyn FileStorage>,
        jobs: Arc<dyn JobStore>,
        tenant_scope: Arc<dyn TenantScope>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            data_source,
            storage,
            jobs,
            tenant_scope,
            settings,
        }
    }

    /// Record a pending restore of the archive at storage path `file`
    pub fn create_job(
        &self,
        name: Option<String>,
        file: &str,
        restore_type: &str,
        cleanup_existing_data: bool,
        tenant: Option<TenantId>,
    ) -> Result<RestoreJob> {
        self.settings.check_tenant(tenant.as_ref())?;

        let job = RestoreJob::new(name, file, restore_type, cleanup_existing_data, tenant);
        self.jobs.save_restore(&job)?;
        info!("Created restore job {} ({})", job.id, job.name);
        Ok(job)
    }

    /// Record a pending restore of the archive a backup job produced
    pub fn create_from_backup(&self, backup_id: &Uuid, cleanup_existing_data: bool) -> Result<RestoreJob> {
        let backup = self.jobs.get_backup(backup_id)?;
        if !backup.done {
            return Err(Error::InvalidArchive {
                reason: format!("backup {} has not completed", backup.id),
            });
        }

        let job = RestoreJob::from_backup(&backup, cleanup_existing_data)?;
        self.jobs.save_restore(&job)?;
        info!("Created restore job {} from backup {}", job.id, backup.id);
        Ok(job)
    }

    /// Run a restore job. Errors are returned unchanged and never retried here.
    pub fn run(&self, job_id: &Uuid) -> Result<RestoreReport> {
        let span = span!(Level::INFO, "restore_job", id = %job_id);
        let _enter = span.enter();

        let mut job = self.jobs.get_restore(job_id)?;
        let _tenant = ScopedTenant::enter(self.tenant_scope.as_ref(), job.tenant.as_ref())?;

        job.started_at = Some(Utc::now());
        job.finished_at = None;
        job.done = false;
        self.jobs.save_restore(&job)?;
        info!("Starting restore '{}' from {}", job.name, job.file);

        let report = self.execute(&job)?;

        job.finished_at = Some(Utc::now());
        job.done = true;
        self.jobs.save_restore(&job)?;

        info!(
            "Restore completed: {} records imported, {} skipped, {} media files",
            report.imported, report.skipped, report.media_restored
        );
        Ok(report)
    }

    fn execute(&self, job: &RestoreJob) -> Result<RestoreReport> {
        let tenant = job.tenant.as_ref();
        let spool = self.spool_archive(job)?;

        let mut archive = ArchiveReader::open(BufReader::new(spool))?;
        let archived_type = archive.manifest().backup_type.clone();
        if archived_type != job.restore_type {
            debug!(
                "Archive was made by a '{}' backup, restoring as '{}'",
                archived_type, job.restore_type
            );
        }

        let excluded = self.registry.excluded_import_models_for(&job.restore_type);
        let (records, skipped): (Vec<SerializedRecord>, Vec<SerializedRecord>) = archive
            .records()?
            .into_iter()
            .partition(|record| !excluded.contains(&record.model));
        if !skipped.is_empty() {
            info!("Skipping {} records of models excluded from import", skipped.len());
        }

        let cleared = if job.cleanup_existing_data {
            let models = models_in(&records);
            let cleared = self.data_source.clear(&models, tenant)?;
            info!("Cleared {} existing records from {} models", cleared, models.len());
            cleared
        } else {
            0
        };

        let imported = self.data_source.import(&records, tenant)?;

        let mut media_restored = 0;
        for path in archive.media_paths()? {
            let mut entry = archive.media_entry(&path)?;
            self.storage.write(&path, &mut entry)?;
            debug!("Restored media file {}", path);
            media_restored += 1;
        }

        Ok(RestoreReport {
            job_id: job.id,
            archived_type,
            imported,
            skipped: skipped.len(),
            cleared,
            media_restored,
        })
    }

    /// Copy the archive out of storage into a seekable temp file, verifying its
    /// checksum when the originating backup recorded one
    fn spool_archive(&self, job: &RestoreJob) -> Result<File> {
        if !self.storage.exists(&job.file)? {
            return Err(Error::InvalidArchive {
                reason: format!("archive {} not found in storage", job.file),
            });
        }

        let mut spool = tempfile::tempfile()?;
        io::copy(&mut self.storage.open_read(&job.file)?, &mut spool)?;
        spool.seek(SeekFrom::Start(0))?;

        if let Some(expected) = self.expected_checksum(job)? {
            let actual = sha256_reader(&mut spool)?;
            if actual != expected {
                return Err(Error::IntegrityError {
                    reason: format!("archive {} has checksum {}, expected {}", job.file, actual, expected),
                });
            }
            spool.seek(SeekFrom::Start(0))?;
            debug!("Archive checksum verified");
        }

        Ok(spool)
    }

    fn expected_checksum(&self, job: &RestoreJob) -> Result<Option<String>> {
        let Some(backup_id) = job.backup else {
            return Ok(None);
        };

        match self.jobs.get_backup(&backup_id) {
            Ok(backup) if backup.file.as_deref() == Some(job.file.as_str()) => Ok(backup.checksum),
            Ok(_) => {
                warn!("Backup {} no longer points at {}, skipping verification", backup_id, job.file);
                Ok(None)
            }
            Err(Error::JobNotFound { .. }) => {
                debug!("Backup {} was pruned, skipping verification", backup_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupEngine;
    use crate::datasource::{JsonDirDataSource, ModelSchema};
    use crate::jobs::JsonJobStore;
    use crate::registry::BackupTypeConfig;
    use crate::storage::LocalFsStorage;
    use crate::tenant::scope_for;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map, Value};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        storage: Arc<LocalFsStorage>,
        data_source: Arc<JsonDirDataSource>,
        backups: BackupEngine,
        restores: RestoreEngine,
    }

    fn record(model: &str, pk: i64, fields: Value) -> SerializedRecord {
        let fields: Map<String, Value> = serde_json::from_value(fields).unwrap();
        SerializedRecord::new(model, Some(json!(pk)), fields)
    }

    fn fixture() -> Result<Fixture> {
        let temp_dir = TempDir::new()?;
        let storage = Arc::new(LocalFsStorage::new(temp_dir.path().join("storage"))?);
        let data_source = Arc::new(JsonDirDataSource::create(
            temp_dir.path().join("data"),
            vec![
                ModelSchema::new("app.category", &[]),
                ModelSchema::new("app.widget", &["file_field"]),
            ],
        )?);
        let jobs = Arc::new(JsonJobStore::new(temp_dir.path().join("jobs"))?);

        let types: BTreeMap<String, BackupTypeConfig> = serde_yaml::from_str(
            r#"
all_models:
  models: "*"
widgets_only:
  models: "*"
  exclude_models_from_import: [app.category]
"#,
        )?;
        let registry = Arc::new(BackupTypeRegistry::new(types, 30));
        let scope = scope_for(false);
        let settings = EngineSettings::default();

        let backups = BackupEngine::new(
            registry.clone(),
            data_source.clone(),
            storage.clone(),
            jobs.clone(),
            scope.clone(),
            settings.clone(),
        );
        let restores = RestoreEngine::new(registry, data_source.clone(), storage.clone(), jobs, scope, settings);

        Ok(Fixture {
            _temp_dir: temp_dir,
            storage,
            data_source,
            backups,
            restores,
        })
    }

    fn seed(fixture: &Fixture) -> Result<Uuid> {
        fixture.storage.write("uploads/a.png", &mut &b"png-bytes"[..])?;
        fixture.data_source.import(
            &[
                record("app.category", 1, json!({"label": "tools"})),
                record("app.widget", 1, json!({"title": "a", "file_field": "uploads/a.png"})),
            ],
            None,
        )?;
        let job = fixture.backups.create_job(None, "all_models", None)?;
        fixture.backups.run(&job.id)?;
        Ok(job.id)
    }

    #[test]
    fn test_cleanup_then_import() -> Result<()> {
        let fixture = fixture()?;
        let backup_id = seed(&fixture)?;

        fixture
            .data_source
            .import(&[record("app.widget", 2, json!({"title": "added later"}))], None)?;
        fixture.storage.delete("uploads/a.png")?;

        let job = fixture.restores.create_from_backup(&backup_id, true)?;
        let report = fixture.restores.run(&job.id)?;
        assert_eq!(report.imported, 2);
        assert_eq!(report.cleared, 3);
        assert_eq!(report.media_restored, 1);

        let widgets = fixture.data_source.export(&["app.widget".to_string()], None)?;
        assert_eq!(widgets.len(), 1);
        assert_eq!(io::read_to_string(fixture.storage.open_read("uploads/a.png")?)?, "png-bytes");

        let stored = fixture.restores.jobs.get_restore(&job.id)?;
        assert!(stored.done);
        assert!(stored.finished_at >= stored.started_at);
        Ok(())
    }

    #[test]
    fn test_excluded_models_are_not_imported() -> Result<()> {
        let fixture = fixture()?;
        let backup_id = seed(&fixture)?;
        let backup = fixture.backups.jobs().get_backup(&backup_id)?;
        let file = backup.file.unwrap_or_default();

        fixture.data_source.clear(&fixture.data_source.models(), None)?;
        let job = fixture.restores.create_job(None, &file, "widgets_only", false, None)?;
        let report = fixture.restores.run(&job.id)?;

        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 1);
        assert!(fixture
            .data_source
            .export(&["app.category".to_string()], None)?
            .is_empty());
        Ok(())
    }

    #[test]
    fn test_tampered_archive_fails_integrity() -> Result<()> {
        let fixture = fixture()?;
        let backup_id = seed(&fixture)?;
        let backup = fixture.backups.jobs().get_backup(&backup_id)?;
        let file = backup.file.unwrap_or_default();

        let mut bytes = std::fs::read(fixture.storage.resolve(&file)?)?;
        bytes.push(0);
        fixture.storage.write(&file, &mut bytes.as_slice())?;

        let job = fixture.restores.create_from_backup(&backup_id, false)?;
        let err = fixture.restores.run(&job.id).unwrap_err();
        assert!(matches!(err, Error::IntegrityError { .. }));
        assert!(!err.is_retryable());
        assert!(!fixture.restores.jobs.get_restore(&job.id)?.done);
        Ok(())
    }

    #[test]
    fn test_missing_archive_is_structural() -> Result<()> {
        let fixture = fixture()?;
        let job = fixture
            .restores
            .create_job(None, "backups/nope.zip", "all_models", false, None)?;
        let err = fixture.restores.run(&job.id).unwrap_err();
        assert!(matches!(err, Error::InvalidArchive { .. }));
        Ok(())
    }
}
