//! Backup job orchestration.
//!
//! One run resolves the backup type, exports and filters records, collects the
//! media they reference, packages everything into an archive, stores it and
//! finally prunes old backups of the same type. Steps run strictly in order
//! inside the calling thread; a retry re-runs the whole sequence.

use crate::archive::{build_archive, sha256_file, BACKUP_JSON};
use crate::datasource::DataSource;
use crate::filter::filter_excluded_fields;
use crate::jobs::{BackupJob, JobStore};
use crate::media::{copy_media_files, MediaCopyResult};
use crate::record::write_fixture;
use crate::registry::{BackupTypeRegistry, ModelSelection};
use crate::retention::RetentionPruner;
use crate::scanner::MediaScanner;
use crate::storage::FileStorage;
use crate::tenant::{ScopedTenant, TenantId, TenantScope};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, span, warn, Level};
use uuid::Uuid;

/// Storage directory for archives
pub const ARCHIVE_DIR: &str = "backups";

/// Settings shared by the backup and restore engines
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Public media prefix stripped from file references, e.g. `/media/`
    pub media_url: String,
    /// Whether jobs may carry a tenant
    pub multi_tenant: bool,
    /// Parent directory for staging areas; the system temp dir when unset
    pub staging_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            media_url: "/media/".to_string(),
            multi_tenant: false,
            staging_dir: None,
        }
    }
}

impl EngineSettings {
    pub(crate) fn check_tenant(&self, tenant: Option<&TenantId>) -> Result<()> {
        match tenant {
            Some(tenant) if !self.multi_tenant => Err(Error::Configuration {
                reason: format!("tenant {} given but multi-tenant mode is disabled", tenant),
            }),
            Some(tenant) => tenant.validate(),
            None => Ok(()),
        }
    }
}

/// Summary of one successful backup run
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub job_id: Uuid,
    pub backup_type: String,
    /// Storage path of the archive
    pub storage_path: String,
    pub checksum: String,
    pub records: usize,
    pub removed_fields: usize,
    pub media: MediaCopyResult,
    /// Old backups deleted by retention
    pub pruned: usize,
    /// Extra copy written for the synchronous variant
    pub local_copy: Option<PathBuf>,
}

/// Runs backup jobs against the configured collaborators
#[derive(Clone)]
pub struct BackupEngine {
    registry: Arc<BackupTypeRegistry>,
    data_source: Arc<dyn DataSource>,
    storage: Arc<dyn FileStorage>,
    jobs: Arc<dyn JobStore>,
    tenant_scope: Arc<dyn TenantScope>,
    settings: EngineSettings,
}

impl BackupEngine {
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

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn registry(&self) -> &Arc<BackupTypeRegistry> {
        &self.registry
    }

    pub fn pruner(&self) -> RetentionPruner {
        RetentionPruner::new(self.registry.clone(), self.jobs.clone(), self.storage.clone())
    }

    /// Record a pending backup job
    pub fn create_job(
        &self,
        name: Option<String>,
        backup_type: &str,
        tenant: Option<TenantId>,
    ) -> Result<BackupJob> {
        self.settings.check_tenant(tenant.as_ref())?;
        if !self.registry.contains(backup_type) {
            warn!("Backup type '{}' is not configured, all models will be exported", backup_type);
        }

        let job = BackupJob::new(name, backup_type, tenant);
        self.jobs.save_backup(&job)?;
        info!("Created backup job {} ({})", job.id, job.name);
        Ok(job)
    }

    /// Record a pending job named after the type's display name and today's date
    pub fn create_scheduled_job(&self, backup_type: &str) -> Result<BackupJob> {
        let config = self.registry.resolve(backup_type);
        let name = format!(
            "Scheduled {} Backup {}",
            config.display_name(),
            Utc::now().format("%Y-%m-%d")
        );
        self.create_job(Some(name), backup_type, None)
    }

    /// Run a pending job; this is the unit of work the queue retries
    pub fn run(&self, job_id: &Uuid) -> Result<BackupReport> {
        self.run_job(job_id, None)
    }

    /// Create and run a job immediately, without queueing or retries.
    ///
    /// When `output` is given the archive is also copied there; a directory
    /// receives `<archive name>.zip`.
    pub fn run_synchronously(
        &self,
        backup_type: &str,
        tenant: Option<TenantId>,
        output: Option<&Path>,
    ) -> Result<BackupReport> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let name = match &tenant {
            Some(tenant) => format!("Synchronous Backup - Tenant {} - {} - {}", tenant, backup_type, stamp),
            None => format!("Synchronous Backup - {} - {}", backup_type, stamp),
        };

        let job = self.create_job(Some(name), backup_type, tenant)?;
        self.run_job(&job.id, output)
    }

    fn run_job(&self, job_id: &Uuid, output: Option<&Path>) -> Result<BackupReport> {
        let span = span!(Level::INFO, "backup_job", id = %job_id);
        let _enter = span.enter();

        let mut job = self.jobs.get_backup(job_id)?;
        self.settings.check_tenant(job.tenant.as_ref())?;
        let _tenant = ScopedTenant::enter(self.tenant_scope.as_ref(), job.tenant.as_ref())?;

        job.started_at = Some(Utc::now());
        job.finished_at = None;
        self.jobs.save_backup(&job)?;
        info!("Starting backup '{}' of type '{}'", job.name, job.backup_type);

        let mut report = self.execute(&mut job, output)?;

        // The new job is committed, so it is part of the snapshot the pruner sees
        report.pruned = match self.pruner().prune(&job.backup_type) {
            Ok(pruned) => pruned,
            Err(e) => {
                warn!("Retention pruning for '{}' failed: {}", job.backup_type, e);
                0
            }
        };

        info!(
            "Backup completed: {} records, {} media files ({} missing) -> {}",
            report.records,
            report.media.copied.len(),
            report.media.missing.len(),
            report.storage_path
        );
        Ok(report)
    }

    fn execute(&self, job: &mut BackupJob, output: Option<&Path>) -> Result<BackupReport> {
        let config = self.registry.resolve(&job.backup_type);
        let models = match &config.models {
            ModelSelection::All => self.data_source.models(),
            ModelSelection::Only(models) => models.clone(),
        };

        let records = self.data_source.export(&models, job.tenant.as_ref())?;
        debug!("Exported {} records from {} models", records.len(), models.len());

        let filtered = filter_excluded_fields(records, &config.exclude_fields);

        let staging = self.staging_area()?;
        let json_path = staging.path().join(BACKUP_JSON);
        write_fixture(&json_path, &filtered.records)?;

        let schema = self.data_source.media_schema();
        let media_files = MediaScanner::new(&schema, &self.settings.media_url).scan(&filtered.records);
        let media = copy_media_files(self.storage.as_ref(), &media_files, staging.path())?;
        if !media.missing.is_empty() {
            warn!("{} referenced media files could not be copied", media.missing.len());
        }

        let finished_at = Utc::now();
        let name = archive_name(job.tenant.as_ref(), &job.backup_type, finished_at);
        let archive_path = build_archive(&json_path, staging.path(), &name, &job.backup_type)?;
        let checksum = sha256_file(&archive_path)?;

        let local_copy = match output {
            Some(target) => Some(copy_to_output(&archive_path, target)?),
            None => None,
        };

        let storage_path = self.available_path(&name)?;
        let written = self.storage.write(&storage_path, &mut File::open(&archive_path)?)?;
        debug!("Stored {} bytes at {}", written, storage_path);

        job.file = Some(storage_path.clone());
        job.checksum = Some(checksum.clone());
        job.finished_at = Some(finished_at);
        job.done = true;
        if let Err(e) = self.jobs.save_backup(job) {
            // Nothing references the archive yet, so retention could never reclaim it
            if let Err(delete_err) = self.storage.delete(&storage_path) {
                warn!("Could not remove unrecorded archive {}: {}", storage_path, delete_err);
            }
            job.file = None;
            job.checksum = None;
            job.done = false;
            return Err(e);
        }

        Ok(BackupReport {
            job_id: job.id,
            backup_type: job.backup_type.clone(),
            storage_path,
            checksum,
            records: filtered.records.len(),
            removed_fields: filtered.removed_fields,
            media,
            pruned: 0,
            local_copy,
        })
    }

    fn staging_area(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("nova-vault-");

        match &self.settings.staging_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Ok(builder.tempdir_in(dir)?)
            }
            None => Ok(builder.tempdir()?),
        }
    }

    /// `backups/<name>.zip`, or a suffixed variant when that path is taken
    fn available_path(&self, name: &str) -> Result<String> {
        let path = format!("{}/{}.zip", ARCHIVE_DIR, name);
        if !self.storage.exists(&path)? {
            return Ok(path);
        }

        loop {
            let suffix = Uuid::new_v4().simple().to_string();
            let candidate = format!("{}/{}_{}.zip", ARCHIVE_DIR, name, &suffix[..7]);
            if !self.storage.exists(&candidate)? {
                return Ok(candidate);
            }
        }
    }
}

/// `backup_[<tenant>_]<type>_<YYYYMMDD_HHMMSS>`
pub fn archive_name(tenant: Option<&TenantId>, backup_type: &str, at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y%m%d_%H%M%S");
    match tenant {
        Some(tenant) => format!("backup_{}_{}_{}", tenant, backup_type, stamp),
        None => format!("backup_{}_{}", backup_type, stamp),
    }
}

fn copy_to_output(archive_path: &Path, target: &Path) -> Result<PathBuf> {
    let destination = if target.is_dir() {
        match archive_path.file_name() {
            Some(file_name) => target.join(file_name),
            None => target.to_path_buf(),
        }
    } else {
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        target.to_path_buf()
    };

    fs::copy(archive_path, &destination)?;
    info!("Copied archive to {}", destination.display());
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveReader;
    use crate::datasource::{JsonDirDataSource, ModelSchema};
    use crate::jobs::JsonJobStore;
    use crate::record::SerializedRecord;
    use crate::registry::BackupTypeConfig;
    use crate::storage::LocalFsStorage;
    use crate::tenant::scope_for;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map, Value};
    use std::collections::BTreeMap;

    struct Fixture {
        temp_dir: TempDir,
        storage: Arc<LocalFsStorage>,
        data_source: Arc<JsonDirDataSource>,
        engine: BackupEngine,
    }

    fn record(model: &str, pk: i64, fields: Value) -> SerializedRecord {
        let fields: Map<String, Value> = serde_json::from_value(fields).unwrap();
        SerializedRecord::new(model, Some(json!(pk)), fields)
    }

    fn fixture(multi_tenant: bool) -> Result<Fixture> {
        let temp_dir = TempDir::new()?;
        let storage = Arc::new(LocalFsStorage::new(temp_dir.path().join("storage"))?);
        let data_source = Arc::new(JsonDirDataSource::create(
            temp_dir.path().join("data"),
            vec![ModelSchema::new("app.widget", &["file_field"])],
        )?);
        let jobs = Arc::new(JsonJobStore::new(temp_dir.path().join("jobs"))?);

        let types: BTreeMap<String, BackupTypeConfig> = serde_yaml::from_str(
            r#"
essential_data:
  models: [app.widget]
  exclude_fields:
    app.widget: [secret]
broken:
  models: [app.missing]
"#,
        )?;
        let registry = Arc::new(BackupTypeRegistry::new(types, 30));

        let settings = EngineSettings {
            multi_tenant,
            staging_dir: Some(temp_dir.path().join("staging")),
            ..Default::default()
        };
        let engine = BackupEngine::new(
            registry,
            data_source.clone(),
            storage.clone(),
            jobs,
            scope_for(multi_tenant),
            settings,
        );

        Ok(Fixture {
            temp_dir,
            storage,
            data_source,
            engine,
        })
    }

    #[test]
    fn test_archive_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 4, 5, 6).unwrap();
        assert_eq!(archive_name(None, "essential_data", at), "backup_essential_data_20240309_040506");
        assert_eq!(
            archive_name(Some(&TenantId::new("acme")), "essential_data", at),
            "backup_acme_essential_data_20240309_040506"
        );
    }

    #[test]
    fn test_run_completes_job() -> Result<()> {
        let fixture = fixture(false)?;
        fixture.storage.write("uploads/a.png", &mut &b"png"[..])?;
        fixture.data_source.import(
            &[record(
                "app.widget",
                1,
                json!({"title": "a", "secret": "s", "file_field": "/media/uploads/a.png"}),
            )],
            None,
        )?;

        let job = fixture.engine.create_job(None, "essential_data", None)?;
        let report = fixture.engine.run(&job.id)?;

        let stored = fixture.engine.jobs().get_backup(&job.id)?;
        assert!(stored.done);
        assert_eq!(stored.file.as_deref(), Some(report.storage_path.as_str()));
        assert_eq!(stored.checksum.as_deref(), Some(report.checksum.as_str()));
        assert!(stored.finished_at >= stored.started_at);
        assert!(report.storage_path.starts_with("backups/backup_essential_data_"));
        assert_eq!(report.media.copied, vec!["uploads/a.png".to_string()]);
        assert_eq!(report.removed_fields, 1);

        let mut reader = ArchiveReader::open(File::open(fixture.storage.resolve(&report.storage_path)?)?)?;
        let records = reader.records()?;
        assert_eq!(records.len(), 1);
        assert!(records[0].field("secret").is_none());
        assert_eq!(reader.media_paths()?, vec!["uploads/a.png".to_string()]);
        Ok(())
    }

    #[test]
    fn test_failed_run_leaves_job_pending() -> Result<()> {
        let fixture = fixture(false)?;
        let job = fixture.engine.create_job(None, "broken", None)?;

        let err = fixture.engine.run(&job.id).unwrap_err();
        assert!(!err.is_retryable());

        let stored = fixture.engine.jobs().get_backup(&job.id)?;
        assert!(!stored.done);
        assert!(stored.file.is_none());
        Ok(())
    }

    #[test]
    fn test_synchronous_variant_copies_output() -> Result<()> {
        let fixture = fixture(true)?;
        let acme = TenantId::new("acme");
        fixture
            .data_source
            .import(&[record("app.widget", 1, json!({"title": "a"}))], Some(&acme))?;

        let output = fixture.temp_dir.path().join("out");
        fs::create_dir_all(&output)?;
        let report = fixture
            .engine
            .run_synchronously("essential_data", Some(acme), Some(&output))?;

        let job = fixture.engine.jobs().get_backup(&report.job_id)?;
        assert!(job.name.starts_with("Synchronous Backup - Tenant acme - essential_data - "));
        assert!(report.storage_path.starts_with("backups/backup_acme_essential_data_"));

        let local = report.local_copy.clone().unwrap();
        assert_eq!(local.parent(), Some(output.as_path()));
        assert_eq!(sha256_file(&local)?, report.checksum);
        Ok(())
    }

    #[test]
    fn test_tenant_requires_multi_tenant_mode() -> Result<()> {
        let fixture = fixture(false)?;
        let result = fixture
            .engine
            .create_job(None, "essential_data", Some(TenantId::new("acme")));
        assert!(matches!(result, Err(Error::Configuration { .. })));
        Ok(())
    }

    #[test]
    fn test_scheduled_job_name_and_unknown_type() -> Result<()> {
        let fixture = fixture(false)?;
        let job = fixture.engine.create_scheduled_job("essential_data")?;
        assert!(job.name.starts_with("Scheduled Essential Data Backup "));

        let job = fixture.engine.create_job(None, "not_configured", None)?;
        let report = fixture.engine.run(&job.id)?;
        assert_eq!(report.records, 0);
        Ok(())
    }

    /// Job store that refuses to record a finished backup
    struct RejectsCompletion(JsonJobStore);

    impl JobStore for RejectsCompletion {
        fn save_backup(&self, job: &BackupJob) -> Result<()> {
            if job.done {
                return Err(Error::Storage {
                    reason: "metadata store unavailable".to_string(),
                });
            }
            self.0.save_backup(job)
        }
        fn get_backup(&self, id: &Uuid) -> Result<BackupJob> {
            self.0.get_backup(id)
        }
        fn delete_backup(&self, id: &Uuid) -> Result<()> {
            self.0.delete_backup(id)
        }
        fn list_backups(&self) -> Result<Vec<BackupJob>> {
            self.0.list_backups()
        }
        fn save_restore(&self, job: &crate::jobs::RestoreJob) -> Result<()> {
            self.0.save_restore(job)
        }
        fn get_restore(&self, id: &Uuid) -> Result<crate::jobs::RestoreJob> {
            self.0.get_restore(id)
        }
        fn list_restores(&self) -> Result<Vec<crate::jobs::RestoreJob>> {
            self.0.list_restores()
        }
    }

    fn stored_archives(fixture: &Fixture) -> Result<Vec<fs::DirEntry>> {
        let dir = fixture.storage.resolve(ARCHIVE_DIR)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        Ok(fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?)
    }

    #[test]
    fn test_failed_output_copy_stores_nothing() -> Result<()> {
        let fixture = fixture(false)?;
        let blocker = fixture.temp_dir.path().join("not-a-dir");
        fs::write(&blocker, b"file")?;

        let result = fixture
            .engine
            .run_synchronously("essential_data", None, Some(&blocker.join("out.zip")));
        assert!(result.is_err());
        assert!(stored_archives(&fixture)?.is_empty());

        let jobs = fixture.engine.jobs().list_backups()?;
        assert_eq!(jobs.len(), 1);
        assert!(!jobs[0].done);
        assert!(jobs[0].file.is_none());
        Ok(())
    }

    #[test]
    fn test_unrecorded_archive_is_removed() -> Result<()> {
        let fixture = fixture(false)?;
        let jobs = Arc::new(RejectsCompletion(JsonJobStore::new(fixture.temp_dir.path().join("jobs-2"))?));
        let engine = BackupEngine::new(
            fixture.engine.registry().clone(),
            fixture.data_source.clone(),
            fixture.storage.clone(),
            jobs,
            scope_for(false),
            fixture.engine.settings.clone(),
        );

        let job = engine.create_job(None, "essential_data", None)?;
        let err = engine.run(&job.id).unwrap_err();
        assert!(err.is_retryable());
        assert!(stored_archives(&fixture)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_rejects_tenant_outside_its_directory() -> Result<()> {
        let fixture = fixture(true)?;
        for tenant in ["../../outside", "a/b", ".."] {
            let result = fixture
                .engine
                .create_job(None, "essential_data", Some(TenantId::new(tenant)));
            assert!(matches!(result, Err(Error::Configuration { .. })));
        }

        let escaped = fixture.data_source.import(
            &[record("app.widget", 1, json!({"title": "a"}))],
            Some(&TenantId::new("../../outside")),
        );
        assert!(matches!(escaped, Err(Error::Configuration { .. })));
        assert!(!fixture.temp_dir.path().join("outside").exists());
        Ok(())
    }

    #[test]
    fn test_available_path_avoids_collisions() -> Result<()> {
        let fixture = fixture(false)?;
        let first = fixture.engine.available_path("backup_x_20240101_000000")?;
        assert_eq!(first, "backups/backup_x_20240101_000000.zip");

        fixture.storage.write(&first, &mut &b"zip"[..])?;
        let second = fixture.engine.available_path("backup_x_20240101_000000")?;
        assert_ne!(second, first);
        assert!(second.starts_with("backups/backup_x_20240101_000000_"));
        Ok(())
    }
}
