//! Wires a [`VaultConfig`] into concrete collaborators

use crate::backup::{BackupEngine, EngineSettings};
use crate::config::VaultConfig;
use crate::datasource::{DataSource, JsonDirDataSource};
use crate::jobs::{JobStore, JsonJobStore};
use crate::registry::BackupTypeRegistry;
use crate::restore::RestoreEngine;
use crate::scheduler::JobQueue;
use crate::storage::{FileStorage, LocalFsStorage};
use crate::tenant::{scope_for, TenantScope};
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Everything a command needs, built once at startup
#[derive(Clone)]
pub struct Vault {
    pub config: VaultConfig,
    pub registry: Arc<BackupTypeRegistry>,
    pub storage: Arc<dyn FileStorage>,
    pub jobs: Arc<dyn JobStore>,
    pub backups: BackupEngine,
    pub restores: RestoreEngine,
}

impl Vault {
    /// Build the local collaborators named by `config`
    pub fn open(config: VaultConfig) -> Result<Self> {
        config.validate()?;

        let storage: Arc<dyn FileStorage> = Arc::new(LocalFsStorage::new(&config.storage_root)?);
        let data_source: Arc<dyn DataSource> = Arc::new(JsonDirDataSource::open(&config.data_root)?);
        let jobs: Arc<dyn JobStore> = Arc::new(JsonJobStore::new(&config.jobs_root)?);
        debug!(
            "Opened vault: storage {}, data {}, jobs {}",
            config.storage_root.display(),
            config.data_root.display(),
            config.jobs_root.display()
        );

        Ok(Self::with_collaborators(config, data_source, storage, jobs))
    }

    /// Build around caller-supplied collaborators
    pub fn with_collaborators(
        config: VaultConfig,
        data_source: Arc<dyn DataSource>,
        storage: Arc<dyn FileStorage>,
        jobs: Arc<dyn JobStore>,
    ) -> Self {
        let registry = Arc::new(config.registry());
        let tenant_scope: Arc<dyn TenantScope> = scope_for(config.multi_tenant);
        let settings = EngineSettings {
            media_url: config.media_url.clone(),
            multi_tenant: config.multi_tenant,
            staging_dir: config.staging_dir.clone(),
        };

        let backups = BackupEngine::new(
            registry.clone(),
            data_source.clone(),
            storage.clone(),
            jobs.clone(),
            tenant_scope.clone(),
            settings.clone(),
        );
        let restores = RestoreEngine::new(
            registry.clone(),
            data_source,
            storage.clone(),
            jobs.clone(),
            tenant_scope,
            settings,
        );

        Self {
            config,
            registry,
            storage,
            jobs,
            backups,
            restores,
        }
    }

    pub fn queue(&self) -> JobQueue {
        JobQueue::new(
            self.backups.clone(),
            self.restores.clone(),
            self.config.retry_policy(),
            self.config.queue.workers,
        )
    }
}
