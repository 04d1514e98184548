//! YAML configuration for nova-vault

use crate::registry::{
    BackupTypeConfig, BackupTypeRegistry, ModelSelection, ScheduleSpec, DEFAULT_MAX_BACKUPS,
};
use crate::scheduler::{on_calendar, RetryPolicy};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Public prefix of media URLs, stripped when scanning file fields
    pub media_url: String,
    /// Allow tenant-scoped jobs
    pub multi_tenant: bool,
    /// Root of the local file storage (media and archives)
    pub storage_root: PathBuf,
    /// Root of the JSON data source
    pub data_root: PathBuf,
    /// Root of the job metadata store
    pub jobs_root: PathBuf,
    /// Where staging areas are created; system temp dir when unset
    pub staging_dir: Option<PathBuf>,
    pub retention: RetentionConfig,
    pub queue: QueueConfig,
    pub backup_types: BTreeMap<String, BackupTypeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Completed backups kept per type unless the type overrides it
    pub max_backups: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub workers: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 60,
            workers: 2,
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .map(|dir| dir.join("nova-vault"))
            .unwrap_or_else(|| PathBuf::from("nova-vault"));

        Self {
            media_url: "/media/".to_string(),
            multi_tenant: false,
            storage_root: base.join("storage"),
            data_root: base.join("data"),
            jobs_root: base.join("jobs"),
            staging_dir: None,
            retention: RetentionConfig::default(),
            queue: QueueConfig::default(),
            backup_types: default_backup_types(),
        }
    }
}

fn default_backup_types() -> BTreeMap<String, BackupTypeConfig> {
    let mut types = BTreeMap::new();

    types.insert(
        "all_models".to_string(),
        BackupTypeConfig {
            display_name: Some("All Models".to_string()),
            description: "Backup all models".to_string(),
            models: ModelSelection::All,
            ..Default::default()
        },
    );

    let mut exclude_fields = BTreeMap::new();
    exclude_fields.insert(
        "my_app.essential_model".to_string(),
        BTreeSet::from(["user".to_string()]),
    );
    types.insert(
        "essential_data".to_string(),
        BackupTypeConfig {
            display_name: Some("Essential Data".to_string()),
            description: "Backup only essential data".to_string(),
            models: ModelSelection::Only(vec!["my_app.essential_model".to_string()]),
            exclude_fields,
            schedule: Some(ScheduleSpec {
                enabled: true,
                hour: 3,
                minute: 0,
                day_of_week: Some(1),
            }),
            ..Default::default()
        },
    );

    types
}

impl VaultConfig {
    /// Load from `path`, or from the default location; a missing file is
    /// created with defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        if config_path.exists() {
            debug!("Loading config from {}", config_path.display());
            let content = fs::read_to_string(&config_path).map_err(|e| Error::Configuration {
                reason: format!("failed to read {}: {}", config_path.display(), e),
            })?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            debug!("Config file not found, creating default at {}", config_path.display());
            let config = Self::default();
            config.save(&config_path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(path, serde_yaml::to_string(self)?)?;
        debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| Error::Configuration {
            reason: "could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("nova-vault").join("config.yaml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.workers == 0 {
            return Err(Error::Configuration {
                reason: "queue.workers must be greater than 0".to_string(),
            });
        }

        if !self.media_url.starts_with('/') && !self.media_url.contains("://") {
            warn!("media_url should be absolute: {}", self.media_url);
        }

        if self.queue.max_retries > 10 {
            warn!("High retry count configured: {}", self.queue.max_retries);
        }

        for (key, config) in &self.backup_types {
            if let Some(schedule) = &config.schedule {
                on_calendar(schedule).map_err(|e| Error::Configuration {
                    reason: format!("backup type '{}': {}", key, e),
                })?;
            }
            if let ModelSelection::Only(models) = &config.models {
                if models.is_empty() {
                    warn!("Backup type '{}' selects no models", key);
                }
            }
        }

        Ok(())
    }

    pub fn registry(&self) -> BackupTypeRegistry {
        BackupTypeRegistry::new(self.backup_types.clone(), self.retention.max_backups)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.queue.max_retries,
            backoff: Duration::from_secs(self.queue.retry_delay_secs),
        }
    }
}
