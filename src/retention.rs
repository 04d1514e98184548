//! Retention pruning of completed backups

use crate::jobs::JobStore;
use crate::registry::BackupTypeRegistry;
use crate::storage::FileStorage;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Deletes the oldest completed backups of a type beyond its retention limit
#[derive(Clone)]
pub struct RetentionPruner {
    registry: Arc<BackupTypeRegistry>,
    jobs: Arc<dyn JobStore>,
    storage: Arc<dyn FileStorage>,
}

impl RetentionPruner {
    pub fn new(
        registry: Arc<BackupTypeRegistry>,
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn FileStorage>,
    ) -> Self {
        Self {
            registry,
            jobs,
            storage,
        }
    }

    /// Prune one backup type and return the number of jobs deleted.
    ///
    /// Archive deletion is best effort; job records are removed even when their
    /// archive could not be. Jobs with `done = false` are never considered.
    pub fn prune(&self, backup_type: &str) -> Result<usize> {
        let max_count = self.registry.max_count_for(backup_type) as usize;
        if max_count == 0 {
            return Ok(0);
        }

        let completed = self.jobs.completed_backups(backup_type)?;
        if completed.len() <= max_count {
            return Ok(0);
        }

        let mut deleted = 0;
        for job in completed.into_iter().skip(max_count) {
            if let Some(file) = &job.file {
                if let Err(e) = self.storage.delete(file) {
                    warn!("Failed to delete archive {} of backup {}: {}", file, job.id, e);
                }
            }
            self.jobs.delete_backup(&job.id)?;
            deleted += 1;
        }

        info!("Pruned {} old '{}' backups (keeping {})", deleted, backup_type, max_count);
        Ok(deleted)
    }
}
