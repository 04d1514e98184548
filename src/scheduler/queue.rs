//! Worker pool with bounded automatic retries

use crate::backup::{BackupEngine, BackupReport};
use crate::restore::{RestoreEngine, RestoreReport};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How often a failed job is resubmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Fixed delay before each retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Run once, never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Result of one job attempt as seen by the queue
#[derive(Debug)]
pub enum JobOutcome<T> {
    Success(T),
    /// Worth resubmitting: the failure may not happen again
    RetryableFailure(Error),
    /// Will fail the same way every time
    TerminalFailure(Error),
}

impl<T> JobOutcome<T> {
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => JobOutcome::Success(value),
            Err(e) if e.is_retryable() => JobOutcome::RetryableFailure(e),
            Err(e) => JobOutcome::TerminalFailure(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success(_))
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            JobOutcome::Success(value) => Ok(value),
            JobOutcome::RetryableFailure(e) | JobOutcome::TerminalFailure(e) => Err(e),
        }
    }
}

/// Dispatches jobs to a fixed number of blocking workers
#[derive(Clone)]
pub struct JobQueue {
    backups: BackupEngine,
    restores: RestoreEngine,
    policy: RetryPolicy,
    workers: Arc<Semaphore>,
}

impl JobQueue {
    pub fn new(backups: BackupEngine, restores: RestoreEngine, policy: RetryPolicy, workers: usize) -> Self {
        Self {
            backups,
            restores,
            policy,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run a pending backup, retrying retryable failures per the policy.
    ///
    /// Each attempt re-runs the whole job. A job that exhausts its attempts
    /// stays `done = false`.
    pub fn submit_backup(&self, job_id: Uuid) -> JoinHandle<JobOutcome<BackupReport>> {
        let engine = self.backups.clone();
        let label = format!("backup {}", job_id);
        tokio::spawn(dispatch(self.workers.clone(), self.policy, label, move || {
            engine.run(&job_id)
        }))
    }

    /// Run a pending restore once
    pub fn submit_restore(&self, job_id: Uuid) -> JoinHandle<JobOutcome<RestoreReport>> {
        let engine = self.restores.clone();
        let label = format!("restore {}", job_id);
        tokio::spawn(dispatch(self.workers.clone(), RetryPolicy::none(), label, move || {
            engine.run(&job_id)
        }))
    }

    /// Re-run a restore in the caller's thread; the error is returned verbatim
    pub fn retry_restore(&self, job_id: &Uuid) -> Result<RestoreReport> {
        info!("Retrying restore {}", job_id);
        self.restores.run(job_id)
    }
}

async fn dispatch<T, F>(workers: Arc<Semaphore>, policy: RetryPolicy, label: String, work: F) -> JobOutcome<T>
where
    T: Send + 'static,
    F: Fn() -> Result<T> + Clone + Send + 'static,
{
    let mut attempt = 1;

    loop {
        let outcome = {
            let _permit = match workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return JobOutcome::TerminalFailure(Error::Scheduling {
                        reason: "worker pool is closed".to_string(),
                    })
                }
            };

            match tokio::task::spawn_blocking(work.clone()).await {
                Ok(result) => JobOutcome::from_result(result),
                Err(e) => JobOutcome::TerminalFailure(Error::Scheduling {
                    reason: format!("{} worker aborted: {}", label, e),
                }),
            }
        };

        match outcome {
            JobOutcome::RetryableFailure(e) if attempt <= policy.max_retries => {
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    label,
                    attempt,
                    policy.max_attempts(),
                    policy.backoff,
                    e
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            JobOutcome::RetryableFailure(e) => {
                error!("{} failed after {} attempts: {}", label, attempt, e);
                return JobOutcome::TerminalFailure(e);
            }
            JobOutcome::TerminalFailure(e) => {
                error!("{} failed: {}", label, e);
                return JobOutcome::TerminalFailure(e);
            }
            success => return success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::EngineSettings;
    use crate::datasource::DataSource;
    use crate::jobs::{JobStore, JsonJobStore};
    use crate::record::SerializedRecord;
    use crate::registry::BackupTypeRegistry;
    use crate::scanner::MediaSchema;
    use crate::storage::LocalFsStorage;
    use crate::tenant::{scope_for, TenantId};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fails the first `failures` exports with a transient error
    struct FlakySource {
        failures: usize,
        calls: AtomicUsize,
    }

    impl DataSource for FlakySource {
        fn models(&self) -> Vec<String> {
            vec!["app.widget".to_string()]
        }

        fn media_schema(&self) -> MediaSchema {
            MediaSchema::new()
        }

        fn export(&self, _models: &[String], _tenant: Option<&TenantId>) -> Result<Vec<SerializedRecord>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(Error::DataSource {
                    reason: "connection reset".to_string(),
                })
            } else {
                Ok(Vec::new())
            }
        }

        fn import(&self, records: &[SerializedRecord], _tenant: Option<&TenantId>) -> Result<usize> {
            Ok(records.len())
        }

        fn clear(&self, _models: &[String], _tenant: Option<&TenantId>) -> Result<usize> {
            Ok(0)
        }
    }

    fn queue(temp_dir: &TempDir, source: Arc<FlakySource>) -> Result<(JobQueue, Arc<JsonJobStore>)> {
        let storage = Arc::new(LocalFsStorage::new(temp_dir.path().join("storage"))?);
        let jobs = Arc::new(JsonJobStore::new(temp_dir.path().join("jobs"))?);
        let registry = Arc::new(BackupTypeRegistry::new(BTreeMap::new(), 30));
        let scope = scope_for(false);
        let settings = EngineSettings::default();

        let backups = BackupEngine::new(
            registry.clone(),
            source.clone(),
            storage.clone(),
            jobs.clone(),
            scope.clone(),
            settings.clone(),
        );
        let restores = RestoreEngine::new(registry, source, storage, jobs.clone(), scope, settings);
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(5),
        };
        Ok((JobQueue::new(backups, restores, policy, 2), jobs))
    }

    #[test]
    fn test_outcome_classification() {
        let transient: JobOutcome<()> = JobOutcome::from_result(Err(Error::Storage {
            reason: "timeout".to_string(),
        }));
        assert!(matches!(transient, JobOutcome::RetryableFailure(_)));

        let structural: JobOutcome<()> = JobOutcome::from_result(Err(Error::UnsupportedFormat {
            version: "9.9".to_string(),
        }));
        assert!(matches!(structural, JobOutcome::TerminalFailure(_)));
        assert!(JobOutcome::from_result(Ok(1)).is_success());
        assert_eq!(RetryPolicy::default().max_attempts(), 4);
    }

    #[tokio::test]
    async fn test_backup_retried_until_success() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = Arc::new(FlakySource {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let (queue, jobs) = queue(&temp_dir, source.clone())?;

        let job = queue.backups.create_job(None, "essential_data", None)?;
        let outcome = queue.submit_backup(job.id).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert!(jobs.get_backup(&job.id)?.done);
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_gives_up_after_max_retries() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = Arc::new(FlakySource {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let (queue, jobs) = queue(&temp_dir, source.clone())?;

        let job = queue.backups.create_job(None, "essential_data", None)?;
        let outcome = queue.submit_backup(job.id).await.unwrap();

        assert!(matches!(outcome, JobOutcome::TerminalFailure(Error::DataSource { .. })));
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);

        let stored = jobs.get_backup(&job.id)?;
        assert!(!stored.done);
        assert!(stored.file.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_runs_once() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let source = Arc::new(FlakySource {
            failures: 0,
            calls: AtomicUsize::new(0),
        });
        let (queue, _jobs) = queue(&temp_dir, source)?;

        let job = queue
            .restores
            .create_job(None, "backups/missing.zip", "all_models", false, None)?;
        let outcome = queue.submit_restore(job.id).await.unwrap();
        assert!(matches!(outcome, JobOutcome::TerminalFailure(Error::InvalidArchive { .. })));

        let err = queue.retry_restore(&job.id).unwrap_err();
        assert!(matches!(err, Error::InvalidArchive { .. }));
        Ok(())
    }
}
