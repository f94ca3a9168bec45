//! Background maintenance scheduler (SPEC_FULL.md "Background maintenance").
//!
//! Runs two fixed `tokio-cron-scheduler` jobs: history eviction and upload
//! sweep. Neither job needs hot-reload since their schedule never changes
//! at runtime, so there is no job/UUID map here.

use crate::domain::PersistencePort;
use crate::storage::FileStoragePort;
use anyhow::Result;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

pub const HISTORY_RETENTION_DAYS: i64 = 30;
const DEFAULT_SCHEDULE: &str = "0 0 * * * *"; // hourly, on the hour

pub struct MaintenanceScheduler {
    scheduler: JobScheduler,
}

impl MaintenanceScheduler {
    pub async fn new(
        persistence: Arc<dyn PersistencePort>,
        storage: Arc<dyn FileStoragePort>,
    ) -> Result<Self> {
        let mut scheduler = JobScheduler::new().await?;

        let history_persistence = Arc::clone(&persistence);
        let history_job = Job::new_async(DEFAULT_SCHEDULE, move |_uuid, _l| {
            let persistence = Arc::clone(&history_persistence);
            Box::pin(async move {
                match run_history_eviction(persistence.as_ref()).await {
                    Ok(removed) => tracing::info!(removed, "history eviction completed"),
                    Err(e) => tracing::warn!(error = %e, "history eviction failed"),
                }
            })
        })?;
        scheduler.add(history_job).await?;

        let sweep_persistence = Arc::clone(&persistence);
        let sweep_storage = Arc::clone(&storage);
        let sweep_job = Job::new_async(DEFAULT_SCHEDULE, move |_uuid, _l| {
            let persistence = Arc::clone(&sweep_persistence);
            let storage = Arc::clone(&sweep_storage);
            Box::pin(async move {
                match run_upload_sweep(persistence.as_ref(), storage.as_ref()).await {
                    Ok(removed) => tracing::info!(removed, "upload sweep completed"),
                    Err(e) => tracing::warn!(error = %e, "upload sweep failed"),
                }
            })
        })?;
        scheduler.add(sweep_job).await?;

        Ok(Self { scheduler })
    }

    pub async fn start(&self) -> Result<()> {
        tracing::info!("starting maintenance scheduler");
        self.scheduler.start().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("stopping maintenance scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }
}

async fn run_history_eviction(persistence: &dyn PersistencePort) -> anyhow::Result<u64> {
    let cutoff = chrono::Utc::now() - ChronoDuration::days(HISTORY_RETENTION_DAYS);
    let removed = persistence.evict_history_older_than(cutoff).await?;
    Ok(removed)
}

async fn run_upload_sweep(
    persistence: &dyn PersistencePort,
    storage: &dyn FileStoragePort,
) -> anyhow::Result<u64> {
    let referenced_ids = persistence.list_referenced_file_ids().await?;
    let referenced_stored_names = persistence.resolve_stored_names(&referenced_ids).await?;
    let removed = storage.sweep(&referenced_stored_names).await?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SqlitePersistence;
    use crate::storage::LocalDiskStorage;

    #[tokio::test]
    async fn history_eviction_runs_against_an_in_memory_database() {
        let persistence = SqlitePersistence::in_memory().await;
        let removed = run_history_eviction(&persistence).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn upload_sweep_runs_with_no_referenced_files() {
        let persistence = SqlitePersistence::in_memory().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalDiskStorage::new(dir.path().to_path_buf()).await.unwrap();
        let removed = run_upload_sweep(&persistence, &storage).await.unwrap();
        assert_eq!(removed, 0);
    }
}
