use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::engine::{SyncEngine, SyncOptions};

/// Scheduler with one job running a full sync on `cron`. The caller starts it.
///
/// A tick that lands while another run holds the lock produces a report
/// with the "already in progress" error and is otherwise a no-op.
pub async fn build_scheduler(engine: Arc<SyncEngine>, cron: &str, options: SyncOptions) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let engine = Arc::clone(&engine);
        let options = options.clone();
        Box::pin(async move {
            info!("scheduled sync triggered");
            let report = engine.run_sync(options).await;
            if report.is_complete() {
                let (created, updated, skipped) = report.totals();
                info!(run_id = %report.run_id, created, updated, skipped, "scheduled sync finished");
            } else {
                warn!(run_id = %report.run_id, errors = ?report.fatal_errors(), "scheduled sync did not complete");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

pub async fn maybe_build_scheduler(config: &SyncConfig, engine: Arc<SyncEngine>) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }
    build_scheduler(engine, &config.sync_cron, SyncOptions::default())
        .await
        .map(Some)
}
