//! Periodic sweep job

use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use super::EnforcementSweeper;

/// Register the sweeper as a repeated job and start the scheduler.
pub async fn start_sweep_job(
    sweeper: Arc<EnforcementSweeper>,
    interval: Duration,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_repeated_async(interval, move |_id, _scheduler| {
        let sweeper = sweeper.clone();
        Box::pin(async move {
            if let Err(e) = sweeper.run().await {
                tracing::error!("Enforcement sweep failed: {}", e);
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!("Enforcement sweep scheduled every {:?}", interval);
    Ok(scheduler)
}
