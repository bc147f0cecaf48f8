//! Periodic jobs: the accrual tick and the connection health check.

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info, warn};

use lib_rewards::core::{AccrualScheduler, ConnectionSupervisor, HealthReport, TickOutcome};

/// Builds and starts the scheduler with both jobs registered.
pub async fn start(
    accrual: Arc<AccrualScheduler>,
    supervisor: Arc<ConnectionSupervisor>,
    accrual_every: Duration,
    health_every: Duration,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let accrual_job = Job::new_repeated_async(accrual_every, move |_uuid, _lock| {
        let accrual = accrual.clone();
        Box::pin(async move {
            match accrual.tick().await {
                TickOutcome::Skipped => warn!("accrual job overlapped a running tick"),
                TickOutcome::NoData => warn!("accrual job had no data"),
                TickOutcome::Aborted { credited } => error!(credited, "accrual job aborted"),
                TickOutcome::Completed { .. } => {}
            }
        })
    })?;
    scheduler.add(accrual_job).await?;

    let health_job = Job::new_repeated_async(health_every, move |_uuid, _lock| {
        let supervisor = supervisor.clone();
        Box::pin(async move {
            match supervisor.health_check().await {
                Ok(HealthReport::Healthy { contacts }) => info!(contacts, "health check ok"),
                Ok(HealthReport::Remediated { reason }) => warn!(%reason, "health check remediated"),
                Err(e) => info!(error = %e, "health check interrupted"),
            }
        })
    })?;
    scheduler.add(health_job).await?;

    scheduler.start().await?;
    info!(
        accrual_secs = accrual_every.as_secs(),
        health_secs = health_every.as_secs(),
        "scheduler started"
    );
    Ok(scheduler)
}
