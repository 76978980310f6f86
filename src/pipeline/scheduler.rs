//! Batch driver: runs sync passes for many users on a cron schedule.
//!
//! Passes for different users run concurrently up to a bound. Each pass is
//! wrapped in an external deadline; a pass that overruns it is a failure and
//! its checkpoint is not advanced.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::error::{ConfigError, DatabaseError, SyncError};
use crate::pipeline::sync::SyncOrchestrator;

/// How often a sleeping scheduler checks its shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_secs(1);

/// One user whose pass failed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFailure {
    pub user_id: String,
    pub error: String,
}

/// Summary of a batch.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub failures: Vec<UserFailure>,
}

/// Run one pass per user, at most `max_concurrent` at a time.
///
/// Duplicate ids are collapsed so a user never has two passes in flight.
pub async fn run_batch(
    orchestrator: &SyncOrchestrator,
    user_ids: &[String],
    max_concurrent: usize,
    pass_timeout: Duration,
) -> BatchReport {
    let mut seen = HashSet::new();
    let users: Vec<&String> = user_ids.iter().filter(|u| seen.insert(*u)).collect();

    let passes: Vec<_> = users
        .into_iter()
        .map(|user_id| async move {
            let outcome = match tokio::time::timeout(pass_timeout, orchestrator.run_sync(user_id))
                .await
            {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    let e = SyncError::Deadline {
                        user_id: user_id.clone(),
                        timeout: pass_timeout,
                    };
                    orchestrator.record_failure(user_id, &e).await;
                    Err(e)
                }
            };
            (user_id.clone(), outcome)
        })
        .collect();
    let outcomes: Vec<(String, Result<(), SyncError>)> = futures::stream::iter(passes)
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    let mut report = BatchReport {
        total: outcomes.len(),
        ..Default::default()
    };
    for (user_id, outcome) in outcomes {
        match outcome {
            Ok(()) => report.successful += 1,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Sync pass failed");
                report.failed += 1;
                report.failures.push(UserFailure {
                    user_id,
                    error: e.to_string(),
                });
            }
        }
    }
    report
}

/// Run a batch over every user with a connected mailbox.
pub async fn run_scheduled_batch(
    orchestrator: &SyncOrchestrator,
    config: &SyncConfig,
) -> Result<BatchReport, DatabaseError> {
    let users = orchestrator.store().list_sync_users().await?;
    let report = run_batch(
        orchestrator,
        &users,
        config.max_concurrent_users,
        config.pass_timeout,
    )
    .await;
    info!(
        total = report.total,
        successful = report.successful,
        failed = report.failed,
        "Sync batch complete"
    );
    Ok(report)
}

/// Next fire time of `schedule` after now.
pub fn next_fire(schedule: &cron::Schedule) -> Option<DateTime<Utc>> {
    schedule.upcoming(Utc).next()
}

/// Spawn a background task that runs a batch on every cron fire.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop.
pub fn spawn_sync_scheduler(
    orchestrator: Arc<SyncOrchestrator>,
    config: SyncConfig,
) -> Result<(JoinHandle<()>, Arc<AtomicBool>), ConfigError> {
    let schedule = cron::Schedule::from_str(&config.schedule).map_err(|e| {
        ConfigError::InvalidValue {
            key: "INBOX_LEDGER_SYNC_SCHEDULE".into(),
            message: format!("invalid cron: {e}"),
        }
    })?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(schedule = %config.schedule, "Sync scheduler started");

        loop {
            let Some(fire_at) = next_fire(&schedule) else {
                warn!("Cron schedule has no upcoming fire time; scheduler stopping");
                return;
            };

            // Sleep in short slices so shutdown is noticed promptly.
            loop {
                if shutdown.load(Ordering::Relaxed) {
                    info!("Sync scheduler shutting down");
                    return;
                }
                let remaining = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                if remaining.is_zero() {
                    break;
                }
                tokio::time::sleep(remaining.min(SHUTDOWN_POLL)).await;
            }

            if let Err(e) = run_scheduled_batch(&orchestrator, &config).await {
                error!(error = %e, "Failed to list users for sync batch");
            }
        }
    });

    Ok((handle, shutdown_flag))
}
