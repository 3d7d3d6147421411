//! Recurring background jobs.
//!
//! [`AlertingJobs`] drives two timers on the tokio runtime: a threshold check
//! that evaluates every sample from a [`MetricSource`], and a maintenance pass
//! that purges expired records. Store work is synchronous and runs on the
//! blocking pool. A failed run is logged and the loop keeps going.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{AlertError, Result};
use crate::evaluator::EvaluationResult;
use crate::maintenance::MaintenanceReport;
use crate::metrics::MetricSource;
use crate::service::AlertingService;

/// Intervals of the background jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSchedule {
    /// Seconds between threshold checks.
    pub check_interval_secs: u64,
    /// Seconds between maintenance passes.
    pub maintenance_interval_secs: u64,
}

impl Default for JobSchedule {
    fn default() -> Self {
        Self {
            check_interval_secs: 300,
            maintenance_interval_secs: 86_400,
        }
    }
}

impl JobSchedule {
    /// Validates the schedule.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if an interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 || self.maintenance_interval_secs == 0 {
            return Err(AlertError::InvalidConfig {
                reason: "job intervals must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Threshold check interval.
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Maintenance interval.
    #[must_use]
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// The background job runner.
#[derive(Debug, Clone)]
pub struct AlertingJobs {
    service: AlertingService,
    source: Arc<dyn MetricSource>,
    schedule: JobSchedule,
}

impl AlertingJobs {
    /// Creates a job runner.
    #[must_use]
    pub fn new(
        service: AlertingService,
        source: Arc<dyn MetricSource>,
        schedule: JobSchedule,
    ) -> Self {
        Self {
            service,
            source,
            schedule,
        }
    }

    /// Returns the schedule.
    #[must_use]
    pub const fn schedule(&self) -> &JobSchedule {
        &self.schedule
    }

    /// Runs one threshold check on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns the evaluation error, or `AlertError::JobFailed` if the
    /// blocking task panicked or was cancelled.
    pub async fn run_check(&self) -> Result<EvaluationResult> {
        let service = self.service.clone();
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || {
            service.check_all_thresholds_at(source.as_ref(), chrono::Utc::now())
        })
        .await
        .map_err(|e| AlertError::JobFailed {
            reason: e.to_string(),
        })?
    }

    /// Runs one maintenance pass on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns the store error, or `AlertError::JobFailed` if the blocking
    /// task panicked or was cancelled.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || service.run_maintenance())
            .await
            .map_err(|e| AlertError::JobFailed {
                reason: e.to_string(),
            })?
    }

    /// Runs both jobs until `shutdown` turns true or its sender is dropped.
    ///
    /// Both timers fire immediately on start.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut check = time::interval(self.schedule.check_interval());
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut maintenance = time::interval(self.schedule.maintenance_interval());
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            check_secs = self.schedule.check_interval_secs,
            maintenance_secs = self.schedule.maintenance_interval_secs,
            "alerting jobs started"
        );

        loop {
            tokio::select! {
                _ = check.tick() => {
                    match self.run_check().await {
                        Ok(result) => debug!(
                            changed = result.changed(),
                            thresholds = result.thresholds_evaluated,
                            "threshold check finished"
                        ),
                        Err(e) => warn!(error = %e, "threshold check failed"),
                    }
                }
                _ = maintenance.tick() => {
                    if let Err(e) = self.run_maintenance().await {
                        warn!(error = %e, "maintenance failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("alerting jobs stopped");
    }
}
