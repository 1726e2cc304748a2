//! Daily bulk recalculation.
//!
//! Each run walks every organization enrolled in the settings store and
//! re-sizes every buffered product. Organizations run concurrently up to
//! `parallelism`; a failure in one organization (or one product) is logged
//! and counted, never fatal to the run. The whole run is bounded by
//! `timeout` and by the shutdown signal. Re-running is always safe.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use ddmrp_core::{OrganizationId, OrganizationSettingsStore};
use ddmrp_events::Shutdown;

use crate::calculator::BufferCalculator;
use crate::error::EngineResult;
use crate::providers::BufferRepository;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// UTC wall-clock time of the daily run.
    pub run_at: NaiveTime,
    /// Hard bound on a single run.
    pub timeout: Duration,
    /// Organizations recalculated concurrently.
    pub parallelism: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_at: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN),
            timeout: Duration::from_secs(30 * 60),
            parallelism: 4,
        }
    }
}

impl SchedulerConfig {
    pub fn with_run_at(mut self, run_at: NaiveTime) -> Self {
        self.run_at = run_at;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }
}

/// First occurrence of `run_at` strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, run_at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(run_at).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationReport {
    pub organization_id: OrganizationId,
    pub recalculated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    TimedOut,
    Cancelled,
}

/// Summary of one scheduled run.
#[derive(Debug, Clone, Serialize)]
pub struct RecalculationReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub organizations: Vec<OrganizationReport>,
    /// Organizations whose buffers could not even be listed.
    pub failed_organizations: Vec<(OrganizationId, String)>,
}

impl RecalculationReport {
    pub fn total_recalculated(&self) -> usize {
        self.organizations.iter().map(|o| o.recalculated).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.organizations.iter().map(|o| o.failed).sum::<usize>() + self.failed_organizations.len()
    }
}

pub struct RecalculationScheduler {
    calculator: Arc<BufferCalculator>,
    buffers: Arc<dyn BufferRepository>,
    settings: Arc<OrganizationSettingsStore>,
    config: SchedulerConfig,
}

impl RecalculationScheduler {
    pub fn new(
        calculator: Arc<BufferCalculator>,
        buffers: Arc<dyn BufferRepository>,
        settings: Arc<OrganizationSettingsStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            calculator,
            buffers,
            settings,
            config,
        }
    }

    /// Re-size every buffered product of one organization.
    #[instrument(skip(self), fields(%organization_id), err)]
    pub async fn recalculate_organization(
        &self,
        organization_id: OrganizationId,
    ) -> EngineResult<OrganizationReport> {
        let buffers = self.buffers.list(organization_id)?;
        let mut report = OrganizationReport {
            organization_id,
            recalculated: 0,
            failed: 0,
        };

        for buffer in buffers {
            match self
                .calculator
                .calculate(buffer.product_id, organization_id)
                .await
            {
                Ok(_) => report.recalculated += 1,
                Err(e) => {
                    warn!(product_id = %buffer.product_id, error = %e, "buffer recalculation failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            recalculated = report.recalculated,
            failed = report.failed,
            "organization recalculated"
        );
        Ok(report)
    }

    /// One bulk run over every enrolled organization.
    pub async fn run_once(&self, shutdown: &Shutdown) -> RecalculationReport {
        let targets = self.settings.recalculation_targets();
        let started_at = Utc::now();
        info!(organizations = targets.len(), "recalculation run started");

        let mut organizations = Vec::new();
        let mut failed_organizations = Vec::new();

        let outcome = {
            let work = async {
                let mut results = stream::iter(targets)
                    .map(|org| async move { (org, self.recalculate_organization(org).await) })
                    .buffer_unordered(self.config.parallelism.max(1));

                while let Some((org, result)) = results.next().await {
                    match result {
                        Ok(report) => organizations.push(report),
                        Err(e) => {
                            error!(organization_id = %org, error = %e, "organization recalculation failed");
                            failed_organizations.push((org, e.to_string()));
                        }
                    }
                }
            };

            tokio::select! {
                finished = tokio::time::timeout(self.config.timeout, work) => match finished {
                    Ok(()) => RunOutcome::Completed,
                    Err(_) => RunOutcome::TimedOut,
                },
                _ = shutdown.cancelled() => RunOutcome::Cancelled,
            }
        };

        let report = RecalculationReport {
            started_at,
            finished_at: Utc::now(),
            outcome,
            organizations,
            failed_organizations,
        };

        match outcome {
            RunOutcome::Completed => info!(
                recalculated = report.total_recalculated(),
                failed = report.total_failed(),
                "recalculation run finished"
            ),
            RunOutcome::TimedOut | RunOutcome::Cancelled => warn!(
                outcome = ?outcome,
                recalculated = report.total_recalculated(),
                failed = report.total_failed(),
                "recalculation run interrupted"
            ),
        }
        report
    }

    /// Wait for each daily slot and run, until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        loop {
            let now = Utc::now();
            let next = next_run_after(now, self.config.run_at);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "recalculation scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.run_once(&shutdown).await;
                }
                _ = shutdown.cancelled() => break,
            }
        }
        info!("recalculation scheduler stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
