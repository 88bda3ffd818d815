use crate::error::{AppError, AppResult};
use crate::sync::reconcile::{CycleOutcome, Reconciler};
use crate::sync::selftest::SelfTest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Work fired by the scheduler
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fire(&self);
}

#[async_trait]
impl Job for Reconciler {
    fn name(&self) -> &'static str {
        "playlist rotation"
    }

    async fn fire(&self) {
        match self.run().await {
            Ok(reports) => {
                let rotated = reports
                    .iter()
                    .filter(|r| matches!(r.outcome, CycleOutcome::Rotated { .. }))
                    .count();
                info!("Playlist rotation: {}/{} guilds rotated", rotated, reports.len());
            }
            Err(e) => error!("Playlist rotation could not list guilds: {}", e),
        }
    }
}

#[async_trait]
impl Job for SelfTest {
    fn name(&self) -> &'static str {
        "connection self-test"
    }

    async fn fire(&self) {
        if let Err(e) = self.run().await {
            error!("Self-test could not list guilds: {}", e);
        }
    }
}

/// A validated cron expression, evaluated in UTC.
///
/// Five-field expressions get a leading `0` seconds field.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> AppResult<Self> {
        let trimmed = expr.trim();
        let normalized = if trimmed.split_whitespace().count() == 5 {
            format!("0 {}", trimmed)
        } else {
            trimmed.to_string()
        };

        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| AppError::InvalidSchedule {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }
}

impl FromStr for CronSchedule {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Fires jobs on their cron cadence, each in its own task.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<(CronSchedule, Arc<dyn Job>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Invalid expressions fail here, at boot.
    pub fn add(mut self, expr: &str, job: Arc<dyn Job>) -> AppResult<Self> {
        let schedule = CronSchedule::parse(expr)?;
        info!("Scheduled {} at '{}'", job.name(), schedule.expr());
        self.jobs.push((schedule, job));
        Ok(self)
    }

    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        self.jobs
            .into_iter()
            .map(|(schedule, job)| tokio::spawn(run_job(schedule, job)))
            .collect()
    }
}

async fn run_job(schedule: CronSchedule, job: Arc<dyn Job>) {
    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            info!("No further firings for {} ('{}')", job.name(), schedule.expr());
            return;
        };
        info!("Next {} at {}", job.name(), next);

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        info!("Firing {}", job.name());
        job.fire().await;
    }
}
