//! Recurring batch-migration jobs
//!
//! Each registered job owns a trigger task that sleeps until the next cron
//! fire time and then starts a batch on its own task. A job never runs twice
//! at once: a fire that arrives while the previous one is still running is
//! dropped.

mod schedule;

pub use schedule::parse_schedule;

use crate::error::{Result, SyncError};
use crate::sync::{BatchMigrationResult, DEFAULT_MAX_TABLES};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use cron::Schedule;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// What a job fire runs
#[async_trait]
pub trait BatchRunner: Send + Sync + 'static {
    async fn run_batch(&self, overwrite: bool, max_tables: usize) -> Result<BatchMigrationResult>;
}

fn default_max_tables() -> usize {
    DEFAULT_MAX_TABLES
}

/// Parameters of a new job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    pub cron_expression: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_max_tables")]
    pub max_tables: usize,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, cron_expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cron_expression: cron_expression.into(),
            description: None,
            overwrite: false,
            max_tables: DEFAULT_MAX_TABLES,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Paused,
    Removed,
}

/// A registered job as reported to callers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub cron_expression: String,
    pub description: Option<String>,
    pub status: JobStatus,
    pub next_run: Option<DateTime<Local>>,
    pub created_at: DateTime<Local>,
    pub last_run: Option<DateTime<Local>>,
    pub overwrite: bool,
    pub max_tables: usize,
}

/// Result of one fire attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FireOutcome {
    Completed { attempted: usize, succeeded: usize },
    /// The batch could not start; the message is what was logged
    Failed(String),
    /// The previous fire of this job was still running
    Suppressed,
}

struct JobEntry {
    job: Job,
    running: Arc<AtomicBool>,
    trigger: Option<JoinHandle<()>>,
    next_run: watch::Receiver<Option<DateTime<Local>>>,
}

impl JobEntry {
    /// Copy of the job with status and next fire read from the live trigger
    fn snapshot(&self) -> Job {
        let next_run = *self.next_run.borrow();
        let trigger_alive = self.trigger.as_ref().is_some_and(|t| !t.is_finished());

        let status = match (trigger_alive, next_run) {
            (false, Some(_)) => JobStatus::Removed,
            (_, None) => JobStatus::Paused,
            (true, Some(_)) => JobStatus::Active,
        };

        Job {
            status,
            next_run,
            ..self.job.clone()
        }
    }
}

/// Clears the running flag when a fire ends, however it ends
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Shared<R> {
    runner: Arc<R>,
    jobs: RwLock<IndexMap<String, JobEntry>>,
}

impl<R: BatchRunner> Shared<R> {
    async fn fire(&self, id: &str) -> Result<FireOutcome> {
        let (guard, name, overwrite, max_tables) = {
            let mut jobs = self.jobs.write().await;
            let entry = jobs
                .get_mut(id)
                .ok_or_else(|| SyncError::NotFound(format!("job {} not found", id)))?;

            if entry.running.swap(true, Ordering::AcqRel) {
                tracing::warn!("job '{}' ({}) is still running, skipping this fire", entry.job.name, id);
                return Ok(FireOutcome::Suppressed);
            }
            entry.job.last_run = Some(Local::now());
            (
                RunningGuard(entry.running.clone()),
                entry.job.name.clone(),
                entry.job.overwrite,
                entry.job.max_tables,
            )
        };

        tracing::info!("job '{}' ({}) started", name, id);
        let outcome = match self.runner.run_batch(overwrite, max_tables).await {
            Ok(batch) => {
                tracing::info!(
                    "job '{}' ({}) finished: {} of {} tables migrated",
                    name,
                    id,
                    batch.succeeded,
                    batch.attempted
                );
                FireOutcome::Completed {
                    attempted: batch.attempted,
                    succeeded: batch.succeeded,
                }
            }
            Err(e) => {
                tracing::error!("job '{}' ({}) failed: {}", name, id, e);
                FireOutcome::Failed(e.to_string())
            }
        };
        drop(guard);
        Ok(outcome)
    }
}

async fn trigger_loop<R: BatchRunner>(
    shared: Weak<Shared<R>>,
    id: String,
    schedule: Schedule,
    next_tx: watch::Sender<Option<DateTime<Local>>>,
) {
    let mut next = *next_tx.borrow();
    loop {
        let Some(at) = next else {
            tracing::info!("job {} has no further fire times", id);
            return;
        };

        let wait = (at - Local::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let Some(strong) = shared.upgrade() else {
            return;
        };
        let fire_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = strong.fire(&fire_id).await {
                tracing::warn!("scheduled fire of job {} skipped: {}", fire_id, e);
            }
        });

        let from = at.max(Local::now());
        next = schedule.after(&from).next();
        next_tx.send_replace(next);
    }
}

/// Job registry and trigger owner
pub struct Scheduler<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for Scheduler<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<R: BatchRunner> Scheduler<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self {
            shared: Arc::new(Shared {
                runner,
                jobs: RwLock::new(IndexMap::new()),
            }),
        }
    }

    /// Validate the expression, then create the job and start its trigger.
    /// Must be called from within a Tokio runtime.
    pub async fn register(&self, request: JobRequest) -> Result<Job> {
        let cron_schedule = parse_schedule(&request.cron_expression)?;
        let next_run = schedule::next_fire(&cron_schedule);

        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name,
            cron_expression: request.cron_expression,
            description: request.description,
            status: JobStatus::Active,
            next_run,
            created_at: Local::now(),
            last_run: None,
            overwrite: request.overwrite,
            max_tables: request.max_tables,
        };

        let (next_tx, next_rx) = watch::channel(next_run);
        let trigger = tokio::spawn(trigger_loop(
            Arc::downgrade(&self.shared),
            job.id.clone(),
            cron_schedule,
            next_tx,
        ));

        let entry = JobEntry {
            job: job.clone(),
            running: Arc::new(AtomicBool::new(false)),
            trigger: Some(trigger),
            next_run: next_rx,
        };
        self.shared.jobs.write().await.insert(job.id.clone(), entry);

        tracing::info!(
            "job '{}' ({}) registered, next run {:?}",
            job.name,
            job.id,
            job.next_run
        );
        Ok(job)
    }

    /// Jobs in registration order
    pub async fn list(&self) -> Vec<Job> {
        self.shared
            .jobs
            .read()
            .await
            .values()
            .map(JobEntry::snapshot)
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.shared.jobs.read().await.get(id).map(JobEntry::snapshot)
    }

    pub async fn count(&self) -> usize {
        self.shared.jobs.read().await.len()
    }

    /// Stop the trigger and forget the job. A fire already running finishes.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let entry = self
            .shared
            .jobs
            .write()
            .await
            .shift_remove(id)
            .ok_or_else(|| SyncError::NotFound(format!("job {} not found", id)))?;

        if let Some(trigger) = entry.trigger {
            trigger.abort();
        }
        tracing::info!("job '{}' ({}) removed", entry.job.name, id);
        Ok(())
    }

    /// Run a job now through the same guarded path its trigger uses
    pub async fn fire(&self, id: &str) -> Result<FireOutcome> {
        self.shared.fire(id).await
    }

    /// Abort every trigger; job metadata stays listable
    pub async fn shutdown(&self) {
        let mut jobs = self.shared.jobs.write().await;
        for entry in jobs.values_mut() {
            if let Some(trigger) = entry.trigger.take() {
                trigger.abort();
            }
        }
        tracing::info!("scheduler stopped ({} jobs)", jobs.len());
    }
}
