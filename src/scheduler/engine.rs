//! Job scheduler adapter
//!
//! Cron observers register their flush as a recurring job here. The scheduler
//! owns the timer; the job closure owns the effect.

use crate::error::SchedulerError;
use crate::scheduler::CronTrigger;
use chrono::{Local, NaiveDateTime};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// One run of a job
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A recurring unit of work: each call produces one run
pub type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Cron-capable job scheduler
pub trait JobScheduler: Send + Sync {
    /// Schedule `job` to run on every `trigger` fire time under `id`
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::DuplicateJob` if `id` is already scheduled.
    fn add_job(&self, id: &str, trigger: CronTrigger, job: Job) -> Result<(), SchedulerError>;

    /// Deregister a job; no further runs start once this returns
    ///
    /// Runs already in flight are not cancelled.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::JobNotFound` if `id` is not scheduled.
    fn remove_job(&self, id: &str) -> Result<(), SchedulerError>;

    /// Ids of every scheduled job
    fn job_ids(&self) -> Vec<String>;
}

/// Scheduler running each job as a timer task on a tokio runtime
pub struct TokioScheduler {
    handle: Handle,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioScheduler {
    /// Create a scheduler spawning its timers on the given runtime
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Abort every timer
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        for (id, timer) in jobs.drain() {
            debug!("Cancelling job {}", id);
            timer.abort();
        }
    }

    /// Timer loop for one job
    async fn run(id: String, trigger: CronTrigger, job: Job) {
        let mut last_fire: Option<NaiveDateTime> = None;

        loop {
            let now = Local::now();
            let cursor = match last_fire {
                Some(fired) if fired > now.naive_local() => fired,
                _ => now.naive_local(),
            };

            let Some((fire_at, wall_clock)) = Self::next_fire(&trigger, cursor) else {
                warn!("Job {} has no future fire time for '{}', stopping", id, trigger);
                return;
            };

            let wait = (wall_clock - Local::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            debug!("Running job {}", id);
            // Spawned separately so deregistering the timer never cuts a run short
            tokio::spawn(job());
            last_fire = Some(fire_at);
        }
    }

    /// Next fire time after `cursor`, skipping local times that do not exist
    fn next_fire(
        trigger: &CronTrigger,
        mut cursor: NaiveDateTime,
    ) -> Option<(NaiveDateTime, chrono::DateTime<Local>)> {
        loop {
            let next = trigger.next_after(cursor)?;
            match next.and_local_timezone(Local).earliest() {
                Some(wall_clock) => return Some((next, wall_clock)),
                None => cursor = next,
            }
        }
    }
}

impl JobScheduler for TokioScheduler {
    fn add_job(&self, id: &str, trigger: CronTrigger, job: Job) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if jobs.contains_key(id) {
            return Err(SchedulerError::DuplicateJob(id.to_string()));
        }

        info!("Scheduling job {} with cron '{}'", id, trigger);
        let timer = self
            .handle
            .spawn(Self::run(id.to_string(), trigger, job));
        jobs.insert(id.to_string(), timer);
        Ok(())
    }

    fn remove_job(&self, id: &str) -> Result<(), SchedulerError> {
        let timer = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
        timer.abort();
        info!("Removed job {}", id);
        Ok(())
    }

    fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
