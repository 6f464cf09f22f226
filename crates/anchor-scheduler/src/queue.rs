//! Durable, priority-ordered work queue of scheduling jobs.
//!
//! Jobs live in the store's `jobs` table, so queued work survives a
//! restart and several controller instances sharing one store see the same
//! queue. A worker leases a job for a bounded time; the lease token it
//! receives must accompany `complete` / `fail`. If the lease runs out first,
//! the job becomes leasable again and the old token stops working.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, watch};
use tracing::debug;
use uuid::Uuid;

use anchor_state::{
    BackoffPolicy, DEFAULT_PRIORITY, JobState, SchedulingJob, StateStore, WorkloadSpec, epoch_millis,
};

use crate::error::{SchedulerError, SchedulerResult};

/// Default number of attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Per-job queue options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobOptions {
    /// Lower is more urgent.
    pub priority: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// A job claimed by a worker, with the token proving the claim.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job: SchedulingJob,
    pub token: String,
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Waiting again; runnable after `delay`.
    Retrying { delay: Duration },
    /// Attempts exhausted.
    Abandoned,
}

/// Job counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    /// Waiting, but backing off.
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub abandoned: usize,
}

#[derive(Clone)]
pub struct WorkQueue {
    store: StateStore,
    wake: Arc<Notify>,
}

impl WorkQueue {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Add a job for `workload_id`. It is runnable immediately.
    pub fn enqueue(
        &self,
        workload_id: &str,
        spec: &WorkloadSpec,
        options: JobOptions,
    ) -> SchedulerResult<SchedulingJob> {
        let now = epoch_millis();
        let job = self.store.insert_job(SchedulingJob {
            id: Uuid::new_v4().to_string(),
            workload_id: workload_id.to_string(),
            spec: spec.clone(),
            priority: options.priority,
            seq: 0,
            attempts_made: 0,
            max_attempts: options.max_attempts.max(1),
            backoff: options.backoff,
            state: JobState::Waiting,
            run_at_ms: now,
            lease: None,
            last_error: None,
            created_at_ms: now,
            updated_at_ms: now,
        })?;
        debug!(job_id = %job.id, %workload_id, priority = job.priority, "job enqueued");
        self.wake.notify_one();
        Ok(job)
    }

    /// Claim the most urgent runnable job, if any, for `lease`.
    pub fn lease(&self, lease: Duration) -> SchedulerResult<Option<LeasedJob>> {
        let token = Uuid::new_v4().to_string();
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX);
        let claimed = self.store.claim_next_job(epoch_millis(), lease_ms, &token)?;
        Ok(claimed.map(|job| {
            debug!(job_id = %job.id, attempt = job.attempts_made, "job leased");
            LeasedJob { job, token }
        }))
    }

    /// Wait for a leasable job.
    ///
    /// Wakes on enqueue and otherwise polls every `poll_interval`. Returns
    /// `None` once `shutdown` fires.
    pub async fn next(
        &self,
        lease: Duration,
        poll_interval: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SchedulerResult<Option<LeasedJob>> {
        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }
            if let Some(leased) = self.lease(lease)? {
                return Ok(Some(leased));
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.changed() => return Ok(None),
            }
        }
    }

    /// Mark a leased job done.
    pub fn complete(&self, job_id: &str, token: &str) -> SchedulerResult<()> {
        let now = epoch_millis();
        let held = self
            .store
            .update_job(job_id, |job| {
                if !holds_lease(job, token) {
                    return false;
                }
                job.state = JobState::Completed;
                job.lease = None;
                job.updated_at_ms = now;
                true
            })?
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?
            .1;
        if !held {
            return Err(SchedulerError::LeaseLost(job_id.to_string()));
        }
        debug!(%job_id, "job completed");
        Ok(())
    }

    /// Record a failed attempt and either reschedule the job with backoff
    /// or abandon it when no attempts remain.
    pub fn fail(&self, job_id: &str, token: &str, reason: &str) -> SchedulerResult<FailOutcome> {
        let now = epoch_millis();
        let outcome = self
            .store
            .update_job(job_id, |job| {
                if !holds_lease(job, token) {
                    return None;
                }
                job.lease = None;
                job.last_error = Some(reason.to_string());
                job.updated_at_ms = now;
                if job.attempts_made < job.max_attempts {
                    let delay = job.backoff.delay_for(job.attempts_made);
                    job.state = JobState::Waiting;
                    job.run_at_ms =
                        now.saturating_add(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
                    Some(FailOutcome::Retrying { delay })
                } else {
                    job.state = JobState::Abandoned;
                    Some(FailOutcome::Abandoned)
                }
            })?
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?
            .1;
        outcome.ok_or_else(|| SchedulerError::LeaseLost(job_id.to_string()))
    }

    /// Drop every job belonging to `workload_id`, whatever its state.
    ///
    /// A worker still holding one of them gets `JobNotFound` when it
    /// reports back.
    pub fn remove_for_workload(&self, workload_id: &str) -> SchedulerResult<usize> {
        let mut removed = 0;
        for job in self.store.list_jobs()? {
            if job.workload_id == workload_id && self.store.delete_job(&job.id)? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(%workload_id, removed, "jobs removed");
        }
        Ok(removed)
    }

    pub fn get(&self, job_id: &str) -> SchedulerResult<Option<SchedulingJob>> {
        Ok(self.store.get_job(job_id)?)
    }

    /// All jobs in enqueue order.
    pub fn jobs(&self) -> SchedulerResult<Vec<SchedulingJob>> {
        Ok(self.store.list_jobs()?)
    }

    pub fn counts(&self) -> SchedulerResult<QueueCounts> {
        let now = epoch_millis();
        let mut counts = QueueCounts::default();
        for job in self.store.list_jobs()? {
            match job.state {
                JobState::Waiting if job.run_at_ms > now => counts.delayed += 1,
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Abandoned => counts.abandoned += 1,
            }
        }
        Ok(counts)
    }
}

fn holds_lease(job: &SchedulingJob, token: &str) -> bool {
    job.state == JobState::Active && job.lease.as_ref().is_some_and(|lease| lease.token == token)
}
