//! Scheduler controller — the public surface of the scheduling core.
//!
//! The `SchedulerController`:
//! - admits workloads (persist a Pending record, then enqueue a job)
//! - drives a bounded worker pool that leases jobs and runs the engine
//! - notifies the bound node on success
//! - on failure records the reason, reverts the workload to Pending and
//!   hands the job back to the queue for retry with backoff
//! - applies execution-status reports from node agents
//!
//! A crash between persisting a record and enqueueing its job leaves a
//! Pending record with no job. Nothing here reconciles those.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use anchor_state::{
    BackoffPolicy, StateStore, WorkloadId, WorkloadRecord, WorkloadSpec, WorkloadStatus,
    epoch_secs,
};

use crate::engine::{Binding, SchedulerEngine};
use crate::error::{SchedulerError, SchedulerResult};
use crate::notify::{NodeChannels, PodAssignment};
use crate::queue::{DEFAULT_MAX_ATTEMPTS, FailOutcome, JobOptions, LeasedJob, WorkQueue};

/// Phase recorded on a newly admitted workload.
pub const PHASE_SCHEDULING: &str = "Scheduling";

/// Worker-pool and retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Maximum jobs processed at once.
    pub concurrency: usize,
    /// How long a worker holds a job before it may be re-leased.
    pub lease: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Idle queue poll period.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            lease: Duration::from_secs(60),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Execution-status report sent by a node agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: WorkloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SchedulerController {
    store: StateStore,
    engine: Arc<SchedulerEngine>,
    queue: WorkQueue,
    channels: NodeChannels,
    config: ControllerConfig,
}

impl SchedulerController {
    pub fn new(
        store: StateStore,
        engine: Arc<SchedulerEngine>,
        channels: NodeChannels,
        config: ControllerConfig,
    ) -> Self {
        Self {
            queue: WorkQueue::new(store.clone()),
            store,
            engine,
            channels,
            config,
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn channels(&self) -> &NodeChannels {
        &self.channels
    }

    pub fn engine(&self) -> &Arc<SchedulerEngine> {
        &self.engine
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Admit a workload: persist it as Pending, then enqueue its job.
    pub fn schedule_pod(&self, spec: WorkloadSpec) -> SchedulerResult<WorkloadRecord> {
        let now = epoch_secs();
        let record = WorkloadRecord {
            id: Uuid::new_v4().to_string(),
            name: spec.name.clone(),
            namespace: spec.namespace().to_string(),
            spec,
            status: WorkloadStatus::Pending,
            phase: Some(PHASE_SCHEDULING.to_string()),
            node_id: None,
            node_name: None,
            failure_reason: None,
            exit_code: None,
            created_at: now,
            scheduled_at: None,
            updated_at: now,
        };
        self.store.put_workload(&record)?;

        let options = JobOptions {
            priority: record.spec.priority(),
            max_attempts: self.config.max_attempts,
            backoff: self.config.backoff,
        };
        let job = self.queue.enqueue(&record.id, &record.spec, options)?;
        info!(
            workload_id = %record.id,
            job_id = %job.id,
            name = %record.name,
            namespace = %record.namespace,
            "workload admitted"
        );
        Ok(record)
    }

    pub fn get_pod(&self, workload_id: &str) -> SchedulerResult<Option<WorkloadRecord>> {
        Ok(self.store.get_workload(workload_id)?)
    }

    /// Workload records, newest first, optionally limited to one namespace.
    pub fn list_pods(&self, namespace: Option<&str>) -> SchedulerResult<Vec<WorkloadRecord>> {
        let mut records = self.store.list_workloads()?;
        if let Some(namespace) = namespace {
            records.retain(|r| r.namespace == namespace);
        }
        Ok(records)
    }

    /// Delete a workload record together with its scheduling jobs.
    ///
    /// Returns false if no record existed.
    pub fn delete_pod(&self, workload_id: &str) -> SchedulerResult<bool> {
        let existed = self.store.delete_workload(workload_id)?;
        let jobs = self.queue.remove_for_workload(workload_id)?;
        info!(%workload_id, existed, jobs, "pod deleted");
        Ok(existed)
    }

    /// Apply an execution-status report to a workload.
    pub fn report_status(
        &self,
        workload_id: &str,
        report: StatusReport,
    ) -> SchedulerResult<WorkloadRecord> {
        let now = epoch_secs();
        let record = self
            .store
            .update_workload(workload_id, |record| {
                record.status = report.status;
                if report.exit_code.is_some() {
                    record.exit_code = report.exit_code;
                }
                if let Some(error) = &report.error {
                    record.failure_reason = Some(error.clone());
                }
                record.updated_at = now;
            })?
            .ok_or_else(|| SchedulerError::WorkloadVanished(workload_id.to_string()))?;
        info!(%workload_id, status = ?record.status, exit_code = ?record.exit_code, "status reported");
        Ok(record)
    }

    /// Run the worker pool until `shutdown` fires, then wait for in-flight
    /// jobs to finish.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        info!(concurrency = self.config.concurrency, "scheduler workers started");

        loop {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "scheduling task panicked");
                }
            }

            let permit = tokio::select! {
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let leased = match self
                .queue
                .next(self.config.lease, self.config.poll_interval, &mut shutdown)
                .await
            {
                Ok(Some(leased)) => leased,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to lease scheduling job");
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => continue,
                        _ = shutdown.changed() => break,
                    }
                }
            };

            let controller = Arc::clone(&self);
            tasks.spawn(async move {
                let _permit = permit;
                // Failures are logged and recorded by process_job.
                let _ = controller.process_job(leased).await;
            });
        }

        info!(in_flight = tasks.len(), "scheduler workers stopping");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "scheduling task panicked");
            }
        }
        info!("scheduler workers stopped");
    }

    /// Run one leased job through the engine and settle it with the queue.
    ///
    /// The engine commits the binding before the lease is checked again, so
    /// an attempt that outlives its lease can bind a workload another worker
    /// is also scheduling.
    pub async fn process_job(&self, leased: LeasedJob) -> SchedulerResult<Binding> {
        let LeasedJob { job, token } = leased;
        debug!(job_id = %job.id, workload_id = %job.workload_id, attempt = job.attempts_made, "processing job");

        let attempt = self.engine.schedule_one(&job.workload_id, &job.spec);
        let result = match tokio::time::timeout(self.config.lease, attempt).await {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::Timeout(self.config.lease)),
        };

        match result {
            Ok(binding) => {
                let assignment = PodAssignment {
                    workload_id: job.workload_id.clone(),
                    spec: job.spec.clone(),
                    namespace: job.spec.namespace().to_string(),
                };
                self.channels.send(&binding.node_id, assignment).await;

                if let Err(e) = self.queue.complete(&job.id, &token) {
                    warn!(job_id = %job.id, error = %e, "could not mark job completed");
                }
                Ok(binding)
            }
            Err(err) => {
                let reason = err.to_string();
                self.record_failure(&job.workload_id, &reason);

                if err.is_retryable() {
                    match self.queue.fail(&job.id, &token, &reason) {
                        Ok(FailOutcome::Retrying { delay }) => warn!(
                            job_id = %job.id,
                            workload_id = %job.workload_id,
                            attempt = job.attempts_made,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %reason,
                            "scheduling attempt failed; will retry"
                        ),
                        Ok(FailOutcome::Abandoned) => error!(
                            job_id = %job.id,
                            workload_id = %job.workload_id,
                            attempts = job.attempts_made,
                            error = %reason,
                            "scheduling job abandoned after exhausting attempts"
                        ),
                        Err(e) => warn!(job_id = %job.id, error = %e, "could not record job failure"),
                    }
                } else {
                    warn!(job_id = %job.id, error = %reason, "scheduling attempt failed; not retried");
                }
                Err(err)
            }
        }
    }

    /// Revert a workload to Pending with `reason`. Missing records are ignored.
    fn record_failure(&self, workload_id: &WorkloadId, reason: &str) {
        let now = epoch_secs();
        let updated = self.store.update_workload(workload_id, |record| {
            record.status = WorkloadStatus::Pending;
            record.failure_reason = Some(reason.to_string());
            record.updated_at = now;
        });
        match updated {
            Ok(Some(_)) => {}
            Ok(None) => debug!(%workload_id, "failed workload no longer exists"),
            Err(e) => error!(%workload_id, error = %e, "failed to record scheduling failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ClusterStateCache;
    use crate::updates::{MetricsPatch, NodeUpdate};
    use anchor_placement::NodeScorer;
    use anchor_state::*;

    const LEASE: Duration = Duration::from_secs(60);

    async fn controller(config: ControllerConfig) -> Arc<SchedulerController> {
        let store = StateStore::open_in_memory().unwrap();
        let cache = Arc::new(ClusterStateCache::new());
        cache.hydrate(&store).await.unwrap();
        let engine = Arc::new(SchedulerEngine::new(cache, NodeScorer::default(), store.clone()));
        Arc::new(SchedulerController::new(store, engine, NodeChannels::default(), config))
    }

    async fn add_node(ctl: &SchedulerController, id: &str, cpu: f64) {
        let cache = ctl.engine().cache();
        cache
            .apply_update(&NodeUpdate::Status { node_id: id.into(), status: NodeStatus::Online })
            .await;
        cache
            .apply_update(&NodeUpdate::Metrics {
                node_id: id.into(),
                metrics: MetricsPatch { cpu_usage_percent: Some(cpu), ram_usage_percent: Some(cpu) },
            })
            .await;
    }

    fn spec(name: &str) -> WorkloadSpec {
        WorkloadSpec { name: name.to_string(), ..WorkloadSpec::default() }
    }

    #[tokio::test]
    async fn admission_persists_then_enqueues() {
        let ctl = controller(ControllerConfig::default()).await;
        let mut s = spec("trainer");
        s.priority = Some(3);
        let record = ctl.schedule_pod(s).unwrap();

        assert_eq!(record.status, WorkloadStatus::Pending);
        assert_eq!(record.phase.as_deref(), Some(PHASE_SCHEDULING));
        assert_eq!(record.namespace, "default");
        assert_eq!(ctl.get_pod(&record.id).unwrap(), Some(record.clone()));

        let jobs = ctl.queue().jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].workload_id, record.id);
        assert_eq!(jobs[0].priority, 3);
        assert_eq!(jobs[0].max_attempts, 5);
        assert_eq!(jobs[0].backoff, BackoffPolicy::Exponential { delay_ms: 1000 });
    }

    #[tokio::test]
    async fn success_notifies_node_and_completes_job() {
        let ctl = controller(ControllerConfig::default()).await;
        add_node(&ctl, "n1", 10.0).await;
        let mut rx = ctl.channels().register("n1").await;

        let record = ctl.schedule_pod(spec("web")).unwrap();
        let leased = ctl.queue().lease(LEASE).unwrap().unwrap();
        let job_id = leased.job.id.clone();

        let binding = ctl.process_job(leased).await.unwrap();
        assert_eq!(binding.node_id, "n1");

        let assignment = rx.recv().await.unwrap();
        assert_eq!(assignment.workload_id, record.id);
        assert_eq!(assignment.namespace, "default");
        assert_eq!(ctl.queue().get(&job_id).unwrap().unwrap().state, JobState::Completed);

        let stored = ctl.get_pod(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, WorkloadStatus::Running);
        assert_eq!(stored.node_id.as_deref(), Some("n1"));
    }

    #[tokio::test]
    async fn failure_reverts_to_pending_and_retries() {
        let ctl = controller(ControllerConfig::default()).await;
        let record = ctl.schedule_pod(spec("web")).unwrap();
        let leased = ctl.queue().lease(LEASE).unwrap().unwrap();
        let job_id = leased.job.id.clone();

        let err = ctl.process_job(leased).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoNodesAvailable));

        let stored = ctl.get_pod(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, WorkloadStatus::Pending);
        assert_eq!(stored.failure_reason.as_deref(), Some("no online or idle nodes available"));

        let job = ctl.queue().get(&job_id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts_made, 1);
        assert!(job.run_at_ms > job.updated_at_ms);
    }

    #[tokio::test]
    async fn exhausted_job_is_abandoned_and_workload_stays_pending() {
        let config = ControllerConfig {
            max_attempts: 2,
            backoff: BackoffPolicy::Fixed { delay_ms: 0 },
            ..ControllerConfig::default()
        };
        let ctl = controller(config).await;
        let record = ctl.schedule_pod(spec("web")).unwrap();

        for _ in 0..2 {
            let leased = ctl.queue().lease(LEASE).unwrap().unwrap();
            ctl.process_job(leased).await.unwrap_err();
        }
        assert!(ctl.queue().lease(LEASE).unwrap().is_none());
        assert_eq!(ctl.queue().counts().unwrap().abandoned, 1);

        let stored = ctl.get_pod(&record.id).unwrap().unwrap();
        assert_eq!(stored.status, WorkloadStatus::Pending);
        assert!(stored.failure_reason.is_some());
    }

    #[tokio::test]
    async fn report_status_terminates_workload() {
        let ctl = controller(ControllerConfig::default()).await;
        let record = ctl.schedule_pod(spec("batch")).unwrap();

        let updated = ctl
            .report_status(
                &record.id,
                StatusReport { status: WorkloadStatus::Failed, exit_code: Some(1), error: Some("oom".into()) },
            )
            .unwrap();
        assert_eq!(updated.status, WorkloadStatus::Failed);
        assert_eq!(updated.exit_code, Some(1));
        assert_eq!(updated.failure_reason.as_deref(), Some("oom"));

        let err = ctl
            .report_status("missing", StatusReport { status: WorkloadStatus::Completed, exit_code: None, error: None })
            .unwrap_err();
        assert!(matches!(err, SchedulerError::WorkloadVanished(_)));
    }

    #[tokio::test]
    async fn list_filters_by_namespace() {
        let ctl = controller(ControllerConfig::default()).await;
        let mut ml = spec("trainer");
        ml.namespace = Some("ml".to_string());
        ctl.schedule_pod(ml).unwrap();
        ctl.schedule_pod(spec("web")).unwrap();

        assert_eq!(ctl.list_pods(None).unwrap().len(), 2);
        let ml_pods = ctl.list_pods(Some("ml")).unwrap();
        assert_eq!(ml_pods.len(), 1);
        assert_eq!(ml_pods[0].name, "trainer");

        assert!(ctl.delete_pod(&ml_pods[0].id).unwrap());
        assert_eq!(ctl.list_pods(Some("ml")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn delete_pod_drops_queued_job() {
        let ctl = controller(ControllerConfig::default()).await;
        let gone = ctl.schedule_pod(spec("gone")).unwrap();
        let kept = ctl.schedule_pod(spec("kept")).unwrap();

        assert!(ctl.delete_pod(&gone.id).unwrap());
        assert!(!ctl.delete_pod(&gone.id).unwrap());
        assert_eq!(ctl.get_pod(&gone.id).unwrap(), None);

        let jobs = ctl.queue().jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].workload_id, kept.id);
        assert_eq!(ctl.queue().counts().unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn worker_pool_schedules_and_drains_on_shutdown() {
        let config = ControllerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            ..ControllerConfig::default()
        };
        let ctl = controller(config).await;
        add_node(&ctl, "n1", 0.0).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(Arc::clone(&ctl).run(shutdown_rx));

        let ids: Vec<String> = (0..3).map(|i| ctl.schedule_pod(spec(&format!("p{i}"))).unwrap().id).collect();

        for _ in 0..200 {
            if ctl.queue().counts().unwrap().completed == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), worker).await.unwrap().unwrap();

        for id in ids {
            let stored = ctl.get_pod(&id).unwrap().unwrap();
            assert_eq!(stored.status, WorkloadStatus::Running);
            assert_eq!(stored.node_id.as_deref(), Some("n1"));
        }
    }
}
