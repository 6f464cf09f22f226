//! Scheduler error types.

use thiserror::Error;

use anchor_placement::PredicateRejection;
use anchor_state::{JobId, NodeId, WorkloadId};

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no online or idle nodes available")]
    NoNodesAvailable,

    #[error("no node satisfies the workload's constraints ({} rejected)", .rejections.len())]
    PredicateFailure {
        /// Why each candidate was filtered out, in snapshot order.
        rejections: Vec<(NodeId, PredicateRejection)>,
    },

    #[error("reservation on node {0} lost a capacity race")]
    ReservationConflict(NodeId),

    #[error("workload not found: {0}")]
    WorkloadVanished(WorkloadId),

    #[error("cluster state cache has not been hydrated")]
    CacheNotReady,

    #[error("lease on job {0} is no longer held")]
    LeaseLost(JobId),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("scheduling attempt timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid node update: {0}")]
    InvalidUpdate(#[from] serde_json::Error),

    #[error(transparent)]
    State(#[from] anchor_state::StateError),
}

impl SchedulerError {
    /// Whether the work queue should retry the job that produced this error.
    ///
    /// A lost lease means another worker owns the job now.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SchedulerError::LeaseLost(_))
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
