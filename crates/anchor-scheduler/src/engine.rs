//! Scheduler engine — one filter → score → bind attempt for one workload.
//!
//! The engine reads candidates from the [`ClusterStateCache`], drops nodes
//! that fail a hard predicate, ranks the rest with the [`NodeScorer`], and
//! binds the workload to the best-ranked node that still has room:
//!
//! 1. reserve the requested capacity in the cache (optimistic, local),
//!    falling through the ranking when a node cannot take the request;
//! 2. commit the binding to the workload record;
//! 3. bump the node's persisted pod count.
//!
//! Step 3 has no compensation: if it fails, the reservation and the binding
//! both stand. Notifying the chosen node is the controller's job.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use anchor_placement::{NodeScorer, check_predicates, requested_resources};
use anchor_state::{NodeId, StateStore, WorkloadSpec, WorkloadStatus, epoch_secs};

use crate::cache::ClusterStateCache;
use crate::error::{SchedulerError, SchedulerResult};

/// Phase recorded on a freshly bound workload.
pub const PHASE_STARTING: &str = "Starting";

/// Result of a successful scheduling attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub node_id: NodeId,
    pub node_name: String,
    pub score: f64,
}

pub struct SchedulerEngine {
    cache: Arc<ClusterStateCache>,
    scorer: NodeScorer,
    store: StateStore,
}

impl SchedulerEngine {
    pub fn new(cache: Arc<ClusterStateCache>, scorer: NodeScorer, store: StateStore) -> Self {
        Self { cache, scorer, store }
    }

    pub fn cache(&self) -> &Arc<ClusterStateCache> {
        &self.cache
    }

    pub fn scorer(&self) -> &NodeScorer {
        &self.scorer
    }

    /// Run one scheduling attempt for `workload_id`.
    pub async fn schedule_one(
        &self,
        workload_id: &str,
        spec: &WorkloadSpec,
    ) -> SchedulerResult<Binding> {
        let candidates = self.cache.candidate_nodes().await?;
        if candidates.is_empty() {
            return Err(SchedulerError::NoNodesAvailable);
        }
        debug!(%workload_id, candidates = candidates.len(), "scheduling attempt");

        let request = requested_resources(spec);
        let mut feasible = Vec::with_capacity(candidates.len());
        let mut rejections = Vec::new();
        for node in candidates {
            match check_predicates(&node, spec, &request) {
                Ok(()) => feasible.push(node),
                Err(reason) => {
                    debug!(%workload_id, node_id = %node.node_id, %reason, "node filtered out");
                    rejections.push((node.node_id, reason));
                }
            }
        }

        let ranked = self.scorer.rank(&feasible, spec);
        let Some(best) = ranked.first() else {
            warn!(%workload_id, rejected = rejections.len(), "no node satisfies constraints");
            return Err(SchedulerError::PredicateFailure { rejections });
        };

        // Walk down the ranking until a node has room for the request.
        let mut reserved = None;
        for candidate in &ranked {
            let node = &feasible[candidate.index];
            if self.cache.reserve_resources(&node.node_id, &request).await {
                reserved = Some((node, candidate.score));
                break;
            }
            debug!(
                %workload_id,
                node_id = %node.node_id,
                score = candidate.score,
                "no room to reserve, trying next node"
            );
        }
        let Some((node, score)) = reserved else {
            let top = &feasible[best.index];
            warn!(%workload_id, node_id = %top.node_id, "reservation conflict on every feasible node");
            return Err(SchedulerError::ReservationConflict(top.node_id.clone()));
        };
        info!(%workload_id, node_id = %node.node_id, score, "node selected");

        let now = epoch_secs();
        self.store
            .update_workload(workload_id, |record| {
                record.node_id = Some(node.node_id.clone());
                record.node_name = Some(node.name.clone());
                record.status = WorkloadStatus::Running;
                record.phase = Some(PHASE_STARTING.to_string());
                record.scheduled_at = Some(now);
                record.updated_at = now;
            })?
            .ok_or_else(|| SchedulerError::WorkloadVanished(workload_id.to_string()))?;

        if !self.store.record_node_binding(&node.node_id, now)? {
            debug!(node_id = %node.node_id, "no persisted node record; pod count not updated");
        }

        info!(%workload_id, node_id = %node.node_id, "binding committed");
        Ok(Binding {
            node_id: node.node_id.clone(),
            node_name: node.name.clone(),
            score,
        })
    }
}
