//! Per-node assignment channels.
//!
//! Each connected node agent registers a private channel and receives a
//! [`PodAssignment`] whenever a workload is bound to it. Nodes that are not
//! connected miss the event; a failed delivery never undoes a binding.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use anchor_state::{NodeId, WorkloadId, WorkloadSpec};

/// Default buffer of undelivered assignments per node.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Instruction for a node to start a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodAssignment {
    pub workload_id: WorkloadId,
    pub spec: WorkloadSpec,
    pub namespace: String,
}

/// Registry of per-node assignment channels.
#[derive(Clone)]
pub struct NodeChannels {
    senders: Arc<RwLock<HashMap<NodeId, mpsc::Sender<PodAssignment>>>>,
    capacity: usize,
}

impl Default for NodeChannels {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl NodeChannels {
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Open a channel for `node_id`, replacing any previous registration.
    pub async fn register(&self, node_id: &str) -> mpsc::Receiver<PodAssignment> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let replaced = self.senders.write().await.insert(node_id.to_string(), tx).is_some();
        info!(%node_id, replaced, "node channel registered");
        rx
    }

    pub async fn unregister(&self, node_id: &str) -> bool {
        let removed = self.senders.write().await.remove(node_id).is_some();
        if removed {
            debug!(%node_id, "node channel unregistered");
        }
        removed
    }

    /// Deliver an assignment to `node_id`. Returns whether it was queued.
    ///
    /// Closed channels are dropped from the registry.
    pub async fn send(&self, node_id: &str, assignment: PodAssignment) -> bool {
        let sender = self.senders.read().await.get(node_id).cloned();
        let Some(sender) = sender else {
            warn!(%node_id, workload_id = %assignment.workload_id, "node not connected; assignment dropped");
            return false;
        };

        let workload_id = assignment.workload_id.clone();
        match sender.try_send(assignment) {
            Ok(()) => {
                info!(%node_id, %workload_id, "assignment sent");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%node_id, %workload_id, "node channel full; assignment dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unregister(node_id).await;
                warn!(%node_id, %workload_id, "node channel closed; assignment dropped");
                false
            }
        }
    }

    /// IDs of nodes with a registered channel, sorted.
    pub async fn connected_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.senders.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
