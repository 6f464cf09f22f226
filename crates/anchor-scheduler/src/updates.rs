//! Node updates and the bus that carries them to cluster state caches.
//!
//! Publishers (node agents, the API, tests) push [`NodeUpdate`]s onto an
//! [`UpdateBus`]; every subscribed cache receives its own copy. Delivery is
//! at-least-once with no ordering across publishers, so each update is an
//! idempotent partial merge.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use anchor_state::{NodeId, NodeMetrics, NodeStatus};

use crate::error::SchedulerResult;

/// Partial metrics report. Absent fields keep their cached value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_usage_percent: Option<f64>,
}

impl MetricsPatch {
    /// Overwrite the fields present in this patch.
    pub fn apply_to(&self, metrics: &mut NodeMetrics) {
        if let Some(cpu) = self.cpu_usage_percent {
            metrics.cpu_usage_percent = cpu;
        }
        if let Some(ram) = self.ram_usage_percent {
            metrics.ram_usage_percent = ram;
        }
    }
}

impl From<NodeMetrics> for MetricsPatch {
    fn from(metrics: NodeMetrics) -> Self {
        Self {
            cpu_usage_percent: Some(metrics.cpu_usage_percent),
            ram_usage_percent: Some(metrics.ram_usage_percent),
        }
    }
}

/// A live change to one node's cached state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeUpdate {
    #[serde(rename = "NODE_METRICS", rename_all = "camelCase")]
    Metrics { node_id: NodeId, metrics: MetricsPatch },

    #[serde(rename = "NODE_STATUS", rename_all = "camelCase")]
    Status { node_id: NodeId, status: NodeStatus },
}

impl NodeUpdate {
    /// Decode a wire message such as
    /// `{"type":"NODE_STATUS","nodeId":"n1","status":"Online"}`.
    pub fn from_json(raw: &str) -> SchedulerResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn node_id(&self) -> &str {
        match self {
            NodeUpdate::Metrics { node_id, .. } | NodeUpdate::Status { node_id, .. } => node_id,
        }
    }
}

/// Broadcast channel carrying node updates to every subscribed cache.
#[derive(Debug, Clone)]
pub struct UpdateBus {
    tx: broadcast::Sender<NodeUpdate>,
}

impl UpdateBus {
    /// Create a bus buffering up to `capacity` updates per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an update. Returns how many subscribers received it.
    pub fn publish(&self, update: NodeUpdate) -> usize {
        let node_id = update.node_id().to_string();
        let receivers = self.tx.send(update).unwrap_or(0);
        debug!(%node_id, receivers, "node update published");
        receivers
    }

    /// Decode and publish a raw JSON update.
    pub fn publish_json(&self, raw: &str) -> SchedulerResult<usize> {
        Ok(self.publish(NodeUpdate::from_json(raw)?))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeUpdate> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
