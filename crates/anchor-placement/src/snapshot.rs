//! Node snapshot — the scheduler's local view of one fleet node.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use anchor_state::{NodeId, NodeMetrics, NodeSpecs, NodeStatus, Taint};

/// Cached state of a node, merged from its persisted record and live updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub name: String,
    /// `None` until a record or status update has been seen.
    pub status: Option<NodeStatus>,
    pub metrics: NodeMetrics,
    pub specs: NodeSpecs,
    pub labels: HashMap<String, String>,
    /// Carried for completeness; no predicate consults them yet.
    pub taints: Vec<Taint>,
    pub region: Option<String>,
    pub cached_images: HashSet<String>,
    pub pod_count: u32,
    pub last_scheduled_at: Option<u64>,
    /// Epoch milliseconds of the last mutation.
    pub last_seen_ms: u64,
}

impl NodeSnapshot {
    /// An otherwise-empty snapshot for a node known only by ID.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        let node_id = node_id.into();
        Self {
            name: node_id.clone(),
            node_id,
            status: None,
            metrics: NodeMetrics::default(),
            specs: NodeSpecs::default(),
            labels: HashMap::new(),
            taints: Vec::new(),
            region: None,
            cached_images: HashSet::new(),
            pod_count: 0,
            last_scheduled_at: None,
            last_seen_ms: 0,
        }
    }

    /// Whether the node is Online or Idle.
    pub fn is_schedulable(&self) -> bool {
        self.status.is_some_and(NodeStatus::is_schedulable)
    }

    /// Index key for the GPU this node carries, if any.
    pub fn gpu_key(&self) -> Option<GpuKey> {
        self.specs.has_gpu.then(|| GpuKey {
            gpu_type: self.specs.gpu_type.clone().unwrap_or_default(),
            vram_gib: self.specs.gpu_vram,
        })
    }
}

/// Secondary-index key grouping nodes by GPU model and memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GpuKey {
    pub gpu_type: String,
    pub vram_gib: Option<u32>,
}

impl fmt::Display for GpuKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vram_gib {
            Some(vram) => write!(f, "{}:{vram}", self.gpu_type),
            None => write!(f, "{}:?", self.gpu_type),
        }
    }
}
