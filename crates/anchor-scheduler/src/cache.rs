//! Cluster state cache — the scheduler's local informer.
//!
//! Mirrors node status and capacity in memory so the scheduling hot path
//! never reads the authoritative store. The cache is hydrated once from the
//! store at startup and then kept current by an informer task consuming the
//! [`UpdateBus`](crate::updates::UpdateBus).
//!
//! Snapshots are kept in first-seen order. That order is what
//! [`ClusterStateCache::candidate_nodes`] returns and what breaks score ties.
//!
//! Reservations made through [`ClusterStateCache::reserve_resources`] are
//! local to this instance: they are not published to other caches or
//! written to the store. Two instances can therefore approve the same
//! capacity independently.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use anchor_placement::{GpuKey, NodeSnapshot, ResourceRequest, record_to_snapshot};
use anchor_state::{NodeId, NodeRecord, StateStore, epoch_millis};

use crate::error::{SchedulerError, SchedulerResult};
use crate::updates::NodeUpdate;

#[derive(Default)]
struct CacheInner {
    nodes: HashMap<NodeId, NodeSnapshot>,
    /// Node IDs in first-seen order.
    order: Vec<NodeId>,
    by_region: HashMap<String, HashSet<NodeId>>,
    by_gpu: HashMap<GpuKey, HashSet<NodeId>>,
}

impl CacheInner {
    /// Merge a change into a node's snapshot, creating it if unknown, and
    /// keep the secondary indexes in step.
    fn upsert(&mut self, node_id: &str, now_ms: u64, f: impl FnOnce(&mut NodeSnapshot)) {
        if !self.nodes.contains_key(node_id) {
            self.nodes.insert(node_id.to_string(), NodeSnapshot::new(node_id));
            self.order.push(node_id.to_string());
        }
        let Some(snap) = self.nodes.get_mut(node_id) else {
            return;
        };

        let old_region = snap.region.clone();
        let old_gpu = snap.gpu_key();
        f(snap);
        snap.node_id = node_id.to_string();
        snap.last_seen_ms = now_ms;
        let new_region = snap.region.clone();
        let new_gpu = snap.gpu_key();

        reindex(&mut self.by_region, node_id, old_region, new_region);
        reindex(&mut self.by_gpu, node_id, old_gpu, new_gpu);
    }

    fn ordered(&self, ids: &HashSet<NodeId>) -> Vec<NodeId> {
        self.order.iter().filter(|id| ids.contains(*id)).cloned().collect()
    }
}

/// Move `node_id` from the `old` bucket to the `new` one.
fn reindex<K: Eq + Hash>(
    index: &mut HashMap<K, HashSet<NodeId>>,
    node_id: &str,
    old: Option<K>,
    new: Option<K>,
) {
    if let Some(old) = old {
        if let Some(set) = index.get_mut(&old) {
            set.remove(node_id);
            if set.is_empty() {
                index.remove(&old);
            }
        }
    }
    if let Some(new) = new {
        index.entry(new).or_default().insert(node_id.to_string());
    }
}

/// In-memory, eventually-consistent mirror of fleet nodes.
#[derive(Default)]
pub struct ClusterStateCache {
    inner: RwLock<CacheInner>,
    ready: AtomicBool,
}

impl ClusterStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every non-offline node record from the store and mark the cache
    /// ready. Returns the number of nodes loaded.
    ///
    /// On error the cache stays unready and serves no candidates.
    pub async fn hydrate(&self, store: &StateStore) -> SchedulerResult<usize> {
        let records = store.list_active_nodes()?;
        for record in &records {
            self.apply_record(record).await;
        }
        self.ready.store(true, Ordering::Release);
        info!(nodes = records.len(), "cluster state hydrated");
        Ok(records.len())
    }

    /// Overwrite a node's snapshot with a persisted record.
    pub async fn apply_record(&self, record: &NodeRecord) {
        let now = epoch_millis();
        let mut inner = self.inner.write().await;
        inner.upsert(&record.id, now, |snap| *snap = record_to_snapshot(record, now));
    }

    /// Merge a live update. Unknown node IDs create a default snapshot.
    pub async fn apply_update(&self, update: &NodeUpdate) {
        let now = epoch_millis();
        let mut inner = self.inner.write().await;
        match update {
            NodeUpdate::Metrics { node_id, metrics } => {
                inner.upsert(node_id, now, |snap| metrics.apply_to(&mut snap.metrics));
            }
            NodeUpdate::Status { node_id, status } => {
                inner.upsert(node_id, now, |snap| snap.status = Some(*status));
            }
        }
        debug!(node_id = %update.node_id(), "node update applied");
    }

    /// Every Online or Idle node, in first-seen order.
    pub async fn candidate_nodes(&self) -> SchedulerResult<Vec<NodeSnapshot>> {
        if !self.is_ready() {
            return Err(SchedulerError::CacheNotReady);
        }
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.nodes.get(id))
            .filter(|snap| snap.is_schedulable())
            .cloned()
            .collect())
    }

    /// Optimistically reserve capacity on a node.
    ///
    /// Returns false without touching the node if it is unknown or if the
    /// CPU reservation would take it past 100%. Otherwise adds the request
    /// to the node's CPU and RAM usage and returns true.
    pub async fn reserve_resources(&self, node_id: &str, request: &ResourceRequest) -> bool {
        let mut inner = self.inner.write().await;
        let Some(snap) = inner.nodes.get_mut(node_id) else {
            return false;
        };
        if snap.metrics.cpu_usage_percent + request.cpu > 100.0 {
            return false;
        }
        snap.metrics.cpu_usage_percent += request.cpu;
        snap.metrics.ram_usage_percent += request.ram;
        snap.last_seen_ms = epoch_millis();
        true
    }

    /// Node IDs in `region`.
    pub async fn nodes_in_region(&self, region: &str) -> Vec<NodeId> {
        let inner = self.inner.read().await;
        inner.by_region.get(region).map(|ids| inner.ordered(ids)).unwrap_or_default()
    }

    /// Node IDs carrying the given GPU model and memory size.
    pub async fn nodes_with_gpu(&self, gpu_type: &str, vram_gib: Option<u32>) -> Vec<NodeId> {
        let key = GpuKey { gpu_type: gpu_type.to_string(), vram_gib };
        let inner = self.inner.read().await;
        inner.by_gpu.get(&key).map(|ids| inner.ordered(ids)).unwrap_or_default()
    }

    pub async fn snapshot(&self, node_id: &str) -> Option<NodeSnapshot> {
        self.inner.read().await.nodes.get(node_id).cloned()
    }

    /// All cached nodes regardless of status, in first-seen order.
    pub async fn all_nodes(&self) -> Vec<NodeSnapshot> {
        let inner = self.inner.read().await;
        inner.order.iter().filter_map(|id| inner.nodes.get(id)).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.nodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Spawn the informer task applying updates from `updates` until
    /// `shutdown` fires or the bus closes.
    pub fn spawn_informer(
        self: &Arc<Self>,
        updates: broadcast::Receiver<NodeUpdate>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move { run_informer(cache, updates, shutdown).await })
    }
}

async fn run_informer(
    cache: Arc<ClusterStateCache>,
    mut updates: broadcast::Receiver<NodeUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("informer starting");
    loop {
        tokio::select! {
            received = updates.recv() => match received {
                Ok(update) => cache.apply_update(&update).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "informer lagged behind the update bus; updates dropped");
                }
                Err(RecvError::Closed) => {
                    debug!("update bus closed, informer exiting");
                    break;
                }
            },
            _ = shutdown.changed() => {
                debug!("informer shutting down");
                break;
            }
        }
    }
}
