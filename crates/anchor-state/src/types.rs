//! Domain types for the Anchor state store.
//!
//! These types represent the persisted state of workloads ("pods"), fleet
//! nodes, and durable scheduling jobs. Workload specs and node wire shapes
//! use camelCase field names so that Kubernetes-style JSON submitted by
//! clients round-trips unchanged.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Unique identifier for a workload record.
pub type WorkloadId = String;

/// Unique identifier for a node in the fleet.
pub type NodeId = String;

/// Unique identifier for a scheduling job.
pub type JobId = String;

/// Namespace used when a spec does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Queue priority used when a spec does not set one.
pub const DEFAULT_PRIORITY: u32 = 1;

// ── Workload spec ─────────────────────────────────────────────────

/// Specification of a workload as submitted for scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub resources: ResourceRequirements,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    /// Queue priority; lower numbers are leased first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

impl WorkloadSpec {
    /// Namespace, falling back to [`DEFAULT_NAMESPACE`].
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Queue priority. Missing or zero falls back to [`DEFAULT_PRIORITY`].
    pub fn priority(&self) -> u32 {
        self.priority.filter(|p| *p > 0).unwrap_or(DEFAULT_PRIORITY)
    }

    /// Image of the first container, if any.
    pub fn primary_image(&self) -> Option<&str> {
        self.containers
            .first()
            .map(|c| c.image.as_str())
            .filter(|image| !image.is_empty())
    }

    /// Preferred node-affinity terms (empty when none are set).
    pub fn preferred_affinity(&self) -> &[PreferredSchedulingTerm] {
        self.affinity
            .as_ref()
            .and_then(|a| a.node_affinity.as_ref())
            .map(|na| na.preferred_during_scheduling_ignored_during_execution.as_slice())
            .unwrap_or(&[])
    }

    /// Required node-affinity selector, if any.
    pub fn required_affinity(&self) -> Option<&NodeSelector> {
        self.affinity
            .as_ref()
            .and_then(|a| a.node_affinity.as_ref())
            .and_then(|na| na.required_during_scheduling_ignored_during_execution.as_ref())
    }
}

/// Resource block of a workload spec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: ResourceRequests,
}

/// Requested resources. CPU and memory accept either a number or a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourceRequests {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<u32>,
}

/// A resource quantity: `0.5`, `"500m"`, `"512Mi"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Quantity {
    Number(f64),
    Text(String),
}

/// A container within a workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// Affinity rules of a workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Affinity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_affinity: Option<NodeAffinity>,
}

/// Node affinity: hard (`required…`) and soft (`preferred…`) terms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeAffinity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_during_scheduling_ignored_during_execution: Option<NodeSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_during_scheduling_ignored_during_execution: Vec<PreferredSchedulingTerm>,
}

/// A set of selector terms; a node matches if any term matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelector {
    #[serde(default)]
    pub node_selector_terms: Vec<NodeSelectorTerm>,
}

/// A conjunction of label match expressions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelectorTerm {
    #[serde(default)]
    pub match_expressions: Vec<LabelRequirement>,
}

/// A weighted soft-affinity term.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PreferredSchedulingTerm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(default)]
    pub preference: NodeSelectorTerm,
}

/// One label match expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelRequirement {
    pub key: String,
    pub operator: LabelOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Label match operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

// ── Workload record ───────────────────────────────────────────────

/// Lifecycle status of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadStatus {
    Pending,
    Scheduling,
    Running,
    Completed,
    Failed,
}

/// Persisted workload record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRecord {
    pub id: WorkloadId,
    pub name: String,
    pub namespace: String,
    pub spec: WorkloadSpec,
    pub status: WorkloadStatus,
    /// Free-text sub-status, e.g. "Scheduling", "Starting".
    pub phase: Option<String>,
    /// Node the workload is bound to (set by a successful bind).
    pub node_id: Option<NodeId>,
    pub node_name: Option<String>,
    pub failure_reason: Option<String>,
    pub exit_code: Option<i32>,
    /// Unix timestamp (seconds) of admission.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last successful bind.
    pub scheduled_at: Option<u64>,
    /// Unix timestamp (seconds) of the last change.
    pub updated_at: u64,
}

// ── Node ──────────────────────────────────────────────────────────

/// Availability of a fleet node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Online,
    Idle,
    Busy,
    Offline,
}

impl NodeStatus {
    /// Whether nodes in this state may receive new workloads.
    pub fn is_schedulable(self) -> bool {
        matches!(self, NodeStatus::Online | NodeStatus::Idle)
    }
}

/// Utilization reported by a node, as percentages of capacity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    #[serde(default)]
    pub cpu_usage_percent: f64,
    #[serde(default)]
    pub ram_usage_percent: f64,
}

/// Static hardware description of a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpecs {
    #[serde(default)]
    pub has_gpu: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,
    /// GPU memory in GiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_vram: Option<u32>,
}

/// Effect of a node taint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// A node taint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: TaintEffect,
}

/// Persisted node record, owned by the node-lifecycle source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub id: NodeId,
    pub name: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub metrics: NodeMetrics,
    #[serde(default)]
    pub specs: NodeSpecs,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub cached_images: Vec<String>,
    #[serde(default)]
    pub pod_count: u32,
    /// Unix timestamp (seconds) of the last binding to this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scheduled_at: Option<u64>,
    /// Unix timestamp (seconds) of the last heartbeat.
    #[serde(default)]
    pub last_heartbeat: u64,
}

// ── Scheduling job ────────────────────────────────────────────────

/// Retry delay policy for a scheduling job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Fixed { delay_ms: u64 },
    Exponential { delay_ms: u64 },
}

impl BackoffPolicy {
    /// Delay before the next attempt, given the attempts made so far.
    ///
    /// Exponential backoff doubles per attempt: `delay × 2^(attempts_made − 1)`.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            BackoffPolicy::Exponential { delay_ms } => {
                let exp = attempts_made.saturating_sub(1).min(32);
                Duration::from_millis(delay_ms.saturating_mul(1u64 << exp))
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential { delay_ms: 1000 }
    }
}

/// Queue state of a scheduling job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Runnable once `run_at_ms` has passed.
    Waiting,
    /// Leased to a worker until the lease expires.
    Active,
    Completed,
    /// Attempts exhausted; no further automatic action.
    Abandoned,
}

/// A time-bounded claim a worker holds on a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    pub token: String,
    pub expires_at_ms: u64,
}

/// A durable scheduling job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulingJob {
    pub id: JobId,
    pub workload_id: WorkloadId,
    pub spec: WorkloadSpec,
    /// Lower numbers are leased first.
    pub priority: u32,
    /// Enqueue order, used to break priority ties (FIFO).
    pub seq: u64,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub state: JobState,
    /// Earliest time (epoch ms) the job may be leased.
    pub run_at_ms: u64,
    pub lease: Option<Lease>,
    pub last_error: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl SchedulingJob {
    /// Whether a worker may lease this job at `now_ms`.
    pub fn is_runnable(&self, now_ms: u64) -> bool {
        match self.state {
            JobState::Waiting => self.run_at_ms <= now_ms,
            JobState::Active => self.lease_expired(now_ms),
            JobState::Completed | JobState::Abandoned => false,
        }
    }

    /// Whether the current lease (if any) has run out at `now_ms`.
    pub fn lease_expired(&self, now_ms: u64) -> bool {
        self.lease
            .as_ref()
            .is_none_or(|lease| lease.expires_at_ms <= now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults_apply() {
        let spec: WorkloadSpec = serde_json::from_str(r#"{"name":"job"}"#).unwrap();
        assert_eq!(spec.namespace(), "default");
        assert_eq!(spec.priority(), 1);
        assert!(spec.primary_image().is_none());
        assert!(spec.preferred_affinity().is_empty());
    }

    #[test]
    fn zero_priority_means_default() {
        let spec: WorkloadSpec = serde_json::from_str(r#"{"name":"job","priority":0}"#).unwrap();
        assert_eq!(spec.priority(), DEFAULT_PRIORITY);

        let spec: WorkloadSpec = serde_json::from_str(r#"{"name":"job","priority":7}"#).unwrap();
        assert_eq!(spec.priority(), 7);
    }

    #[test]
    fn spec_parses_kubernetes_shape() {
        let raw = r#"{
            "name": "trainer",
            "namespace": "ml",
            "priority": 3,
            "resources": { "requests": { "cpu": "500m", "memory": "512Mi", "gpu": 1 } },
            "containers": [{ "image": "pytorch:2.3" }],
            "affinity": { "nodeAffinity": {
                "preferredDuringSchedulingIgnoredDuringExecution": [
                    { "weight": 20, "preference": { "matchExpressions": [
                        { "key": "zone", "operator": "In", "values": ["eu-1"] }
                    ] } }
                ]
            } }
        }"#;
        let spec: WorkloadSpec = serde_json::from_str(raw).unwrap();

        assert_eq!(spec.namespace(), "ml");
        assert_eq!(spec.priority(), 3);
        assert_eq!(spec.resources.requests.cpu, Some(Quantity::Text("500m".into())));
        assert_eq!(spec.resources.requests.gpu, Some(1));
        assert_eq!(spec.primary_image(), Some("pytorch:2.3"));
        let terms = spec.preferred_affinity();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].weight, Some(20));
        assert_eq!(terms[0].preference.match_expressions[0].operator, LabelOperator::In);
    }

    #[test]
    fn numeric_cpu_quantity() {
        let spec: WorkloadSpec =
            serde_json::from_str(r#"{"resources":{"requests":{"cpu":2.5}}}"#).unwrap();
        assert_eq!(spec.resources.requests.cpu, Some(Quantity::Number(2.5)));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let policy = BackoffPolicy::Exponential { delay_ms: 1000 };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = BackoffPolicy::Fixed { delay_ms: 250 };
        assert_eq!(policy.delay_for(1), policy.delay_for(5));
    }

    #[test]
    fn schedulable_statuses() {
        assert!(NodeStatus::Online.is_schedulable());
        assert!(NodeStatus::Idle.is_schedulable());
        assert!(!NodeStatus::Busy.is_schedulable());
        assert!(!NodeStatus::Offline.is_schedulable());
    }
}
