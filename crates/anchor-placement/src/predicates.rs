//! Hard predicates — constraints a node must satisfy before it is scored.
//!
//! Predicates run in a fixed order and stop at the first rejection. Taint
//! tolerations and required node affinity are wired in as explicit
//! extension points that currently admit every node.

use std::fmt;

use serde::{Deserialize, Serialize};

use anchor_state::WorkloadSpec;

use crate::convert::ResourceRequest;
use crate::snapshot::NodeSnapshot;

/// CPU usage (percent) above which a node accepts no CPU-requesting workload.
pub const CPU_PRESSURE_THRESHOLD: f64 = 95.0;

/// Why a node was filtered out for a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PredicateRejection {
    /// CPU was requested and the node is above [`CPU_PRESSURE_THRESHOLD`].
    CpuPressure { usage_percent: f64 },
    /// A GPU was requested and the node has none.
    NoGpu,
    /// The node carries a taint the workload does not tolerate.
    UntoleratedTaint { key: String },
    /// The node fails the workload's required node affinity.
    RequiredAffinity,
}

impl fmt::Display for PredicateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateRejection::CpuPressure { usage_percent } => {
                write!(f, "insufficient cpu ({usage_percent:.1}% used)")
            }
            PredicateRejection::NoGpu => write!(f, "no gpu"),
            PredicateRejection::UntoleratedTaint { key } => write!(f, "untolerated taint {key}"),
            PredicateRejection::RequiredAffinity => write!(f, "required affinity not satisfied"),
        }
    }
}

/// Run all predicates for `node`.
pub fn check_predicates(
    node: &NodeSnapshot,
    spec: &WorkloadSpec,
    request: &ResourceRequest,
) -> Result<(), PredicateRejection> {
    fits_cpu(node, request)?;
    tolerates_taints(node, spec)?;
    fits_gpu(node, request)?;
    matches_required_affinity(node, spec)?;
    Ok(())
}

/// Reject CPU-requesting workloads on nodes under CPU pressure.
pub fn fits_cpu(node: &NodeSnapshot, request: &ResourceRequest) -> Result<(), PredicateRejection> {
    let usage = node.metrics.cpu_usage_percent;
    if request.cpu > 0.0 && usage > CPU_PRESSURE_THRESHOLD {
        return Err(PredicateRejection::CpuPressure { usage_percent: usage });
    }
    Ok(())
}

/// Reject GPU-requesting workloads on nodes without a GPU.
pub fn fits_gpu(node: &NodeSnapshot, request: &ResourceRequest) -> Result<(), PredicateRejection> {
    if request.gpu > 0 && !node.specs.has_gpu {
        return Err(PredicateRejection::NoGpu);
    }
    Ok(())
}

/// Taint/toleration check. Extension point: admits every node.
pub fn tolerates_taints(_node: &NodeSnapshot, _spec: &WorkloadSpec) -> Result<(), PredicateRejection> {
    Ok(())
}

/// Required node-affinity check. Extension point: admits every node.
pub fn matches_required_affinity(
    _node: &NodeSnapshot,
    _spec: &WorkloadSpec,
) -> Result<(), PredicateRejection> {
    Ok(())
}
