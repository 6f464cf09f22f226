//! Conversions between state store types and placement types.
//!
//! Bridges `anchor_state::{NodeRecord, WorkloadSpec}` to the snapshot and
//! resource-request shapes the predicates, scorer and cache work with.

use anchor_state::{NodeRecord, Quantity, WorkloadSpec};

use crate::snapshot::NodeSnapshot;

/// Resources a workload asks for, in the units the cache tracks.
///
/// `cpu` and `ram` are added directly to a node's usage percentages when a
/// reservation is made.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceRequest {
    pub cpu: f64,
    pub ram: f64,
    pub gpu: u32,
}

/// Convert a [`NodeRecord`] into a fresh [`NodeSnapshot`].
pub fn record_to_snapshot(record: &NodeRecord, seen_ms: u64) -> NodeSnapshot {
    NodeSnapshot {
        node_id: record.id.clone(),
        name: record.name.clone(),
        status: Some(record.status),
        metrics: record.metrics,
        specs: record.specs.clone(),
        labels: record.labels.clone(),
        taints: record.taints.clone(),
        region: record.region.clone(),
        cached_images: record.cached_images.iter().cloned().collect(),
        pod_count: record.pod_count,
        last_scheduled_at: record.last_scheduled_at,
        last_seen_ms: seen_ms,
    }
}

/// Extract the resource request from a workload spec. Absent values are 0.
pub fn requested_resources(spec: &WorkloadSpec) -> ResourceRequest {
    let requests = &spec.resources.requests;
    ResourceRequest {
        cpu: requests.cpu.as_ref().map(parse_cpu).unwrap_or(0.0),
        ram: requests.memory.as_ref().map(parse_memory).unwrap_or(0.0),
        gpu: requests.gpu.unwrap_or(0),
    }
}

/// Parse a CPU quantity.
///
/// Numbers pass through. A string ending in `m` is milli-units: its leading
/// integer divided by 1000 (`"500m"` → 0.5). Any other string is parsed as
/// a decimal. Unparseable or negative input yields 0.
pub fn parse_cpu(quantity: &Quantity) -> f64 {
    let cpu = match quantity {
        Quantity::Number(n) if n.is_finite() => *n,
        Quantity::Number(_) => 0.0,
        Quantity::Text(s) => {
            let s = s.trim();
            if let Some(millis) = s.strip_suffix('m') {
                leading_integer(millis).map(|m| m as f64 / 1000.0).unwrap_or(0.0)
            } else {
                s.parse::<f64>().ok().filter(|v| v.is_finite()).unwrap_or(0.0)
            }
        }
    };
    cpu.max(0.0)
}

/// Parse a memory quantity. Always 0.
///
/// Node capacity is only known as a usage percentage, so there is no
/// denominator to turn `"512Mi"` into a share of a node.
pub fn parse_memory(_quantity: &Quantity) -> f64 {
    0.0
}

/// The integer formed by the leading (optionally signed) digits of `s`.
fn leading_integer(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|v| sign * v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_state::*;
    use std::collections::HashMap;

    fn text(s: &str) -> Quantity {
        Quantity::Text(s.to_string())
    }

    #[test]
    fn cpu_millis_are_divided() {
        assert_eq!(parse_cpu(&text("500m")), 0.5);
        assert_eq!(parse_cpu(&text("1500m")), 1.5);
        assert_eq!(parse_cpu(&text("1.5m")), 0.001);
    }

    #[test]
    fn cpu_plain_values() {
        assert_eq!(parse_cpu(&Quantity::Number(2.0)), 2.0);
        assert_eq!(parse_cpu(&text("4")), 4.0);
        assert_eq!(parse_cpu(&text("0.25")), 0.25);
    }

    #[test]
    fn cpu_garbage_is_zero() {
        assert_eq!(parse_cpu(&text("lots")), 0.0);
        assert_eq!(parse_cpu(&text("m")), 0.0);
        assert_eq!(parse_cpu(&Quantity::Number(f64::NAN)), 0.0);
    }

    #[test]
    fn negative_cpu_is_zero() {
        assert_eq!(parse_cpu(&text("-40000m")), 0.0);
        assert_eq!(parse_cpu(&text("-2")), 0.0);
        assert_eq!(parse_cpu(&Quantity::Number(-3.0)), 0.0);

        let mut spec = WorkloadSpec::default();
        spec.resources.requests.cpu = Some(text("-500m"));
        assert_eq!(requested_resources(&spec).cpu, 0.0);
    }

    #[test]
    fn memory_is_not_counted() {
        assert_eq!(parse_memory(&text("512Mi")), 0.0);
        assert_eq!(parse_memory(&Quantity::Number(1024.0)), 0.0);
    }

    #[test]
    fn requested_resources_defaults_to_zero() {
        let req = requested_resources(&WorkloadSpec::default());
        assert_eq!(req, ResourceRequest::default());
    }

    #[test]
    fn requested_resources_reads_spec() {
        let mut spec = WorkloadSpec::default();
        spec.resources.requests.cpu = Some(text("250m"));
        spec.resources.requests.memory = Some(text("1Gi"));
        spec.resources.requests.gpu = Some(2);

        let req = requested_resources(&spec);
        assert_eq!(req.cpu, 0.25);
        assert_eq!(req.ram, 0.0);
        assert_eq!(req.gpu, 2);
    }

    #[test]
    fn record_converts_to_snapshot() {
        let record = NodeRecord {
            id: "node-1".to_string(),
            name: "rig-01".to_string(),
            status: NodeStatus::Idle,
            metrics: NodeMetrics { cpu_usage_percent: 12.0, ram_usage_percent: 40.0 },
            specs: NodeSpecs { has_gpu: true, gpu_type: Some("RTX4090".into()), gpu_vram: Some(24) },
            labels: HashMap::from([("tier".to_string(), "gold".to_string())]),
            taints: Vec::new(),
            region: Some("us-east".to_string()),
            cached_images: vec!["nginx:1.27".to_string(), "nginx:1.27".to_string()],
            pod_count: 3,
            last_scheduled_at: Some(900),
            last_heartbeat: 1000,
        };

        let snap = record_to_snapshot(&record, 42);
        assert_eq!(snap.node_id, "node-1");
        assert_eq!(snap.status, Some(NodeStatus::Idle));
        assert_eq!(snap.metrics.cpu_usage_percent, 12.0);
        assert_eq!(snap.cached_images.len(), 1);
        assert_eq!(snap.pod_count, 3);
        assert_eq!(snap.last_seen_ms, 42);
        assert!(snap.is_schedulable());
    }
}
