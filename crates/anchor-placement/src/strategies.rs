//! Scoring strategies. Each returns a value in `0.0..=100.0`.

use std::collections::HashMap;

use anchor_state::{LabelOperator, LabelRequirement, NodeSelectorTerm, WorkloadSpec};

use crate::snapshot::NodeSnapshot;

/// Cap on the summed weights of matching preferred-affinity terms.
pub const MAX_AFFINITY_SCORE: f64 = 100.0;

/// Free capacity: mean of free CPU and free RAM percentages.
///
/// Favours emptier nodes (spreading). Usage above 100 yields a negative
/// contribution rather than being clamped.
pub fn resource_fit(node: &NodeSnapshot, _spec: &WorkloadSpec) -> f64 {
    let cpu_free = 100.0 - node.metrics.cpu_usage_percent;
    let ram_free = 100.0 - node.metrics.ram_usage_percent;
    (cpu_free + ram_free) / 2.0
}

/// 100 if the node already caches the workload's primary image.
pub fn image_locality(node: &NodeSnapshot, spec: &WorkloadSpec) -> f64 {
    match spec.primary_image() {
        Some(image) if node.cached_images.contains(image) => 100.0,
        _ => 0.0,
    }
}

/// Sum of weights of the preferred-affinity terms the node satisfies.
pub fn node_affinity(node: &NodeSnapshot, spec: &WorkloadSpec) -> f64 {
    let total: u64 = spec
        .preferred_affinity()
        .iter()
        .filter(|term| term_matches(&node.labels, &term.preference))
        // A zero or missing weight counts as 1.
        .map(|term| u64::from(term.weight.filter(|w| *w > 0).unwrap_or(1)))
        .sum();
    (total as f64).min(MAX_AFFINITY_SCORE)
}

/// Volume locality. Not implemented: always 0.
pub fn data_locality(_node: &NodeSnapshot, _spec: &WorkloadSpec) -> f64 {
    0.0
}

/// Whether `labels` satisfy every expression of `term`.
///
/// A term with no expressions matches nothing.
pub fn term_matches(labels: &HashMap<String, String>, term: &NodeSelectorTerm) -> bool {
    !term.match_expressions.is_empty()
        && term
            .match_expressions
            .iter()
            .all(|req| requirement_matches(labels, req))
}

/// Evaluate one label requirement against a label set.
pub fn requirement_matches(labels: &HashMap<String, String>, req: &LabelRequirement) -> bool {
    let value = labels.get(&req.key);
    match req.operator {
        LabelOperator::In => value.is_some_and(|v| req.values.contains(v)),
        LabelOperator::NotIn => value.is_none_or(|v| !req.values.contains(v)),
        LabelOperator::Exists => value.is_some(),
        LabelOperator::DoesNotExist => value.is_none(),
        LabelOperator::Gt => compare_numeric(value, &req.values, |label, bound| label > bound),
        LabelOperator::Lt => compare_numeric(value, &req.values, |label, bound| label < bound),
    }
}

fn compare_numeric(
    value: Option<&String>,
    values: &[String],
    cmp: impl Fn(i64, i64) -> bool,
) -> bool {
    let (Some(value), [bound]) = (value, values) else {
        return false;
    };
    match (value.parse::<i64>(), bound.parse::<i64>()) {
        (Ok(label), Ok(bound)) => cmp(label, bound),
        _ => false,
    }
}
