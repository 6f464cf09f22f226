//! Node scoring for placement decisions.
//!
//! A [`NodeScorer`] holds a registry of named [`Strategy`] functions and a
//! [`ScoringWeights`] configuration. The score of a node is the weighted sum
//! `Σ strategy(node) × weight`. It is not normalized: only the
//! relative order of nodes within one scheduling attempt matters.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use anchor_state::{NodeId, WorkloadSpec};

use crate::snapshot::NodeSnapshot;
use crate::strategies;

/// A scoring function returning a value in `0.0..=100.0`.
pub type StrategyFn = fn(&NodeSnapshot, &WorkloadSpec) -> f64;

/// Strategy names, as used in score breakdowns and weight lookups.
pub const RESOURCE_FIT: &str = "ResourceFit";
pub const IMAGE_LOCALITY: &str = "ImageLocality";
pub const NODE_AFFINITY: &str = "NodeAffinity";
pub const DATA_LOCALITY: &str = "DataLocality";

/// A named, independently testable scoring function.
#[derive(Debug, Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub score: StrategyFn,
}

/// The built-in strategies, in evaluation order.
pub fn default_strategies() -> Vec<Strategy> {
    vec![
        Strategy { name: RESOURCE_FIT, score: strategies::resource_fit },
        Strategy { name: IMAGE_LOCALITY, score: strategies::image_locality },
        Strategy { name: NODE_AFFINITY, score: strategies::node_affinity },
        Strategy { name: DATA_LOCALITY, score: strategies::data_locality },
    ]
}

/// Weights for the built-in strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub resource_fit: f64,
    pub image_locality: f64,
    pub node_affinity: f64,
    pub data_locality: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            resource_fit: 1.0,
            image_locality: 0.5,
            node_affinity: 2.0,
            data_locality: 5.0,
        }
    }
}

impl ScoringWeights {
    /// Weight for a strategy by name. Strategies without a configured
    /// weight count at 1.0.
    pub fn weight_for(&self, strategy: &str) -> f64 {
        match strategy {
            RESOURCE_FIT => self.resource_fit,
            IMAGE_LOCALITY => self.image_locality,
            NODE_AFFINITY => self.node_affinity,
            DATA_LOCALITY => self.data_locality,
            _ => 1.0,
        }
    }

    /// Check that every weight is finite and non-negative.
    pub fn validate(&self) -> Result<(), InvalidWeight> {
        for (name, weight) in [
            (RESOURCE_FIT, self.resource_fit),
            (IMAGE_LOCALITY, self.image_locality),
            (NODE_AFFINITY, self.node_affinity),
            (DATA_LOCALITY, self.data_locality),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(InvalidWeight { strategy: name, weight });
            }
        }
        Ok(())
    }
}

/// A scoring weight that is negative or not finite.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("weight for {strategy} must be finite and >= 0, got {weight}")]
pub struct InvalidWeight {
    pub strategy: &'static str,
    pub weight: f64,
}

/// Scored result for a single node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeScore {
    pub node_id: NodeId,
    /// Position of the node in the input slice.
    pub index: usize,
    /// Weighted total (higher = better).
    pub score: f64,
    /// Unweighted per-strategy scores, in registry order.
    pub breakdown: Vec<(&'static str, f64)>,
}

/// Weighted multi-strategy node scorer.
#[derive(Debug, Clone)]
pub struct NodeScorer {
    strategies: Vec<Strategy>,
    weights: ScoringWeights,
}

impl Default for NodeScorer {
    fn default() -> Self {
        Self::new(ScoringWeights::default())
    }
}

impl NodeScorer {
    /// Scorer with the built-in strategies and the given weights.
    pub fn new(weights: ScoringWeights) -> Self {
        Self::with_strategies(default_strategies(), weights)
    }

    /// Scorer with a custom strategy registry.
    pub fn with_strategies(strategies: Vec<Strategy>, weights: ScoringWeights) -> Self {
        Self { strategies, weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Weighted score of one node.
    pub fn score(&self, node: &NodeSnapshot, spec: &WorkloadSpec) -> f64 {
        self.strategies
            .iter()
            .map(|s| (s.score)(node, spec) * self.weights.weight_for(s.name))
            .sum()
    }

    /// Score one node, keeping the per-strategy breakdown.
    pub fn evaluate(&self, index: usize, node: &NodeSnapshot, spec: &WorkloadSpec) -> NodeScore {
        let mut score = 0.0;
        let mut breakdown = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let raw = (strategy.score)(node, spec);
            score += raw * self.weights.weight_for(strategy.name);
            breakdown.push((strategy.name, raw));
        }
        trace!(node_id = %node.node_id, score, ?breakdown, "node scored");
        NodeScore {
            node_id: node.node_id.clone(),
            index,
            score,
            breakdown,
        }
    }

    /// Score all nodes and return them best first.
    ///
    /// The sort is stable: equal scores keep their input order, so the node
    /// seen first wins a tie.
    pub fn rank(&self, nodes: &[NodeSnapshot], spec: &WorkloadSpec) -> Vec<NodeScore> {
        let mut scores: Vec<NodeScore> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| self.evaluate(i, n, spec))
            .collect();
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        scores
    }
}
