//! Anchor placement — node filtering and ranking.
//!
//! Pure functions over node snapshots and workload specs. Nothing here
//! performs I/O or holds locks; the scheduler crate feeds snapshots in and
//! acts on the results.
//!
//! # Components
//!
//! - **`snapshot`** — the in-memory node view the scheduler filters and scores
//! - **`convert`** — record → snapshot conversion and resource-quantity parsing
//! - **`predicates`** — hard constraints a node must pass
//! - **`strategies`** — named scoring functions, each returning 0–100
//! - **`scorer`** — strategy registry, weights and ranking

pub mod convert;
pub mod predicates;
pub mod scorer;
pub mod snapshot;
pub mod strategies;

pub use convert::{ResourceRequest, parse_cpu, parse_memory, record_to_snapshot, requested_resources};
pub use predicates::{CPU_PRESSURE_THRESHOLD, PredicateRejection, check_predicates};
pub use scorer::{InvalidWeight, NodeScore, NodeScorer, ScoringWeights, Strategy, StrategyFn, default_strategies};
pub use snapshot::{GpuKey, NodeSnapshot};
