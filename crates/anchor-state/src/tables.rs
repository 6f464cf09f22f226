//! redb table definitions for the Anchor state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Counters live in the `meta` table as plain `u64`s.

use redb::TableDefinition;

/// Workload records keyed by workload ID.
pub const WORKLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("workloads");

/// Node records keyed by node ID.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Scheduling jobs keyed by job ID.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Monotonic counters (e.g. the job enqueue sequence).
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key in [`META`] holding the last issued job sequence number.
pub const JOB_SEQ_KEY: &str = "job_seq";
