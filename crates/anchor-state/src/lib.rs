//! anchor-state — authoritative store for the Anchor scheduler.
//!
//! Backed by [redb](https://docs.rs/redb), holds the durable records the
//! scheduling core reads and commits against: workload records, node
//! records, and the scheduling jobs of the durable work queue.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Read-modify-write operations (binding commits, pod-count increments,
//! job leases) run inside a single write transaction, so concurrent
//! callers sharing one `StateStore` never interleave partial updates.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
