//! Anchor scheduler — binds pending workloads to fleet nodes.
//!
//! # Components
//!
//! - **`cache`** — `ClusterStateCache`, the local informer mirroring node capacity
//! - **`updates`** — `NodeUpdate` wire format and the `UpdateBus` feeding caches
//! - **`engine`** — `SchedulerEngine`, one filter → score → bind attempt
//! - **`queue`** — `WorkQueue`, durable priority queue with leases and backoff
//! - **`notify`** — `NodeChannels`, per-node assignment delivery
//! - **`controller`** — `SchedulerController`, admission and the worker pool
//!
//! The cache, scorer and engine are built once at startup and handed to the
//! controller; nothing here is a process-wide singleton.

pub mod cache;
pub mod controller;
pub mod engine;
pub mod error;
pub mod notify;
pub mod queue;
pub mod updates;

pub use cache::ClusterStateCache;
pub use controller::{ControllerConfig, PHASE_SCHEDULING, SchedulerController, StatusReport};
pub use engine::{Binding, PHASE_STARTING, SchedulerEngine};
pub use error::{SchedulerError, SchedulerResult};
pub use notify::{NodeChannels, PodAssignment};
pub use queue::{FailOutcome, JobOptions, LeasedJob, QueueCounts, WorkQueue};
pub use updates::{MetricsPatch, NodeUpdate, UpdateBus};
