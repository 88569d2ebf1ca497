//! fleetops drain — enforce a fleet group's launch configuration.
//!
//! Members not running the group's launch configuration are detached,
//! drained out of the workload cluster, and terminated so the group
//! replaces them. Drains that fail put the instance back.
//!
//! # Components
//!
//! - **`coordinator`** — Filtering, node resolution, bounded per-instance fan-out
//! - **`error`** — Per-instance failures and their aggregate

pub mod coordinator;
pub mod error;

pub use coordinator::{
    filter_instances_to_replace, resolve_nodes, DrainConfig, DrainCoordinator, DrainReport,
    DrainTarget, DEFAULT_MAX_CONCURRENCY,
};
pub use error::{DrainError, DrainResult, DrainStep, InstanceFailure};
