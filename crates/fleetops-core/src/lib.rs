//! fleetops-core — shared plumbing for the rollout and drain workflows.
//!
//! # Components
//!
//! - **`types`** — Task specs, services, deployments, fleet members, nodes
//! - **`api`** — Control-plane capability traits (fleet, cluster, load balancer)
//! - **`error`** — `ApiError` and the `FleetError` taxonomy
//! - **`retry`** — Bounded exponential backoff with transient/permanent classification
//! - **`arn`** — Resource-name parsing
//! - **`config`** — fleetops.toml parsing
//! - **`memory`** — In-memory control plane (feature `memory`)

pub mod api;
pub mod arn;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod retry;
pub mod types;

pub use api::{ClusterApi, FleetApi, LoadBalancerApi};
pub use arn::Arn;
pub use config::FleetConfig;
pub use error::{ApiError, ApiResult, FleetError, FleetResult};
pub use retry::{Backoff, RetryPolicy};
pub use types::*;
