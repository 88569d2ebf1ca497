//! fleetops rollouts — mutate a service's task spec, deploy it, validate
//! it, and roll back when it does not take hold.
//!
//! # Components
//!
//! - **`strategy`** — `WaitUntil`, the closed set of validation strategies
//! - **`validator`** — Convergence polling for each strategy
//! - **`controller`** — The rollout cycle and its compensating rollback
//! - **`error`** — Outcome sentinels mapped to process exit codes

pub mod controller;
pub mod error;
pub mod strategy;
pub mod validator;

pub use controller::{update_service, RolloutConfig, RolloutController, RolloutPhase, UpdateAttempt};
pub use error::{RolloutError, RolloutResult};
pub use strategy::WaitUntil;
pub use validator::{Baseline, DeploymentValidator, RACE_TOLERANCE_RETRIES};
