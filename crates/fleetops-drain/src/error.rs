//! Drain error types.

use std::fmt;

use fleetops_core::{FleetError, InstanceId, NodeId};
use thiserror::Error;

/// Step of the per-instance workflow that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStep {
    Detach,
    SetDraining,
    WaitDrained,
    Terminate,
}

impl fmt::Display for DrainStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Detach => "detach",
            Self::SetDraining => "set draining",
            Self::WaitDrained => "wait drained",
            Self::Terminate => "terminate",
        })
    }
}

/// One instance that could not be replaced.
#[derive(Debug, Error)]
#[error("instance {instance_id} (node {node_id}) failed to {step}: {source}")]
pub struct InstanceFailure {
    pub instance_id: InstanceId,
    pub node_id: NodeId,
    pub step: DrainStep,
    pub source: FleetError,
    /// Whether the instance is back in its group. `false` after a failed
    /// drain means someone has to look at it.
    pub reattached: bool,
}

#[derive(Debug, Error)]
pub enum DrainError {
    /// Listing or resolving failed before any instance was touched.
    #[error(transparent)]
    Fleet(#[from] FleetError),

    /// Some instances failed; the others were replaced.
    #[error("{} instance(s) not replaced: {}", .failures.len(), join(.failures))]
    Incomplete {
        failures: Vec<InstanceFailure>,
        terminated: Vec<InstanceId>,
    },
}

pub type DrainResult<T> = Result<T, DrainError>;

fn join(failures: &[InstanceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
