//! Error types shared by the rollout and drain workflows.

use thiserror::Error;

/// Result type alias for control-plane calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for workflow steps.
pub type FleetResult<T> = Result<T, FleetError>;

/// Failure reported by a control-plane call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("{operation}: resource not found: {resource}")]
    NotFound {
        operation: &'static str,
        resource: String,
    },

    #[error("{operation}: request rejected: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: transport error: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
}

/// Errors raised while mutating, rolling out, or draining.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("the service {service} does not exist in cluster {cluster}")]
    ServiceNotFound { cluster: String, service: String },

    #[error("fleet group not found: {0}")]
    GroupNotFound(String),

    #[error("workload node not found: {0}")]
    NodeNotFound(String),

    #[error("the deployment was changed elsewhere: {0} became PRIMARY")]
    DeploymentChangedElsewhere(String),

    #[error("other than PRIMARY deployment found")]
    OtherThanPrimaryDeploymentFound,

    #[error("not running the desired count ({running}/{desired})")]
    NotRunningDesiredCount { running: u32, desired: u32 },

    #[error("the service was deleted after the update")]
    ServiceDeletedAfterUpdate,

    #[error("no PRIMARY deployment")]
    NoPrimaryDeployment,

    #[error("the service {0} has no load balancer configured")]
    LoadBalancerNotConfigured(String),

    #[error("waiting for draining state")]
    WaitingForDrainingState,

    #[error("node {node} should be DRAINING but is {status}")]
    NodeNotDraining { node: String, status: String },

    #[error("node {node} still DRAINING with {running} running tasks")]
    NodeStillDraining { node: String, running: u32 },

    #[error("invalid wait-until mode {0:?} (expected primary-rolled or draining-started)")]
    InvalidWaitUntil(String),

    #[error("invalid resource name: {0}")]
    InvalidArn(String),

    #[error("drain worker for instance {0} aborted")]
    WorkerAborted(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl FleetError {
    /// Not-found errors never become true by retrying.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotFound { .. }
                | Self::GroupNotFound(_)
                | Self::NodeNotFound(_)
                | Self::Api(ApiError::NotFound { .. })
        )
    }
}
