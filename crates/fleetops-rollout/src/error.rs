//! Rollout outcome errors.

use fleetops_core::FleetError;
use thiserror::Error;

/// How a rollout ended when it did not converge.
///
/// Callers map each variant to its own process exit status, so the
/// variants must stay distinguishable.
#[derive(Debug, Error)]
pub enum RolloutError {
    /// The rollout failed, the prior spec was restored and validated.
    #[error("successful rollback after failed rollout: {cause}")]
    SuccessfulRollback { cause: FleetError },

    /// The rollout failed and restoring the prior spec failed too.
    #[error("failed rollback after failed rollout: {cause}; rollback: {rollback}")]
    FailedRollback {
        cause: FleetError,
        rollback: FleetError,
    },

    /// Nothing to roll back (or a configuration problem); the original
    /// error as is.
    #[error(transparent)]
    Failed(#[from] FleetError),
}

impl RolloutError {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Failed(_) => 1,
            Self::SuccessfulRollback { .. } => 2,
            Self::FailedRollback { .. } => 3,
        }
    }

    /// The error that started it all.
    pub fn cause(&self) -> &FleetError {
        match self {
            Self::SuccessfulRollback { cause } | Self::FailedRollback { cause, .. } => cause,
            Self::Failed(cause) => cause,
        }
    }
}

pub type RolloutResult<T> = Result<T, RolloutError>;
