//! Validation strategies — how to decide a rollout has taken hold.

use std::fmt;
use std::str::FromStr;

use fleetops_core::FleetError;

/// When to consider a triggered rollout done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitUntil {
    /// The triggered deployment is the only one left and runs the
    /// desired count. Default.
    #[default]
    PrimaryRolled,
    /// A load-balancer target that existed before the update started
    /// draining, or every such target is gone.
    DrainingStarted,
}

impl WaitUntil {
    pub const ALL: [WaitUntil; 2] = [WaitUntil::PrimaryRolled, WaitUntil::DrainingStarted];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryRolled => "primary-rolled",
            Self::DrainingStarted => "draining-started",
        }
    }
}

impl FromStr for WaitUntil {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| FleetError::InvalidWaitUntil(s.to_string()))
    }
}

impl fmt::Display for WaitUntil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
