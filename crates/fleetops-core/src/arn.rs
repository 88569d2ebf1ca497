//! Resource names of the form `arn:<partition>:<service>:<region>:<account>:<resource>`.

use std::fmt;
use std::str::FromStr;

use crate::error::FleetError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    pub resource: String,
}

impl Arn {
    /// Resource with a leading `cluster/` stripped.
    pub fn cluster_name(&self) -> &str {
        self.resource
            .strip_prefix("cluster/")
            .unwrap_or(&self.resource)
    }
}

impl FromStr for Arn {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(6, ':');
        let prefix = parts.next();
        let (Some("arn"), Some(partition), Some(service), Some(region), Some(account_id), Some(resource)) = (
            prefix,
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(FleetError::InvalidArn(s.to_string()));
        };
        if resource.is_empty() {
            return Err(FleetError::InvalidArn(s.to_string()));
        }
        Ok(Self {
            partition: partition.to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account_id: account_id.to_string(),
            resource: resource.to_string(),
        })
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

/// Node id from a node reference: everything after the last `/`.
///
/// Works on full references and on bare ids alike.
pub fn resource_id(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}
