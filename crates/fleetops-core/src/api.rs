//! Control-plane capability traits.
//!
//! The workflows only talk to the outside world through these three
//! traits, so any backend that honours the contracts can be substituted:
//! a cloud SDK adapter, or [`crate::memory::MemoryControlPlane`] in tests.

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::types::*;

/// Autoscaling-group and instance operations.
#[async_trait]
pub trait FleetApi: Send + Sync {
    /// Describe a fleet group. `Ok(None)` when it does not exist.
    async fn describe_group(&self, group: &str) -> ApiResult<Option<FleetGroup>>;

    /// Detach an instance without decrementing desired capacity.
    ///
    /// Returns the scaling-activity descriptions the group reported.
    async fn detach_instance(&self, group: &str, instance_id: &str) -> ApiResult<Vec<String>>;

    async fn attach_instance(&self, group: &str, instance_id: &str) -> ApiResult<()>;

    async fn terminate_instance(&self, instance_id: &str) -> ApiResult<()>;
}

/// Workload-cluster operations: nodes, services and task specs.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// One page of node references; pass the previous `next_token` to continue.
    async fn list_nodes(&self, cluster: &str, next_token: Option<String>) -> ApiResult<NodePage>;

    async fn describe_nodes(&self, cluster: &str, node_ids: &[NodeId]) -> ApiResult<Vec<WorkloadNode>>;

    async fn set_node_status(
        &self,
        cluster: &str,
        node_ids: &[NodeId],
        status: NodeStatus,
    ) -> ApiResult<()>;

    /// Describe a service. `Ok(None)` when it does not exist.
    async fn describe_service(&self, cluster: &str, service: &str) -> ApiResult<Option<Service>>;

    /// Apply an update and return the service as it looks right after.
    async fn update_service(&self, request: &UpdateServiceRequest) -> ApiResult<Service>;

    async fn describe_spec(&self, spec_ref: &str) -> ApiResult<TaskSpec>;

    /// Register a spec as a new revision; returns the new reference.
    async fn register_spec(&self, spec: &TaskSpec) -> ApiResult<SpecRef>;
}

/// Load-balancer operations.
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn describe_target_health(&self, target_group_ref: &str) -> ApiResult<Vec<TargetHealth>>;
}
