//! Domain types for the control plane.
//!
//! These types mirror what the cluster and fleet control planes return:
//! task specs, services and their deployments, fleet groups, workload
//! nodes, and load-balancer target health. Everything is transient; a
//! controller fetches it, acts on it, and drops it within one run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque versioned reference to a registered task spec ("family:revision").
pub type SpecRef = String;

/// Identifier of a virtual machine in a fleet group.
pub type InstanceId = String;

/// Identifier of a node registered with the workload scheduler.
pub type NodeId = String;

/// Health state a load-balancer target reports while it is being drained.
pub const TARGET_STATE_DRAINING: &str = "draining";

// ── Task spec ──────────────────────────────────────────────────────

/// A runnable unit: an ordered list of containers plus spec-level metadata.
///
/// `Clone` is the deep copy used by the spec mutator; `PartialEq` is the
/// structural equality that decides whether a new revision is needed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSpec {
    /// Reference of the registered revision this spec was read from.
    pub spec_ref: Option<SpecRef>,
    pub family: String,
    pub containers: Vec<ContainerSpec>,
    pub task_role: Option<String>,
    pub execution_role: Option<String>,
    pub network_mode: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub placement_constraints: Vec<PlacementConstraint>,
    pub requires_compatibilities: Vec<String>,
    pub volumes: Vec<Volume>,
    pub tags: BTreeMap<String, String>,
}

impl TaskSpec {
    /// Look up a container by name.
    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// A single container inside a task spec. `name` is unique per spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub environment: Vec<EnvEntry>,
    pub secrets: Vec<SecretEntry>,
    pub log_sink: Option<LogSinkConfig>,
    pub cpu: Option<u32>,
    pub memory: Option<u32>,
    pub essential: bool,
}


/// Environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

/// Secret reference injected as an environment variable or log-sink option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEntry {
    pub name: String,
    pub value_from: String,
}

/// Log-sink configuration. A container has at most one active driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSinkConfig {
    pub driver: Option<String>,
    pub options: BTreeMap<String, String>,
    pub secret_options: Vec<SecretEntry>,
}

impl LogSinkConfig {
    /// True when there is no usable driver (absent or empty).
    pub fn has_no_driver(&self) -> bool {
        self.driver.as_deref().is_none_or(str::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConstraint {
    #[serde(rename = "type")]
    pub kind: String,
    pub expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub host_path: Option<String>,
}

// ── Service ────────────────────────────────────────────────────────

/// A running service bound to a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    /// Full cluster reference (`arn:...:cluster/<name>`).
    pub cluster_ref: String,
    pub name: String,
    pub spec_ref: SpecRef,
    pub desired_count: u32,
    pub running_count: u32,
    pub deployments: Vec<Deployment>,
    pub load_balancers: Vec<LoadBalancerRef>,
}

impl Service {
    /// The deployment currently tagged `PRIMARY`, if any.
    pub fn primary_deployment(&self) -> Option<&Deployment> {
        self.deployments
            .iter()
            .find(|d| d.status == DeploymentStatus::Primary)
    }

    pub fn deployment(&self, id: &str) -> Option<&Deployment> {
        self.deployments.iter().find(|d| d.id == id)
    }
}

/// One rollout record of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub status: DeploymentStatus,
    pub spec_ref: SpecRef,
    pub desired_count: u32,
    pub running_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Primary,
    Active,
    #[serde(other)]
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerRef {
    pub target_group_ref: String,
    pub container_name: Option<String>,
    pub container_port: Option<u16>,
}

/// Request body for a service update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateServiceRequest {
    /// Cluster name or full cluster reference.
    pub cluster: String,
    pub service: String,
    pub spec_ref: Option<SpecRef>,
    pub desired_count: Option<u32>,
    pub force_new_deployment: bool,
}

// ── Fleet ──────────────────────────────────────────────────────────

/// An autoscaling group and the launch configuration it expects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetGroup {
    pub name: String,
    pub launch_config: Option<String>,
    pub members: Vec<FleetMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetMember {
    pub instance_id: InstanceId,
    pub launch_config: Option<String>,
}

/// A node registered with the workload scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadNode {
    /// Full node reference; the trailing `/` segment is the node id.
    pub node_ref: String,
    pub instance_id: InstanceId,
    pub status: NodeStatus,
    pub running_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Active,
    Draining,
    #[serde(other)]
    Inactive,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Draining => write!(f, "DRAINING"),
            Self::Inactive => write!(f, "INACTIVE"),
        }
    }
}

/// One page of a node listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePage {
    pub node_refs: Vec<String>,
    pub next_token: Option<String>,
}

// ── Load balancer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHealth {
    pub target_id: String,
    pub state: String,
}

/// Target id → health state.
pub type TargetHealthSnapshot = BTreeMap<String, String>;

/// Fold a target-health listing into a snapshot.
pub fn snapshot_targets(targets: &[TargetHealth]) -> TargetHealthSnapshot {
    targets
        .iter()
        .map(|t| (t.target_id.clone(), t.state.clone()))
        .collect()
}
