//! In-memory control plane.
//!
//! Implements [`FleetApi`], [`ClusterApi`] and [`LoadBalancerApi`] over a
//! plain [`ControlPlaneState`]. Tests script the eventually-consistent
//! parts (service snapshots, target health, nodes that never drain) and
//! inject failures per operation; the CLI uses it as a rehearsal backend
//! loaded from a JSON state file.
//!
//! Without a script the plane converges on the next read: a described
//! service keeps only its PRIMARY deployment at full running count, and a
//! draining node reports zero running tasks.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{ClusterApi, FleetApi, LoadBalancerApi};
use crate::arn::{resource_id, Arn};
use crate::error::{ApiError, ApiResult};
use crate::types::*;

pub const DESCRIBE_GROUP: &str = "describe-group";
pub const DETACH_INSTANCE: &str = "detach-instance";
pub const ATTACH_INSTANCE: &str = "attach-instance";
pub const TERMINATE_INSTANCE: &str = "terminate-instance";
pub const LIST_NODES: &str = "list-nodes";
pub const DESCRIBE_NODES: &str = "describe-nodes";
pub const SET_NODE_STATUS: &str = "set-node-status";
pub const DESCRIBE_SERVICE: &str = "describe-service";
pub const UPDATE_SERVICE: &str = "update-service";
pub const DESCRIBE_SPEC: &str = "describe-spec";
pub const REGISTER_SPEC: &str = "register-spec";
pub const DESCRIBE_TARGET_HEALTH: &str = "describe-target-health";

/// Everything the plane knows. Serializable so it can live in a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneState {
    pub services: Vec<Service>,
    pub specs: Vec<TaskSpec>,
    pub groups: Vec<FleetGroup>,
    /// Cluster name → registered nodes.
    pub nodes: BTreeMap<String, Vec<WorkloadNode>>,
    /// Target group reference → targets.
    pub target_health: BTreeMap<String, Vec<TargetHealth>>,
    pub terminated: Vec<InstanceId>,
}

#[derive(Default)]
struct Inner {
    state: ControlPlaneState,
    service_script: HashMap<String, VecDeque<Service>>,
    health_script: HashMap<String, VecDeque<Vec<TargetHealth>>>,
    node_script: HashMap<NodeId, VecDeque<WorkloadNode>>,
    stuck_nodes: HashSet<NodeId>,
    vanishing_nodes: HashSet<NodeId>,
    /// Targeted failures: (operation, resource) → error.
    failures: HashMap<(&'static str, String), ApiError>,
    detached: HashMap<InstanceId, FleetMember>,
    calls: Vec<String>,
    reads: HashMap<(&'static str, String), usize>,
    next_deployment: u64,
}

pub struct MemoryControlPlane {
    inner: Mutex<Inner>,
    page_size: usize,
}

impl MemoryControlPlane {
    pub fn new(state: ControlPlaneState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                ..Default::default()
            }),
            page_size: 100,
        }
    }

    /// Load a state file written by [`MemoryControlPlane::save`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: ControlPlaneState = serde_json::from_str(&content)?;
        Ok(Self::new(state))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.state())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Number of node references returned per `list_nodes` page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Queue snapshots returned by successive `describe_service` calls.
    pub fn script_service(&self, service: &str, snapshots: impl IntoIterator<Item = Service>) {
        self.lock()
            .service_script
            .entry(service.to_string())
            .or_default()
            .extend(snapshots);
    }

    /// Queue listings returned by successive `describe_target_health` calls.
    pub fn script_target_health(
        &self,
        target_group: &str,
        snapshots: impl IntoIterator<Item = Vec<TargetHealth>>,
    ) {
        self.lock()
            .health_script
            .entry(target_group.to_string())
            .or_default()
            .extend(snapshots);
    }

    /// Queue node states returned by successive `describe_nodes` calls
    /// once the node has been set to draining. Earlier reads see the
    /// registered node.
    pub fn script_node(&self, node_id: &str, snapshots: impl IntoIterator<Item = WorkloadNode>) {
        self.lock()
            .node_script
            .entry(node_id.to_string())
            .or_default()
            .extend(snapshots);
    }

    /// Keep a node's running tasks forever once it is draining.
    pub fn stick_node(&self, node_id: &str) {
        self.lock().stuck_nodes.insert(node_id.to_string());
    }

    /// Drop a node from `describe_nodes` results once it is draining.
    pub fn vanish_node(&self, node_id: &str) {
        self.lock().vanishing_nodes.insert(node_id.to_string());
    }

    /// Fail `operation` on `resource` until cleared.
    pub fn fail(&self, operation: &'static str, resource: &str, error: ApiError) {
        self.lock()
            .failures
            .insert((operation, resource.to_string()), error);
    }

    pub fn clear_failure(&self, operation: &'static str, resource: &str) {
        self.lock().failures.remove(&(operation, resource.to_string()));
    }

    /// Write calls issued so far, as `operation:detail` strings.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// How many times `operation` read `resource`.
    pub fn reads(&self, operation: &'static str, resource: &str) -> usize {
        self.lock()
            .reads
            .get(&(operation, resource.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn state(&self) -> ControlPlaneState {
        self.lock().state.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn check(&self, operation: &'static str, resource: &str) -> ApiResult<()> {
        match self.failures.get(&(operation, resource.to_string())) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn read(&mut self, operation: &'static str, resource: &str) {
        *self.reads.entry((operation, resource.to_string())).or_default() += 1;
    }

    fn record(&mut self, operation: &str, detail: String) {
        debug!(operation, %detail, "memory control plane call");
        self.calls.push(format!("{operation}:{detail}"));
    }

    fn service_mut(&mut self, cluster: &str, service: &str) -> Option<&mut Service> {
        self.state
            .services
            .iter_mut()
            .find(|s| s.name == service && cluster_matches(&s.cluster_ref, cluster))
    }
}

fn cluster_matches(cluster_ref: &str, cluster: &str) -> bool {
    if cluster_ref == cluster {
        return true;
    }
    match cluster_ref.parse::<Arn>() {
        Ok(arn) => arn.cluster_name() == cluster,
        Err(_) => false,
    }
}

fn cluster_key(cluster: &str) -> String {
    match cluster.parse::<Arn>() {
        Ok(arn) => arn.cluster_name().to_string(),
        Err(_) => cluster.to_string(),
    }
}

fn revision_of(spec_ref: &str) -> u32 {
    spec_ref
        .rsplit(':')
        .next()
        .and_then(|r| r.parse().ok())
        .unwrap_or(0)
}

fn not_found(operation: &'static str, resource: &str) -> ApiError {
    ApiError::NotFound {
        operation,
        resource: resource.to_string(),
    }
}

#[async_trait]
impl FleetApi for MemoryControlPlane {
    async fn describe_group(&self, group: &str) -> ApiResult<Option<FleetGroup>> {
        let inner = self.lock();
        inner.check(DESCRIBE_GROUP, group)?;
        Ok(inner.state.groups.iter().find(|g| g.name == group).cloned())
    }

    async fn detach_instance(&self, group: &str, instance_id: &str) -> ApiResult<Vec<String>> {
        let mut inner = self.lock();
        inner.check(DETACH_INSTANCE, instance_id)?;
        let fleet = inner
            .state
            .groups
            .iter_mut()
            .find(|g| g.name == group)
            .ok_or_else(|| not_found(DETACH_INSTANCE, group))?;
        let index = fleet
            .members
            .iter()
            .position(|m| m.instance_id == instance_id)
            .ok_or_else(|| not_found(DETACH_INSTANCE, instance_id))?;
        let member = fleet.members.remove(index);
        inner.detached.insert(instance_id.to_string(), member);
        inner.record(DETACH_INSTANCE, format!("{group}:{instance_id}"));
        Ok(vec![format!(
            "Detaching instance {instance_id} from group {group} without decrementing capacity"
        )])
    }

    async fn attach_instance(&self, group: &str, instance_id: &str) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.check(ATTACH_INSTANCE, instance_id)?;
        let member = inner.detached.remove(instance_id).unwrap_or(FleetMember {
            instance_id: instance_id.to_string(),
            launch_config: None,
        });
        let fleet = inner
            .state
            .groups
            .iter_mut()
            .find(|g| g.name == group)
            .ok_or_else(|| not_found(ATTACH_INSTANCE, group))?;
        fleet.members.push(member);
        inner.record(ATTACH_INSTANCE, format!("{group}:{instance_id}"));
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> ApiResult<()> {
        let mut inner = self.lock();
        inner.check(TERMINATE_INSTANCE, instance_id)?;
        for nodes in inner.state.nodes.values_mut() {
            for node in nodes.iter_mut().filter(|n| n.instance_id == instance_id) {
                node.status = NodeStatus::Inactive;
                node.running_count = 0;
            }
        }
        inner.state.terminated.push(instance_id.to_string());
        inner.record(TERMINATE_INSTANCE, instance_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for MemoryControlPlane {
    async fn list_nodes(&self, cluster: &str, next_token: Option<String>) -> ApiResult<NodePage> {
        let inner = self.lock();
        inner.check(LIST_NODES, cluster)?;
        let nodes = inner
            .state
            .nodes
            .get(&cluster_key(cluster))
            .ok_or_else(|| not_found(LIST_NODES, cluster))?;
        let start = match next_token {
            Some(token) => token.parse::<usize>().map_err(|_| ApiError::Rejected {
                operation: LIST_NODES,
                message: format!("invalid next token {token:?}"),
            })?,
            None => 0,
        };
        let end = (start + self.page_size).min(nodes.len());
        Ok(NodePage {
            node_refs: nodes
                .get(start..end)
                .unwrap_or_default()
                .iter()
                .map(|n| n.node_ref.clone())
                .collect(),
            next_token: (end < nodes.len()).then(|| end.to_string()),
        })
    }

    async fn describe_nodes(&self, cluster: &str, node_ids: &[NodeId]) -> ApiResult<Vec<WorkloadNode>> {
        let mut inner = self.lock();
        for id in node_ids {
            inner.check(DESCRIBE_NODES, id)?;
        }
        let key = cluster_key(cluster);
        let mut described = Vec::new();
        for id in node_ids {
            inner.read(DESCRIBE_NODES, id);
            let stuck = inner.stuck_nodes.contains(id);
            let Some(node) = inner
                .state
                .nodes
                .get_mut(&key)
                .and_then(|nodes| nodes.iter_mut().find(|n| resource_id(&n.node_ref) == id))
            else {
                continue;
            };
            let draining = node.status == NodeStatus::Draining;
            if draining && !stuck {
                node.running_count = 0;
            }
            let current = node.clone();

            if draining {
                if inner.vanishing_nodes.contains(id) {
                    continue;
                }
                if let Some(scripted) = inner.node_script.get_mut(id).and_then(VecDeque::pop_front) {
                    described.push(scripted);
                    continue;
                }
            }
            described.push(current);
        }
        Ok(described)
    }

    async fn set_node_status(
        &self,
        cluster: &str,
        node_ids: &[NodeId],
        status: NodeStatus,
    ) -> ApiResult<()> {
        let mut inner = self.lock();
        for id in node_ids {
            inner.check(SET_NODE_STATUS, id)?;
        }
        let key = cluster_key(cluster);
        for id in node_ids {
            let node = inner
                .state
                .nodes
                .get_mut(&key)
                .and_then(|nodes| nodes.iter_mut().find(|n| resource_id(&n.node_ref) == id))
                .ok_or_else(|| not_found(SET_NODE_STATUS, id))?;
            node.status = status;
            inner.record(SET_NODE_STATUS, format!("{id}:{status}"));
        }
        Ok(())
    }

    async fn describe_service(&self, cluster: &str, service: &str) -> ApiResult<Option<Service>> {
        let mut inner = self.lock();
        inner.check(DESCRIBE_SERVICE, service)?;
        inner.read(DESCRIBE_SERVICE, service);
        if let Some(scripted) = inner
            .service_script
            .get_mut(service)
            .and_then(VecDeque::pop_front)
        {
            return Ok(Some(scripted));
        }
        let Some(svc) = inner.service_mut(cluster, service) else {
            return Ok(None);
        };
        // Converge: only the PRIMARY deployment survives, at full strength.
        svc.deployments
            .retain(|d| d.status == DeploymentStatus::Primary);
        let desired = svc.desired_count;
        for deployment in &mut svc.deployments {
            deployment.desired_count = desired;
            deployment.running_count = desired;
        }
        svc.running_count = desired;
        Ok(Some(svc.clone()))
    }

    async fn update_service(&self, request: &UpdateServiceRequest) -> ApiResult<Service> {
        let mut inner = self.lock();
        inner.check(UPDATE_SERVICE, &request.service)?;
        inner.next_deployment += 1;
        let deployment_id = format!("deploy-{}", inner.next_deployment);
        let svc = inner
            .service_mut(&request.cluster, &request.service)
            .ok_or_else(|| not_found(UPDATE_SERVICE, &request.service))?;

        let spec_changed = request
            .spec_ref
            .as_ref()
            .is_some_and(|r| *r != svc.spec_ref);
        if let Some(spec_ref) = &request.spec_ref {
            svc.spec_ref = spec_ref.clone();
        }
        if let Some(desired) = request.desired_count {
            svc.desired_count = desired;
        }
        if request.force_new_deployment || spec_changed {
            for deployment in &mut svc.deployments {
                if deployment.status == DeploymentStatus::Primary {
                    deployment.status = DeploymentStatus::Active;
                }
            }
            svc.deployments.push(Deployment {
                id: deployment_id,
                status: DeploymentStatus::Primary,
                spec_ref: svc.spec_ref.clone(),
                desired_count: svc.desired_count,
                running_count: 0,
            });
        }
        let updated = svc.clone();

        // Old targets start draining as soon as the new deployment exists.
        for lb in &updated.load_balancers {
            if let Some(targets) = inner.state.target_health.get_mut(&lb.target_group_ref) {
                for target in targets.iter_mut() {
                    target.state = TARGET_STATE_DRAINING.to_string();
                }
            }
        }

        inner.record(
            UPDATE_SERVICE,
            format!(
                "{}:{}:{}",
                request.service, updated.spec_ref, updated.desired_count
            ),
        );
        Ok(updated)
    }

    async fn describe_spec(&self, spec_ref: &str) -> ApiResult<TaskSpec> {
        let inner = self.lock();
        inner.check(DESCRIBE_SPEC, spec_ref)?;
        inner
            .state
            .specs
            .iter()
            .find(|s| s.spec_ref.as_deref() == Some(spec_ref))
            .cloned()
            .ok_or_else(|| not_found(DESCRIBE_SPEC, spec_ref))
    }

    async fn register_spec(&self, spec: &TaskSpec) -> ApiResult<SpecRef> {
        let mut inner = self.lock();
        inner.check(REGISTER_SPEC, &spec.family)?;
        let revision = inner
            .state
            .specs
            .iter()
            .filter(|s| s.family == spec.family)
            .filter_map(|s| s.spec_ref.as_deref().map(revision_of))
            .max()
            .unwrap_or(0)
            + 1;
        let spec_ref = format!("{}:{revision}", spec.family);
        let mut registered = spec.clone();
        registered.spec_ref = Some(spec_ref.clone());
        inner.state.specs.push(registered);
        inner.record(REGISTER_SPEC, spec_ref.clone());
        Ok(spec_ref)
    }
}

#[async_trait]
impl LoadBalancerApi for MemoryControlPlane {
    async fn describe_target_health(&self, target_group_ref: &str) -> ApiResult<Vec<TargetHealth>> {
        let mut inner = self.lock();
        inner.check(DESCRIBE_TARGET_HEALTH, target_group_ref)?;
        if let Some(scripted) = inner
            .health_script
            .get_mut(target_group_ref)
            .and_then(VecDeque::pop_front)
        {
            return Ok(scripted);
        }
        Ok(inner
            .state
            .target_health
            .get(target_group_ref)
            .cloned()
            .unwrap_or_default())
    }
}
