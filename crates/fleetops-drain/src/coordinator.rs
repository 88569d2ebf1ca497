//! Drain coordinator — replaces fleet members that run an outdated
//! launch configuration.
//!
//! Each outdated member is detached from its group (capacity unchanged,
//! so the group launches a replacement), its workload node is set to
//! draining, and once the node has no running tasks the instance is
//! terminated. A failed drain re-attaches the instance.
//!
//! Instances are processed on a [`JoinSet`], at most
//! [`DrainConfig::max_concurrency`] at a time. Every worker owns its
//! instance and reports one outcome keyed by instance id.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use fleetops_core::arn::resource_id;
use fleetops_core::{
    Backoff, ClusterApi, FleetApi, FleetError, FleetMember, FleetResult, InstanceId, NodeId,
    NodeStatus, RetryPolicy,
};

use crate::error::{DrainError, DrainResult, DrainStep, InstanceFailure};

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

/// Everything one enforcement run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Fleet group whose members are checked.
    pub group: String,
    /// Cluster the members are registered in as workload nodes.
    pub cluster: String,
    /// Policy for waiting on a node to drain.
    pub retry: RetryPolicy,
    /// Instances drained at the same time.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            group: String::new(),
            cluster: String::new(),
            retry: RetryPolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// A fleet member matched to its workload node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainTarget {
    pub instance_id: InstanceId,
    pub node_id: NodeId,
}

impl DrainTarget {
    fn failure(&self, step: DrainStep, source: FleetError, reattached: bool) -> InstanceFailure {
        InstanceFailure {
            instance_id: self.instance_id.clone(),
            node_id: self.node_id.clone(),
            step,
            source,
            reattached,
        }
    }
}

/// Outcome of a run where every instance was replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Terminated instances, sorted.
    pub terminated: Vec<InstanceId>,
}

/// Members whose launch configuration is missing or differs from
/// `expected`, de-duplicated, in group order. Without an expected launch
/// configuration nothing is replaced.
pub fn filter_instances_to_replace(expected: Option<&str>, members: &[FleetMember]) -> Vec<InstanceId> {
    let Some(expected) = expected else {
        return Vec::new();
    };
    let mut seen = BTreeSet::new();
    members
        .iter()
        .filter(|m| m.launch_config.as_deref() != Some(expected))
        .filter(|m| seen.insert(m.instance_id.as_str()))
        .map(|m| m.instance_id.clone())
        .collect()
}

/// Match instances to workload nodes by walking every page of the
/// cluster's node listing. Instances without a node are skipped.
pub async fn resolve_nodes(
    cluster: &dyn ClusterApi,
    cluster_name: &str,
    instances: &[InstanceId],
) -> FleetResult<Vec<DrainTarget>> {
    let wanted: BTreeSet<&str> = instances.iter().map(String::as_str).collect();
    let mut resolved: BTreeMap<InstanceId, NodeId> = BTreeMap::new();
    let mut next_token = None;

    loop {
        let page = cluster.list_nodes(cluster_name, next_token).await?;
        if !page.node_refs.is_empty() {
            let node_ids: Vec<NodeId> = page
                .node_refs
                .iter()
                .map(|r| resource_id(r).to_string())
                .collect();
            for node in cluster.describe_nodes(cluster_name, &node_ids).await? {
                if wanted.contains(node.instance_id.as_str()) {
                    resolved
                        .entry(node.instance_id)
                        .or_insert_with(|| resource_id(&node.node_ref).to_string());
                }
            }
        }
        match page.next_token {
            Some(token) => next_token = Some(token),
            None => break,
        }
    }

    let mut targets = Vec::with_capacity(resolved.len());
    for instance_id in instances {
        match resolved.remove(instance_id) {
            Some(node_id) => targets.push(DrainTarget {
                instance_id: instance_id.clone(),
                node_id,
            }),
            None => warn!(
                instance = %instance_id,
                cluster = %cluster_name,
                "no workload node registered for instance, skipping"
            ),
        }
    }
    Ok(targets)
}

pub struct DrainCoordinator {
    config: DrainConfig,
    fleet: Arc<dyn FleetApi>,
    cluster: Arc<dyn ClusterApi>,
}

impl DrainCoordinator {
    pub fn new(config: DrainConfig, fleet: Arc<dyn FleetApi>, cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            config,
            fleet,
            cluster,
        }
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    /// Replace every outdated member of the group.
    pub async fn apply(&self) -> DrainResult<DrainReport> {
        let group = self
            .fleet
            .describe_group(&self.config.group)
            .await
            .map_err(FleetError::from)?
            .ok_or_else(|| FleetError::GroupNotFound(self.config.group.clone()))?;

        let outdated = filter_instances_to_replace(group.launch_config.as_deref(), &group.members);
        info!(
            group = %group.name,
            launch_config = group.launch_config.as_deref().unwrap_or("<none>"),
            members = group.members.len(),
            outdated = outdated.len(),
            "checked fleet group"
        );
        if outdated.is_empty() {
            return Ok(DrainReport::default());
        }

        let targets = resolve_nodes(self.cluster.as_ref(), &self.config.cluster, &outdated).await?;
        let outcomes = self.drain_all(targets).await;

        let mut terminated = Vec::new();
        let mut failures = Vec::new();
        for (instance_id, outcome) in outcomes {
            match outcome {
                Ok(()) => terminated.push(instance_id),
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            info!(group = %group.name, replaced = terminated.len(), "launch configuration enforced");
            Ok(DrainReport { terminated })
        } else {
            Err(DrainError::Incomplete {
                failures,
                terminated,
            })
        }
    }

    /// Fan out one worker per target and collect each outcome.
    async fn drain_all(&self, targets: Vec<DrainTarget>) -> BTreeMap<InstanceId, Result<(), InstanceFailure>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut set = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, DrainTarget> = HashMap::new();

        for target in targets {
            let worker = Worker {
                fleet: self.fleet.clone(),
                cluster: self.cluster.clone(),
                group: self.config.group.clone(),
                cluster_name: self.config.cluster.clone(),
                retry: self.config.retry.clone(),
            };
            let semaphore = semaphore.clone();
            let task_target = target.clone();
            let handle = set.spawn(async move {
                // Held until the worker finishes.
                let _permit = semaphore.acquire_owned().await;
                worker.replace(task_target).await
            });
            spawned.insert(handle.id(), target);
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Some(target) = spawned.remove(&id) {
                        outcomes.insert(target.instance_id, outcome);
                    }
                }
                Err(join_err) => {
                    if let Some(target) = spawned.remove(&join_err.id()) {
                        error!(
                            instance = %target.instance_id,
                            error = %join_err,
                            action_required = true,
                            "drain worker aborted"
                        );
                        let source = FleetError::WorkerAborted(target.instance_id.clone());
                        outcomes.insert(
                            target.instance_id.clone(),
                            Err(target.failure(DrainStep::WaitDrained, source, false)),
                        );
                    }
                }
            }
        }
        outcomes
    }
}

/// What a single drain worker owns.
struct Worker {
    fleet: Arc<dyn FleetApi>,
    cluster: Arc<dyn ClusterApi>,
    group: String,
    cluster_name: String,
    retry: RetryPolicy,
}

impl Worker {
    async fn replace(self, target: DrainTarget) -> Result<(), InstanceFailure> {
        self.detach_and_drain(&target).await?;

        self.fleet
            .terminate_instance(&target.instance_id)
            .await
            .map_err(|err| target.failure(DrainStep::Terminate, err.into(), false))?;
        info!(instance = %target.instance_id, node = %target.node_id, "instance terminated");
        Ok(())
    }

    async fn detach_and_drain(&self, target: &DrainTarget) -> Result<(), InstanceFailure> {
        let activities = self
            .fleet
            .detach_instance(&self.group, &target.instance_id)
            .await
            .map_err(|err| target.failure(DrainStep::Detach, err.into(), false))?;
        for activity in &activities {
            info!(instance = %target.instance_id, %activity, "detach activity");
        }

        let node_ids = [target.node_id.clone()];
        if let Err(err) = self
            .cluster
            .set_node_status(&self.cluster_name, &node_ids, NodeStatus::Draining)
            .await
        {
            let reattached = self.reattach(target).await;
            return Err(target.failure(DrainStep::SetDraining, err.into(), reattached));
        }

        if let Err(err) = self.wait_drained(&target.node_id).await {
            let reattached = self.reattach(target).await;
            error!(
                instance = %target.instance_id,
                node = %target.node_id,
                error = %err,
                action_required = true,
                "instance left in DRAINING status"
            );
            return Err(target.failure(DrainStep::WaitDrained, err, reattached));
        }
        Ok(())
    }

    async fn wait_drained(&self, node_id: &str) -> FleetResult<()> {
        let cluster = self.cluster_name.as_str();
        let node_ids = &[node_id.to_string()];

        self.retry
            .retry(|| async move {
                let nodes = self
                    .cluster
                    .describe_nodes(cluster, node_ids)
                    .await
                    .map_err(|err| Backoff::Transient(FleetError::from(err)))?;
                let Some(node) = nodes.into_iter().next() else {
                    return Err(Backoff::Permanent(FleetError::NodeNotFound(node_id.to_string())));
                };
                if node.status != NodeStatus::Draining {
                    return Err(Backoff::Permanent(FleetError::NodeNotDraining {
                        node: node_id.to_string(),
                        status: node.status.to_string(),
                    }));
                }
                if node.running_count != 0 {
                    debug!(node = %node_id, running = node.running_count, "node still draining");
                    return Err(Backoff::Transient(FleetError::NodeStillDraining {
                        node: node_id.to_string(),
                        running: node.running_count,
                    }));
                }
                Ok(())
            })
            .await
    }

    /// Put a detached instance back into its group. Returns whether it
    /// worked; a failure is only logged.
    async fn reattach(&self, target: &DrainTarget) -> bool {
        match self.fleet.attach_instance(&self.group, &target.instance_id).await {
            Ok(()) => {
                warn!(instance = %target.instance_id, group = %self.group, "instance re-attached to group");
                true
            }
            Err(err) => {
                error!(
                    instance = %target.instance_id,
                    group = %self.group,
                    error = %err,
                    action_required = true,
                    "instance re-attachment failed"
                );
                false
            }
        }
    }
}
