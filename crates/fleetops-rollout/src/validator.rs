//! Deployment validator — polls the control plane until a triggered
//! rollout has converged under the selected [`WaitUntil`] strategy.
//!
//! The draining strategy needs a target-health snapshot taken before the
//! update is triggered, so validation is split in two: [`baseline`] runs
//! before the update, [`validate`] after it.
//!
//! [`baseline`]: DeploymentValidator::baseline
//! [`validate`]: DeploymentValidator::validate

use std::sync::Arc;

use tracing::{debug, info};

use fleetops_core::{
    snapshot_targets, Backoff, ClusterApi, DeploymentStatus, FleetError, FleetResult,
    LoadBalancerApi, RetryPolicy, Service, TargetHealthSnapshot, TARGET_STATE_DRAINING,
};

use crate::strategy::WaitUntil;

/// Retries granted while another PRIMARY deployment is visible next to
/// the triggered one. Past that the rollout is considered raced.
pub const RACE_TOLERANCE_RETRIES: u32 = 5;

/// State captured before triggering an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Baseline {
    /// Primary-rolled needs nothing up front.
    Deployment,
    /// Target health of the service's first target group.
    Targets {
        target_group: String,
        initial: TargetHealthSnapshot,
    },
}

pub struct DeploymentValidator {
    mode: WaitUntil,
    cluster: Arc<dyn ClusterApi>,
    balancer: Arc<dyn LoadBalancerApi>,
}

impl DeploymentValidator {
    pub fn new(
        mode: WaitUntil,
        cluster: Arc<dyn ClusterApi>,
        balancer: Arc<dyn LoadBalancerApi>,
    ) -> Self {
        Self {
            mode,
            cluster,
            balancer,
        }
    }

    pub fn mode(&self) -> WaitUntil {
        self.mode
    }

    /// Capture what the strategy needs before the update is triggered.
    pub async fn baseline(&self, service: &Service) -> FleetResult<Baseline> {
        match self.mode {
            WaitUntil::PrimaryRolled => Ok(Baseline::Deployment),
            WaitUntil::DrainingStarted => {
                let lb = service
                    .load_balancers
                    .first()
                    .ok_or_else(|| FleetError::LoadBalancerNotConfigured(service.name.clone()))?;
                let targets = self
                    .balancer
                    .describe_target_health(&lb.target_group_ref)
                    .await?;
                let initial = snapshot_targets(&targets);
                info!(
                    service = %service.name,
                    target_group = %lb.target_group_ref,
                    targets = %as_json(&initial),
                    "initial target states"
                );
                Ok(Baseline::Targets {
                    target_group: lb.target_group_ref.clone(),
                    initial,
                })
            }
        }
    }

    /// Poll until `updated` (the service as returned by the update call)
    /// has converged, or the policy gives up.
    pub async fn validate(
        &self,
        updated: &Service,
        baseline: &Baseline,
        policy: &RetryPolicy,
    ) -> FleetResult<()> {
        match baseline {
            Baseline::Deployment => self.wait_primary_rolled(updated, policy).await,
            Baseline::Targets {
                target_group,
                initial,
            } => self.wait_draining_started(target_group, initial, policy).await,
        }
    }

    async fn wait_primary_rolled(&self, updated: &Service, policy: &RetryPolicy) -> FleetResult<()> {
        let triggered = updated
            .primary_deployment()
            .ok_or(FleetError::NoPrimaryDeployment)?
            .id
            .as_str();
        let cluster = updated.cluster_ref.as_str();
        let service = updated.name.as_str();
        debug!(%service, deployment = %triggered, "waiting for primary deployment to roll");

        policy
            .retry(|| async move { self.check_primary_rolled(cluster, service, triggered, policy).await })
            .await?;

        info!(%service, deployment = %triggered, "primary deployment rolled");
        Ok(())
    }

    /// One convergence check of the primary-rolled strategy.
    async fn check_primary_rolled(
        &self,
        cluster: &str,
        service: &str,
        triggered: &str,
        policy: &RetryPolicy,
    ) -> Result<(), Backoff<FleetError>> {
        let race_policy = policy.with_max_retries(RACE_TOLERANCE_RETRIES);
        let described = race_policy
            .retry(|| async move {
                let described = self
                    .cluster
                    .describe_service(cluster, service)
                    .await
                    .map_err(|err| Backoff::Transient(FleetError::from(err)))?;
                if let Some(other) = described.as_ref().and_then(|svc| {
                    svc.deployments
                        .iter()
                        .find(|d| d.status == DeploymentStatus::Primary && d.id != triggered)
                }) {
                    return Err(Backoff::Transient(FleetError::DeploymentChangedElsewhere(
                        other.id.clone(),
                    )));
                }
                Ok(described)
            })
            .await;

        let svc = match described {
            Ok(Some(svc)) => svc,
            Ok(None) => return Err(Backoff::Permanent(FleetError::ServiceDeletedAfterUpdate)),
            Err(err @ FleetError::DeploymentChangedElsewhere(_)) => {
                return Err(Backoff::Permanent(err));
            }
            Err(err) => return Err(Backoff::Transient(err)),
        };

        if svc.deployments.iter().any(|d| d.id != triggered) {
            return Err(Backoff::Transient(FleetError::OtherThanPrimaryDeploymentFound));
        }
        if svc.deployment(triggered).is_none() {
            return Err(Backoff::Permanent(FleetError::ServiceDeletedAfterUpdate));
        }
        if svc.running_count < svc.desired_count {
            return Err(Backoff::Transient(FleetError::NotRunningDesiredCount {
                running: svc.running_count,
                desired: svc.desired_count,
            }));
        }
        Ok(())
    }

    async fn wait_draining_started(
        &self,
        target_group: &str,
        initial: &TargetHealthSnapshot,
        policy: &RetryPolicy,
    ) -> FleetResult<()> {
        policy
            .retry(|| async move {
                let targets = self
                    .balancer
                    .describe_target_health(target_group)
                    .await
                    .map_err(|err| Backoff::Transient(FleetError::from(err)))?;
                let current = snapshot_targets(&targets);
                debug!(
                    %target_group,
                    targets = %as_json(&current),
                    "waiting for targets transitioning to draining state"
                );

                if let Some(target) = first_transition_to_draining(initial, &current) {
                    info!(%target_group, %target, "target transitioned to draining state");
                    return Ok(());
                }
                if all_initial_targets_gone(initial, &current) {
                    info!(
                        %target_group,
                        "no initial targets left (none existed, all replaced, or desired count is zero)"
                    );
                    return Ok(());
                }
                Err(Backoff::Transient(FleetError::WaitingForDrainingState))
            })
            .await
    }
}

/// First initially-known target whose state changed to draining.
pub fn first_transition_to_draining<'a>(
    initial: &'a TargetHealthSnapshot,
    current: &TargetHealthSnapshot,
) -> Option<&'a str> {
    initial.iter().find_map(|(target, before)| {
        let now = current.get(target)?;
        (now != before && now == TARGET_STATE_DRAINING).then_some(target.as_str())
    })
}

/// True when none of the initially-known targets is still registered.
pub fn all_initial_targets_gone(initial: &TargetHealthSnapshot, current: &TargetHealthSnapshot) -> bool {
    initial.keys().all(|target| !current.contains_key(target))
}

/// Whether retrying a failed step can ever help.
pub fn classify(err: FleetError) -> Backoff<FleetError> {
    match err {
        FleetError::LoadBalancerNotConfigured(_)
        | FleetError::DeploymentChangedElsewhere(_)
        | FleetError::ServiceDeletedAfterUpdate
        | FleetError::NoPrimaryDeployment
        | FleetError::InvalidWaitUntil(_)
        | FleetError::InvalidArn(_) => Backoff::Permanent(err),
        err if err.is_not_found() => Backoff::Permanent(err),
        err => Backoff::Transient(err),
    }
}

fn as_json(snapshot: &TargetHealthSnapshot) -> String {
    serde_json::to_string(snapshot).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetops_core::memory::{ControlPlaneState, MemoryControlPlane};
    use fleetops_core::{Deployment, LoadBalancerRef, TargetHealth};

    const CLUSTER_REF: &str = "arn:aws:ecs:us-west-2:1:cluster/prod";

    fn deployment(id: &str, status: DeploymentStatus) -> Deployment {
        Deployment {
            id: id.into(),
            status,
            spec_ref: "web:2".into(),
            desired_count: 3,
            running_count: 0,
        }
    }

    fn service(running: u32, deployments: Vec<Deployment>) -> Service {
        Service {
            cluster_ref: CLUSTER_REF.into(),
            name: "web".into(),
            spec_ref: "web:2".into(),
            desired_count: 3,
            running_count: running,
            deployments,
            load_balancers: vec![LoadBalancerRef {
                target_group_ref: "tg/web".into(),
                container_name: Some("app".into()),
                container_port: Some(8080),
            }],
        }
    }

    fn validator(plane: &Arc<MemoryControlPlane>, mode: WaitUntil) -> DeploymentValidator {
        DeploymentValidator::new(mode, plane.clone(), plane.clone())
    }

    fn targets(pairs: &[(&str, &str)]) -> Vec<TargetHealth> {
        pairs
            .iter()
            .map(|(id, state)| TargetHealth {
                target_id: id.to_string(),
                state: state.to_string(),
            })
            .collect()
    }

    fn snapshot(pairs: &[(&str, &str)]) -> TargetHealthSnapshot {
        snapshot_targets(&targets(pairs))
    }

    #[tokio::test]
    async fn primary_rolled_retries_until_running_count_matches() {
        let plane = Arc::new(MemoryControlPlane::new(ControlPlaneState::default()));
        let triggered = service(0, vec![deployment("d-new", DeploymentStatus::Primary)]);
        plane.script_service(
            "web",
            [
                service(1, vec![deployment("d-new", DeploymentStatus::Primary)]),
                service(2, vec![deployment("d-new", DeploymentStatus::Primary)]),
                service(3, vec![deployment("d-new", DeploymentStatus::Primary)]),
            ],
        );

        let result = validator(&plane, WaitUntil::PrimaryRolled)
            .validate(&triggered, &Baseline::Deployment, &RetryPolicy::immediate(5))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn primary_rolled_gives_up_when_never_converging() {
        let plane = Arc::new(MemoryControlPlane::new(ControlPlaneState::default()));
        let triggered = service(0, vec![deployment("d-new", DeploymentStatus::Primary)]);
        plane.script_service(
            "web",
            (0..3).map(|_| service(1, vec![deployment("d-new", DeploymentStatus::Primary)])),
        );

        let result = validator(&plane, WaitUntil::PrimaryRolled)
            .validate(&triggered, &Baseline::Deployment, &RetryPolicy::immediate(3))
            .await;
        assert!(matches!(
            result,
            Err(FleetError::NotRunningDesiredCount { running: 1, desired: 3 })
        ));
    }

    #[tokio::test]
    async fn old_deployment_still_draining_is_retried() {
        let plane = Arc::new(MemoryControlPlane::new(ControlPlaneState::default()));
        let triggered = service(0, vec![deployment("d-new", DeploymentStatus::Primary)]);
        plane.script_service(
            "web",
            [
                service(
                    3,
                    vec![
                        deployment("d-old", DeploymentStatus::Active),
                        deployment("d-new", DeploymentStatus::Primary),
                    ],
                ),
                service(3, vec![deployment("d-new", DeploymentStatus::Primary)]),
            ],
        );

        let result = validator(&plane, WaitUntil::PrimaryRolled)
            .validate(&triggered, &Baseline::Deployment, &RetryPolicy::immediate(5))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn another_primary_fails_permanently() {
        let plane = Arc::new(MemoryControlPlane::new(ControlPlaneState::default()));
        let triggered = service(0, vec![deployment("d-new", DeploymentStatus::Primary)]);
        let raced = service(
            0,
            vec![
                deployment("d-new", DeploymentStatus::Active),
                deployment("d-other", DeploymentStatus::Primary),
            ],
        );
        plane.script_service("web", (0..=RACE_TOLERANCE_RETRIES).map(|_| raced.clone()));

        let result = validator(&plane, WaitUntil::PrimaryRolled)
            .validate(&triggered, &Baseline::Deployment, &RetryPolicy::immediate(25))
            .await;
        assert!(matches!(
            result,
            Err(FleetError::DeploymentChangedElsewhere(ref id)) if id == "d-other"
        ));
    }

    #[tokio::test]
    async fn brief_dual_primary_window_is_tolerated() {
        let plane = Arc::new(MemoryControlPlane::new(ControlPlaneState::default()));
        let triggered = service(0, vec![deployment("d-new", DeploymentStatus::Primary)]);
        let dual = service(
            0,
            vec![
                deployment("d-old", DeploymentStatus::Primary),
                deployment("d-new", DeploymentStatus::Primary),
            ],
        );
        plane.script_service(
            "web",
            [
                dual.clone(),
                dual,
                service(3, vec![deployment("d-new", DeploymentStatus::Primary)]),
            ],
        );

        let result = validator(&plane, WaitUntil::PrimaryRolled)
            .validate(&triggered, &Baseline::Deployment, &RetryPolicy::immediate(25))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn vanished_deployment_fails_permanently() {
        let plane = Arc::new(MemoryControlPlane::new(ControlPlaneState::default()));
        let triggered = service(0, vec![deployment("d-new", DeploymentStatus::Primary)]);
        plane.script_service("web", [service(0, vec![])]);

        let result = validator(&plane, WaitUntil::PrimaryRolled)
            .validate(&triggered, &Baseline::Deployment, &RetryPolicy::immediate(25))
            .await;
        assert!(matches!(result, Err(FleetError::ServiceDeletedAfterUpdate)));
    }

    #[tokio::test]
    async fn deleted_service_fails_permanently() {
        // No script and no stored service: describe returns nothing.
        let plane = Arc::new(MemoryControlPlane::new(ControlPlaneState::default()));
        let triggered = service(0, vec![deployment("d-new", DeploymentStatus::Primary)]);

        let result = validator(&plane, WaitUntil::PrimaryRolled)
            .validate(&triggered, &Baseline::Deployment, &RetryPolicy::immediate(25))
            .await;
        assert!(matches!(result, Err(FleetError::ServiceDeletedAfterUpdate)));
    }

    #[tokio::test]
    async fn update_without_primary_is_rejected() {
        let plane = Arc::new(MemoryControlPlane::new(ControlPlaneState::default()));
        let triggered = service(0, vec![deployment("d-new", DeploymentStatus::Active)]);

        let result = validator(&plane, WaitUntil::PrimaryRolled)
            .validate(&triggered, &Baseline::Deployment, &RetryPolicy::immediate(25))
            .await;
        assert!(matches!(result, Err(FleetError::NoPrimaryDeployment)));
    }

    #[tokio::test]
    async fn draining_baseline_requires_load_balancer() {
        let plane = Arc::new(MemoryControlPlane::new(ControlPlaneState::default()));
        let mut svc = service(3, vec![]);
        svc.load_balancers.clear();

        let result = validator(&plane, WaitUntil::DrainingStarted).baseline(&svc).await;
        assert!(matches!(result, Err(FleetError::LoadBalancerNotConfigured(_))));
    }

    #[tokio::test]
    async fn draining_started_detects_transition() {
        let plane = Arc::new(MemoryControlPlane::new(ControlPlaneState::default()));
        plane.script_target_health(
            "tg/web",
            [
                targets(&[("10.0.0.1", "healthy"), ("10.0.0.2", "healthy")]),
                targets(&[("10.0.0.1", "healthy"), ("10.0.0.2", "healthy")]),
                targets(&[("10.0.0.1", "healthy"), ("10.0.0.2", "draining")]),
            ],
        );
        let validator = validator(&plane, WaitUntil::DrainingStarted);
        let svc = service(3, vec![deployment("d-new", DeploymentStatus::Primary)]);

        let baseline = validator.baseline(&svc).await.unwrap();
        assert_eq!(
            baseline,
            Baseline::Targets {
                target_group: "tg/web".into(),
                initial: snapshot(&[("10.0.0.1", "healthy"), ("10.0.0.2", "healthy")]),
            }
        );
        let result = validator
            .validate(&svc, &baseline, &RetryPolicy::immediate(5))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn draining_started_times_out() {
        let plane = Arc::new(MemoryControlPlane::new(ControlPlaneState::default()));
        plane.script_target_health(
            "tg/web",
            (0..4).map(|_| targets(&[("10.0.0.1", "healthy")])),
        );
        let validator = validator(&plane, WaitUntil::DrainingStarted);
        let svc = service(3, vec![]);

        let baseline = validator.baseline(&svc).await.unwrap();
        let result = validator
            .validate(&svc, &baseline, &RetryPolicy::immediate(3))
            .await;
        assert!(matches!(result, Err(FleetError::WaitingForDrainingState)));
    }

    #[test]
    fn transition_must_end_in_draining() {
        let initial = snapshot(&[("a", "healthy"), ("b", "initial")]);
        assert_eq!(
            first_transition_to_draining(&initial, &snapshot(&[("a", "unhealthy"), ("b", "healthy")])),
            None
        );
        assert_eq!(
            first_transition_to_draining(&initial, &snapshot(&[("a", "healthy"), ("b", "draining")])),
            Some("b")
        );
        // New targets draining do not count.
        assert_eq!(
            first_transition_to_draining(&initial, &snapshot(&[("c", "draining")])),
            None
        );
    }

    #[test]
    fn already_draining_target_is_not_a_transition() {
        let initial = snapshot(&[("a", "draining")]);
        assert_eq!(first_transition_to_draining(&initial, &initial), None);
    }

    #[test]
    fn all_gone_covers_empty_and_replaced_targets() {
        let empty = TargetHealthSnapshot::new();
        assert!(all_initial_targets_gone(&empty, &snapshot(&[("x", "healthy")])));
        assert!(all_initial_targets_gone(
            &snapshot(&[("a", "healthy")]),
            &snapshot(&[("b", "initial")])
        ));
        assert!(!all_initial_targets_gone(
            &snapshot(&[("a", "healthy"), ("b", "healthy")]),
            &snapshot(&[("b", "healthy")])
        ));
    }

    #[test]
    fn classification() {
        assert!(matches!(
            classify(FleetError::LoadBalancerNotConfigured("web".into())),
            Backoff::Permanent(_)
        ));
        assert!(matches!(
            classify(FleetError::GroupNotFound("asg".into())),
            Backoff::Permanent(_)
        ));
        assert!(matches!(
            classify(FleetError::WaitingForDrainingState),
            Backoff::Transient(_)
        ));
    }
}
