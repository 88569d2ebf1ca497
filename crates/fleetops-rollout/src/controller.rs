//! Rollout controller — drives one mutate/register/update/validate cycle.
//!
//! The controller fetches the service, derives a new task spec from the
//! configured overrides, triggers a forced deployment and validates it.
//! When anything after the service description fails it re-deploys the
//! previous spec and validates that instead.

use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use fleetops_core::{
    Arn, Backoff, ClusterApi, FleetError, FleetResult, LoadBalancerApi, RetryPolicy, Service,
    SpecRef, UpdateServiceRequest,
};
use fleetops_spec::{mutate, unknown_containers, SpecOverrides};

use crate::error::{RolloutError, RolloutResult};
use crate::strategy::WaitUntil;
use crate::validator::{classify, DeploymentValidator};

/// Everything one rollout needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    pub cluster: String,
    pub service: String,
    pub overrides: SpecOverrides,
    /// Replica count to set; `None` keeps the current one.
    pub desired_count: Option<u32>,
    /// Spec to mutate instead of the one the service currently runs.
    pub base_spec: Option<SpecRef>,
    pub wait_until: WaitUntil,
    pub retry: RetryPolicy,
    pub rollback_retry: RetryPolicy,
}

/// Where the controller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RolloutPhase {
    Pending,
    Fetching,
    Mutating,
    /// Only entered when the mutation changed something.
    Registering,
    Updating,
    Validating,
    Converged,
    RollingBack,
    RolledBack,
    RollbackFailed,
}

/// Result of [`update_service`].
///
/// `previous` is set as soon as the service was matched, so a failed copy
/// or update still leaves something to roll back to.
#[derive(Debug)]
pub struct UpdateAttempt {
    pub previous: Option<Service>,
    pub outcome: FleetResult<Service>,
}

/// Copy the base spec and point the service at the copy.
///
/// `current` must be the service named `service` in the cluster named
/// by `cluster_arn`; otherwise neither callback runs and the outcome is
/// [`FleetError::ServiceNotFound`]. The base spec is `base_spec` when
/// given, else the service's own. The replica count passed to `update`
/// is `desired_count` when given, else the service's own.
#[allow(clippy::too_many_arguments)]
pub async fn update_service<C, CF, U, UF>(
    cluster_arn: &Arn,
    current: &Service,
    cluster: &str,
    service: &str,
    base_spec: Option<&str>,
    desired_count: Option<u32>,
    copy_spec: C,
    update: U,
) -> UpdateAttempt
where
    C: FnOnce(SpecRef) -> CF,
    CF: Future<Output = FleetResult<SpecRef>>,
    U: FnOnce(SpecRef, u32) -> UF,
    UF: Future<Output = FleetResult<Service>>,
{
    if cluster_arn.cluster_name() != cluster || current.name != service {
        return UpdateAttempt {
            previous: None,
            outcome: Err(FleetError::ServiceNotFound {
                cluster: cluster.to_string(),
                service: service.to_string(),
            }),
        };
    }

    let base = base_spec.unwrap_or(&current.spec_ref).to_string();
    let desired = desired_count.unwrap_or(current.desired_count);
    let outcome = match copy_spec(base).await {
        Ok(spec_ref) => update(spec_ref, desired).await,
        Err(err) => Err(err),
    };
    UpdateAttempt {
        previous: Some(current.clone()),
        outcome,
    }
}

pub struct RolloutController {
    config: RolloutConfig,
    cluster: Arc<dyn ClusterApi>,
    validator: DeploymentValidator,
    phase: Mutex<RolloutPhase>,
}

impl RolloutController {
    pub fn new(
        config: RolloutConfig,
        cluster: Arc<dyn ClusterApi>,
        balancer: Arc<dyn LoadBalancerApi>,
    ) -> Self {
        let validator = DeploymentValidator::new(config.wait_until, cluster.clone(), balancer);
        Self {
            config,
            cluster,
            validator,
            phase: Mutex::new(RolloutPhase::Pending),
        }
    }

    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }

    pub fn phase(&self) -> RolloutPhase {
        *self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self, phase: RolloutPhase) {
        let mut current = self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(service = %self.config.service, from = ?*current, to = ?phase, "rollout phase");
        *current = phase;
    }

    /// Run the cycle once.
    pub async fn apply(&self) -> RolloutResult<()> {
        let cluster = self.config.cluster.as_str();
        let service = self.config.service.as_str();

        self.enter(RolloutPhase::Fetching);
        let current = self
            .cluster
            .describe_service(cluster, service)
            .await
            .map_err(FleetError::from)?
            .ok_or_else(|| FleetError::ServiceNotFound {
                cluster: cluster.to_string(),
                service: service.to_string(),
            })?;
        let cluster_arn: Arn = current.cluster_ref.parse()?;
        info!(
            %cluster,
            %service,
            spec = %current.spec_ref,
            desired = current.desired_count,
            wait_until = %self.validator.mode(),
            "starting rollout"
        );

        // Taken before anything changes so draining can be detected later.
        let baseline = self.validator.baseline(&current).await?;

        let attempt = update_service(
            &cluster_arn,
            &current,
            cluster,
            service,
            self.config.base_spec.as_deref(),
            self.config.desired_count,
            |base| self.copy_spec(base),
            |spec_ref, desired| self.trigger(spec_ref, desired),
        )
        .await;

        let updated = match attempt.outcome {
            Ok(updated) => updated,
            Err(cause) => return Err(self.compensate(cause, attempt.previous.as_ref()).await),
        };

        self.enter(RolloutPhase::Validating);
        match self
            .validator
            .validate(&updated, &baseline, &self.config.retry)
            .await
        {
            Ok(()) => {
                self.enter(RolloutPhase::Converged);
                info!(%service, spec = %updated.spec_ref, "rollout converged");
                Ok(())
            }
            Err(cause) => Err(self.compensate(cause, Some(&current)).await),
        }
    }

    /// Derive and (when changed) register the new spec.
    async fn copy_spec(&self, base: SpecRef) -> FleetResult<SpecRef> {
        self.enter(RolloutPhase::Mutating);
        let original = self.cluster.describe_spec(&base).await?;

        for name in unknown_containers(&original, self.config.overrides.container_names()) {
            warn!(spec = %base, container = %name, "override names a container the spec does not have");
        }

        let mutated = mutate(&original, &self.config.overrides);
        if mutated == original {
            info!(spec = %base, "spec unchanged, skipping registration");
            return Ok(base);
        }

        self.enter(RolloutPhase::Registering);
        let registered = self.cluster.register_spec(&mutated).await?;
        info!(from = %base, to = %registered, "registered new spec revision");
        Ok(registered)
    }

    /// Point the service at `spec_ref`, always forcing a new deployment.
    async fn trigger(&self, spec_ref: SpecRef, desired: u32) -> FleetResult<Service> {
        self.enter(RolloutPhase::Updating);
        let request = UpdateServiceRequest {
            cluster: self.config.cluster.clone(),
            service: self.config.service.clone(),
            spec_ref: Some(spec_ref),
            desired_count: Some(desired),
            force_new_deployment: true,
        };
        let updated = self.cluster.update_service(&request).await?;
        info!(
            service = %updated.name,
            spec = %updated.spec_ref,
            desired = updated.desired_count,
            "update triggered"
        );
        Ok(updated)
    }

    /// Roll back to `previous` if there is one, and classify the outcome.
    async fn compensate(&self, cause: FleetError, previous: Option<&Service>) -> RolloutError {
        let Some(previous) = previous else {
            return RolloutError::Failed(cause);
        };

        self.enter(RolloutPhase::RollingBack);
        warn!(
            service = %previous.name,
            spec = %previous.spec_ref,
            desired = previous.desired_count,
            error = %cause,
            "rollout failed, rolling back"
        );

        match self.rollback(previous).await {
            Ok(()) => {
                self.enter(RolloutPhase::RolledBack);
                info!(service = %previous.name, spec = %previous.spec_ref, "rollback converged");
                RolloutError::SuccessfulRollback { cause }
            }
            Err(rollback) => {
                self.enter(RolloutPhase::RollbackFailed);
                error!(
                    service = %previous.name,
                    spec = %previous.spec_ref,
                    error = %rollback,
                    action_required = true,
                    "rollback failed"
                );
                RolloutError::FailedRollback { cause, rollback }
            }
        }
    }

    async fn rollback(&self, previous: &Service) -> FleetResult<()> {
        let policy = &self.config.rollback_retry;
        let request = &UpdateServiceRequest {
            cluster: self.config.cluster.clone(),
            service: previous.name.clone(),
            spec_ref: Some(previous.spec_ref.clone()),
            desired_count: Some(previous.desired_count),
            force_new_deployment: true,
        };

        let (updated, baseline) = policy
            .retry(|| async move {
                let baseline = self.validator.baseline(previous).await.map_err(classify)?;
                let updated = self
                    .cluster
                    .update_service(request)
                    .await
                    .map_err(|err| classify(err.into()))?;
                Ok::<_, Backoff<FleetError>>((updated, baseline))
            })
            .await?;

        self.validator.validate(&updated, &baseline, policy).await
    }
}
