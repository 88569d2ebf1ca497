use fleetops_rollout::{RolloutConfig, RolloutController, RolloutError};
use fleetops_spec::{RoleOverride, SpecOverrides};
use tracing::{error, warn};

use super::Settings;
use crate::flags;
use crate::UpdateServiceArgs;

/// Build the rollout config from flags, with retry policies from the
/// config file.
pub fn rollout_config(args: UpdateServiceArgs, settings: &Settings) -> anyhow::Result<RolloutConfig> {
    let file = settings.load_config()?;
    let overrides = SpecOverrides {
        images: flags::image_overrides(&args.images),
        environment: flags::entry_overrides(&args.envvars),
        secrets: flags::entry_overrides(&args.secrets),
        log_options: flags::driver_overrides(&args.log_options),
        log_secrets: flags::driver_overrides(&args.log_secrets),
        task_role: args
            .task_role
            .as_deref()
            .map(RoleOverride::from_flag)
            .unwrap_or_default(),
    };
    Ok(RolloutConfig {
        cluster: args.cluster,
        service: args.service,
        overrides,
        desired_count: flags::desired_count(args.desired_count)?,
        base_spec: args.base_spec,
        wait_until: args.wait_until,
        rollback_retry: file.rollback_retry(),
        retry: file.retry,
    })
}

/// Run one rollout and map its outcome to an exit status.
pub async fn run(settings: &Settings, args: UpdateServiceArgs) -> anyhow::Result<u8> {
    let config = rollout_config(args, settings)?;
    let plane = settings.open_plane()?;
    let controller = RolloutController::new(config, plane.clone(), plane.clone());

    let outcome = controller.apply().await;
    settings.save_plane(&plane)?;

    match outcome {
        Ok(()) => {
            let config = controller.config();
            println!("✓ {} rolled out in {}", config.service, config.cluster);
            Ok(0)
        }
        Err(err) => {
            match &err {
                RolloutError::SuccessfulRollback { .. } => {
                    warn!(error = %err, phase = ?controller.phase(), "rollout rolled back")
                }
                _ => error!(error = %err, phase = ?controller.phase(), "rollout failed"),
            }
            Ok(err.exit_code())
        }
    }
}
