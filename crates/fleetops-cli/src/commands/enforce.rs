use fleetops_drain::{DrainConfig, DrainCoordinator, DrainError};
use tracing::error;

use super::Settings;
use crate::EnforceArgs;

pub fn drain_config(args: EnforceArgs, settings: &Settings) -> anyhow::Result<DrainConfig> {
    let file = settings.load_config()?;
    Ok(DrainConfig {
        group: args.group,
        cluster: args.cluster,
        max_concurrency: args.max_concurrency.unwrap_or(file.drain.max_concurrency),
        retry: file.retry,
    })
}

pub async fn run(settings: &Settings, args: EnforceArgs) -> anyhow::Result<u8> {
    let config = drain_config(args, settings)?;
    let plane = settings.open_plane()?;
    let coordinator = DrainCoordinator::new(config, plane.clone(), plane.clone());

    let outcome = coordinator.apply().await;
    settings.save_plane(&plane)?;

    match outcome {
        Ok(report) => {
            println!(
                "✓ {} instance(s) replaced in group {}",
                report.terminated.len(),
                coordinator.config().group
            );
            for instance in &report.terminated {
                println!("  terminated {instance}");
            }
            Ok(0)
        }
        Err(DrainError::Incomplete {
            failures,
            terminated,
        }) => {
            for instance in &terminated {
                println!("  terminated {instance}");
            }
            for failure in &failures {
                error!(
                    instance = %failure.instance_id,
                    node = %failure.node_id,
                    step = %failure.step,
                    reattached = failure.reattached,
                    error = %failure.source,
                    "instance not replaced"
                );
            }
            Ok(1)
        }
        Err(err) => {
            error!(error = %err, "launch configuration enforcement failed");
            Ok(1)
        }
    }
}
