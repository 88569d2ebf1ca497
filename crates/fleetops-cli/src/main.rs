//! fleetops — service rollouts and launch-configuration enforcement.
//!
//! Both workflows run against a control-plane state file, so a rollout
//! or a drain can be rehearsed end to end before it touches a cluster.
//!
//! # Usage
//!
//! ```text
//! fleetops --state plane.json update-service --cluster prod --service web \
//!     --container-image app=nginx:1.25 --container-envvar app=DEBUG=
//! fleetops --state plane.json enforce-launch-config --cluster prod --asg workers
//! ```
//!
//! Exit status: 0 success, 1 failure, 2 rolled back, 3 rollback failed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use fleetops_rollout::WaitUntil;

mod commands;
mod flags;

use flags::{EntryFlag, ImageFlag, LogFlag};

#[derive(Parser)]
#[command(
    name = "fleetops",
    about = "Roll out services and replace outdated fleet members",
    version,
    propagate_version = true
)]
struct Cli {
    /// Control-plane state file (JSON). Updated in place after the run.
    #[arg(long, global = true, default_value = "fleetops-state.json")]
    state: PathBuf,

    /// Retry and concurrency settings (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mutate a service's task spec, deploy it, and roll back on failure.
    UpdateService(UpdateServiceArgs),
    /// Drain and terminate group members not on the group's launch configuration.
    EnforceLaunchConfig(EnforceArgs),
}

#[derive(Args)]
pub struct UpdateServiceArgs {
    /// Cluster name.
    #[arg(long)]
    pub cluster: String,

    /// Service name.
    #[arg(long)]
    pub service: String,

    /// Replica count (negative: no change).
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub desired_count: i64,

    /// Spec to mutate instead of the service's current one.
    #[arg(long = "taskdef")]
    pub base_spec: Option<String>,

    /// container=image
    #[arg(long = "container-image", value_parser = flags::parse_image)]
    pub images: Vec<ImageFlag>,

    /// container=name=value (empty value removes the variable)
    #[arg(long = "container-envvar", value_parser = flags::parse_entry)]
    pub envvars: Vec<EntryFlag>,

    /// container=name=valueFrom (empty valueFrom removes the secret)
    #[arg(long = "container-secret", value_parser = flags::parse_entry)]
    pub secrets: Vec<EntryFlag>,

    /// container=driver=option=value (`container=driver==` removes the driver)
    #[arg(long = "container-logopt", value_parser = flags::parse_log)]
    pub log_options: Vec<LogFlag>,

    /// container=driver=option=valueFrom
    #[arg(long = "container-logsecret", value_parser = flags::parse_log)]
    pub log_secrets: Vec<LogFlag>,

    /// Task role (`None` clears it).
    #[arg(long)]
    pub task_role: Option<String>,

    /// When to consider the rollout done: primary-rolled or draining-started.
    #[arg(long, default_value_t = WaitUntil::PrimaryRolled)]
    pub wait_until: WaitUntil,
}

#[derive(Args)]
pub struct EnforceArgs {
    /// Cluster the group's instances are registered in.
    #[arg(long)]
    pub cluster: String,

    /// Fleet (autoscaling) group name.
    #[arg(long = "asg")]
    pub group: String,

    /// Instances drained at the same time (overrides the config file).
    #[arg(long)]
    pub max_concurrency: Option<usize>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleetops=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let settings = commands::Settings {
        state: cli.state,
        config: cli.config,
    };
    let outcome = match cli.command {
        Command::UpdateService(args) => commands::update_service::run(&settings, args).await,
        Command::EnforceLaunchConfig(args) => commands::enforce::run(&settings, args).await,
    };

    match outcome {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(error = %format!("{err:#}"), "fleetops failed");
            ExitCode::FAILURE
        }
    }
}
