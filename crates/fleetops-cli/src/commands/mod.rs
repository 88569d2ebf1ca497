//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use fleetops_core::memory::MemoryControlPlane;
use fleetops_core::FleetConfig;

pub mod enforce;
pub mod update_service;

/// Options shared by every subcommand.
pub struct Settings {
    pub state: PathBuf,
    pub config: Option<PathBuf>,
}

impl Settings {
    pub fn load_config(&self) -> anyhow::Result<FleetConfig> {
        match &self.config {
            Some(path) => FleetConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display())),
            None => Ok(FleetConfig::default()),
        }
    }

    pub fn open_plane(&self) -> anyhow::Result<Arc<MemoryControlPlane>> {
        let plane = MemoryControlPlane::load(&self.state)
            .with_context(|| format!("loading control-plane state {}", self.state.display()))?;
        info!(state = %self.state.display(), "using control-plane state file");
        Ok(Arc::new(plane))
    }

    /// Write the plane back, whatever the workflow's outcome was.
    pub fn save_plane(&self, plane: &MemoryControlPlane) -> anyhow::Result<()> {
        plane
            .save(&self.state)
            .with_context(|| format!("saving control-plane state {}", self.state.display()))
    }
}
