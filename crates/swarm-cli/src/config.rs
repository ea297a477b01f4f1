use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use swarm_cluster::SwarmConfig;

/// Locates and loads the cluster configuration
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        Ok(Self { path })
    }

    /// `<config dir>/swarm/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("Could not determine the configuration directory")?;
        Ok(base.join("swarm").join("config.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file if present, otherwise fall back to defaults
    pub async fn load(&self) -> Result<SwarmConfig> {
        if !self.path.exists() {
            tracing::debug!("No configuration at {}, using defaults", self.path.display());
            return Ok(SwarmConfig::default());
        }

        SwarmConfig::load_from_file(&self.path)
            .await
            .with_context(|| format!("Failed to load configuration from {}", self.path.display()))
    }

    pub async fn save(&self, config: &SwarmConfig) -> Result<()> {
        config
            .save_to_file(&self.path)
            .await
            .with_context(|| format!("Failed to save configuration to {}", self.path.display()))
    }
}
