//! Cluster configuration management

use crate::error::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use swarm_machine::MachineConfig;

/// Main cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Name prefix of manager machines, followed by a dense zero-based index
    pub manager_prefix: String,

    /// Name prefix of worker machines
    pub worker_prefix: String,

    /// Executable used for machine operations
    pub machine_binary: String,

    /// Machine driver used when creating instances
    pub driver: String,

    /// Extra driver flags passed on creation
    pub create_args: Vec<String>,

    /// Swarm management port
    pub swarm_port: u16,

    /// Delay between concurrent machine creations
    pub create_stagger_secs: u64,

    /// Fixed wait after draining a node before it is forced out.
    ///
    /// The control plane exposes no drain-completion signal, so this is an
    /// approximation of "tasks have been rescheduled".
    pub drain_settle_secs: u64,

    /// Attempts made by every readiness wait
    pub poll_attempts: u32,

    /// Pause between readiness attempts
    pub poll_interval_ms: u64,

    /// Published port of the visualizer service
    pub visualizer_port: u16,

    /// Image of the visualizer service
    pub visualizer_image: String,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            manager_prefix: "m".to_string(),
            worker_prefix: "w".to_string(),
            machine_binary: "docker-machine".to_string(),
            driver: "virtualbox".to_string(),
            create_args: Vec::new(),
            swarm_port: 2377,
            create_stagger_secs: 3,
            drain_settle_secs: 10,
            poll_attempts: 60,
            poll_interval_ms: 1000,
            visualizer_port: 8080,
            visualizer_image: "dockersamples/visualizer".to_string(),
        }
    }
}

impl SwarmConfig {
    /// Load configuration from a TOML file
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: SwarmConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.manager_prefix.is_empty() || self.worker_prefix.is_empty() {
            return Err(ClusterError::configuration("Name prefixes cannot be empty"));
        }

        // With one prefix a prefix of the other, a name like "m10" would be ambiguous
        if self.manager_prefix.starts_with(&self.worker_prefix)
            || self.worker_prefix.starts_with(&self.manager_prefix)
        {
            return Err(ClusterError::configuration(format!(
                "Name prefixes '{}' and '{}' overlap",
                self.manager_prefix, self.worker_prefix
            )));
        }

        if self.poll_attempts == 0 {
            return Err(ClusterError::configuration("poll_attempts must be at least 1"));
        }

        if self.machine_binary.is_empty() {
            return Err(ClusterError::configuration("machine_binary cannot be empty"));
        }

        Ok(())
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            binary: self.machine_binary.clone(),
            driver: self.driver.clone(),
            create_args: self.create_args.clone(),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            attempts: self.poll_attempts,
            interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn create_stagger(&self) -> Duration {
        Duration::from_secs(self.create_stagger_secs)
    }

    pub fn drain_settle(&self) -> Duration {
        Duration::from_secs(self.drain_settle_secs)
    }

    /// Name of the bootstrap leader, always manager index 0
    pub fn leader_name(&self) -> String {
        format!("{}0", self.manager_prefix)
    }
}

/// Bound on a readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 60,
            interval: Duration::from_secs(1),
        }
    }
}
