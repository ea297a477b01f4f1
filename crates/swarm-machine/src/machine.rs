//! `docker-machine` backed instance provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{MachineError, Result};
use crate::provider::{InstanceProvider, PowerState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Executable invoked for every operation
    pub binary: String,
    /// Driver passed to `create --driver`
    pub driver: String,
    /// Extra driver flags appended to `create`
    pub create_args: Vec<String>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            binary: "docker-machine".to_string(),
            driver: "virtualbox".to_string(),
            create_args: Vec::new(),
        }
    }
}

/// Instance provider shelling out to `docker-machine`
#[derive(Debug, Clone)]
pub struct DockerMachine {
    config: MachineConfig,
}

impl DockerMachine {
    pub fn new(config: MachineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    fn create_command(&self, name: &str) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--driver".to_string(),
            self.config.driver.clone(),
        ];
        args.extend(self.config.create_args.iter().cloned());
        args.push(name.to_string());
        args
    }

    fn destroy_command(&self, names: &[String]) -> Vec<String> {
        let mut args = vec!["rm".to_string(), "-f".to_string(), "-y".to_string()];
        args.extend(names.iter().cloned());
        args
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        let rendered = format!("{} {}", self.config.binary, args.join(" "));
        debug!("Running {}", rendered);

        let output = Command::new(&self.config.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MachineError::command_failed(rendered, stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for DockerMachine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}

/// Parse `ls --format "{{.Name}} {{.State}}"` output into name/state pairs
fn parse_listing(output: &str) -> Vec<(String, PowerState)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let state = parts.next().unwrap_or("");
            Some((name.to_string(), PowerState::from(state)))
        })
        .collect()
}

fn is_missing_host(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("does not exist") || lower.contains("not found")
}

#[async_trait]
impl InstanceProvider for DockerMachine {
    async fn create(&self, name: &str) -> Result<()> {
        info!("Creating machine {}", name);
        self.run(&self.create_command(name)).await?;
        info!("Machine {} created", name);
        Ok(())
    }

    async fn destroy(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        info!("Destroying machines: {}", names.join(", "));
        self.run(&self.destroy_command(names)).await?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<()> {
        info!("Starting machine {}", name);
        self.run(&["start".to_string(), name.to_string()]).await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        info!("Stopping machine {}", name);
        self.run(&["stop".to_string(), name.to_string()]).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str, state: Option<PowerState>) -> Result<Vec<String>> {
        let output = self
            .run(&[
                "ls".to_string(),
                "--format".to_string(),
                "{{.Name}} {{.State}}".to_string(),
            ])
            .await?;

        Ok(parse_listing(&output)
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .filter(|(_, current)| state.as_ref().map_or(true, |wanted| wanted == current))
            .map(|(name, _)| name)
            .collect())
    }

    async fn state(&self, name: &str) -> Result<PowerState> {
        match self.run(&["status".to_string(), name.to_string()]).await {
            Ok(output) => Ok(PowerState::from(output.as_str())),
            Err(MachineError::CommandFailed { stderr, .. }) if is_missing_host(&stderr) => {
                Ok(PowerState::Absent)
            }
            Err(e) => Err(e),
        }
    }

    async fn address(&self, name: &str) -> Result<IpAddr> {
        let output = match self.run(&["ip".to_string(), name.to_string()]).await {
            Err(MachineError::CommandFailed { stderr, .. }) if is_missing_host(&stderr) => {
                return Err(MachineError::machine_not_found(name));
            }
            other => other?,
        };

        let address = output.trim();
        address
            .parse()
            .map_err(|_| MachineError::invalid_address(name, address))
    }

    async fn regenerate_credentials(&self, name: &str) -> Result<()> {
        info!("Regenerating certificates for {}", name);
        self.run(&[
            "regenerate-certs".to_string(),
            "-f".to_string(),
            name.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn exec(&self, name: &str, command: &str) -> Result<String> {
        debug!("Executing on {}: {}", name, command);
        self.run(&["ssh".to_string(), name.to_string(), command.to_string()])
            .await
    }
}
