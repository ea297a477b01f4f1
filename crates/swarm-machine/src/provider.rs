use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::error::Result;

/// Power state of a provisioned machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Stopped,
    /// The provider has no machine with that name
    Absent,
    /// Starting, stopping, paused, saved, error and similar in-between states
    Transitional(String),
}

impl From<&str> for PowerState {
    fn from(state: &str) -> Self {
        match state.trim().to_lowercase().as_str() {
            "running" => PowerState::Running,
            "stopped" => PowerState::Stopped,
            "" | "not found" | "absent" => PowerState::Absent,
            other => PowerState::Transitional(other.to_string()),
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerState::Running => write!(f, "running"),
            PowerState::Stopped => write!(f, "stopped"),
            PowerState::Absent => write!(f, "absent"),
            PowerState::Transitional(state) => write!(f, "{}", state),
        }
    }
}

/// Machine lifecycle operations the cluster engine depends on
///
/// Every method addresses machines by name. Implementations must be safe to
/// call concurrently for distinct names.
#[async_trait]
pub trait InstanceProvider: Send + Sync {
    async fn create(&self, name: &str) -> Result<()>;

    /// Destroy all named machines in a single provider call
    async fn destroy(&self, names: &[String]) -> Result<()>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str) -> Result<()>;

    /// Names starting with `prefix`, optionally restricted to one power state
    async fn list(&self, prefix: &str, state: Option<PowerState>) -> Result<Vec<String>>;

    async fn state(&self, name: &str) -> Result<PowerState>;

    async fn address(&self, name: &str) -> Result<IpAddr>;

    /// Regenerate TLS material after the machine address changed
    async fn regenerate_credentials(&self, name: &str) -> Result<()>;

    /// Run a shell command on the machine and return its stdout
    async fn exec(&self, name: &str, command: &str) -> Result<String>;
}
