//! Cluster error types

use std::collections::BTreeMap;

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Cluster-specific error types
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    #[error("Machine error: {0}")]
    Machine(#[from] swarm_machine::MachineError),

    #[error("Control plane error: {0}")]
    ControlPlane(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Not connected to an active cluster: {0}")]
    NotConnected(String),

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("{phase} failed: {}", summarize(.failures))]
    PhaseFailed {
        phase: String,
        failures: BTreeMap<String, String>,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn summarize(failures: &BTreeMap<String, String>) -> String {
    failures
        .iter()
        .map(|(name, reason)| format!("{}: {}", name, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ClusterError {
    pub fn timeout<T: Into<String>>(what: T, attempts: u32) -> Self {
        Self::Timeout {
            what: what.into(),
            attempts,
        }
    }

    pub fn control_plane<T: Into<String>>(msg: T) -> Self {
        Self::ControlPlane(msg.into())
    }

    pub fn node_not_found<T: Into<String>>(name: T) -> Self {
        Self::NodeNotFound(name.into())
    }

    pub fn not_connected<T: Into<String>>(msg: T) -> Self {
        Self::NotConnected(msg.into())
    }

    pub fn invalid_topology<T: Into<String>>(msg: T) -> Self {
        Self::InvalidTopology(msg.into())
    }

    pub fn configuration<T: Into<String>>(msg: T) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn phase_failed<T: Into<String>>(phase: T, failures: BTreeMap<String, String>) -> Self {
        Self::PhaseFailed {
            phase: phase.into(),
            failures,
        }
    }

    /// Whether this error is a bounded wait running out
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<toml::de::Error> for ClusterError {
    fn from(err: toml::de::Error) -> Self {
        Self::configuration(format!("Failed to parse config: {}", err))
    }
}

impl From<toml::ser::Error> for ClusterError {
    fn from(err: toml::ser::Error) -> Self {
        Self::configuration(format!("Failed to serialize config: {}", err))
    }
}
