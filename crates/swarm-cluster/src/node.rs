//! Cluster node records as reported by the control plane

use crate::error::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Manager,
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manager => write!(f, "manager"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// Scheduling availability of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Active,
    Pause,
    Drain,
    #[serde(other)]
    Unknown,
}

impl Availability {
    /// Argument accepted by `docker node update --availability`
    pub fn as_arg(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pause => "pause",
            Self::Drain | Self::Unknown => "drain",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Pause => write!(f, "pause"),
            Self::Drain => write!(f, "drain"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Reachability of a node as seen by the managers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reachability {
    Ready,
    Down,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Down => write!(f, "down"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One line of `docker node ls --format '{{json .}}'`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Hostname")]
    pub hostname: String,

    #[serde(rename = "Availability")]
    pub availability: Availability,

    #[serde(rename = "Status")]
    pub status: Reachability,

    /// Leader, Reachable or Unreachable for managers, empty for workers
    #[serde(rename = "ManagerStatus", default)]
    pub manager_status: String,
}

impl NodeRecord {
    pub fn role(&self) -> Role {
        if self.manager_status.is_empty() {
            Role::Worker
        } else {
            Role::Manager
        }
    }

    pub fn is_down(&self) -> bool {
        self.status == Reachability::Down
    }
}

/// Parse the JSON-lines listing once, at the API boundary
pub fn parse_node_listing(output: &str) -> Result<Vec<NodeRecord>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(ClusterError::from))
        .collect()
}

/// All records carrying the given hostname.
///
/// A hostname can map to several ids when stale records from an earlier
/// incarnation of the instance were never removed.
pub fn records_for<'a>(records: &'a [NodeRecord], hostname: &str) -> Vec<&'a NodeRecord> {
    records.iter().filter(|r| r.hostname == hostname).collect()
}

/// Swarm state local to one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalNodeState {
    Inactive,
    Pending,
    Active,
    Error,
    Locked,
    Unknown(String),
}

impl From<&str> for LocalNodeState {
    fn from(state: &str) -> Self {
        match state.trim().to_lowercase().as_str() {
            "inactive" | "" => Self::Inactive,
            "pending" => Self::Pending,
            "active" => Self::Active,
            "error" => Self::Error,
            "locked" => Self::Locked,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl LocalNodeState {
    /// Anything but inactive still holds some membership that a leave clears
    pub fn holds_membership(&self) -> bool {
        !matches!(self, Self::Inactive)
    }
}

/// Join secrets issued by the bootstrap leader
#[derive(Debug, Clone)]
pub struct JoinTokens {
    pub manager: String,
    pub worker: String,
}

impl JoinTokens {
    pub fn for_role(&self, role: Role) -> &str {
        match role {
            Role::Manager => &self.manager,
            Role::Worker => &self.worker,
        }
    }
}
