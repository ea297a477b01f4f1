//! Desired topology and its diff against provisioned machines

use crate::config::SwarmConfig;
use crate::error::{ClusterError, Result};
use crate::node::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Maps roles and indices to machine names and back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    pub manager_prefix: String,
    pub worker_prefix: String,
}

impl Naming {
    pub fn new(manager_prefix: impl Into<String>, worker_prefix: impl Into<String>) -> Self {
        Self {
            manager_prefix: manager_prefix.into(),
            worker_prefix: worker_prefix.into(),
        }
    }

    pub fn prefix(&self, role: Role) -> &str {
        match role {
            Role::Manager => &self.manager_prefix,
            Role::Worker => &self.worker_prefix,
        }
    }

    pub fn instance(&self, role: Role, index: u32) -> InstanceName {
        InstanceName {
            role,
            index,
            name: format!("{}{}", self.prefix(role), index),
        }
    }

    pub fn leader(&self) -> InstanceName {
        self.instance(Role::Manager, 0)
    }

    /// Parse `<prefix><index>`; anything else is not a cluster machine
    pub fn parse(&self, name: &str) -> Option<InstanceName> {
        [Role::Manager, Role::Worker].into_iter().find_map(|role| {
            let digits = name.strip_prefix(self.prefix(role))?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            // "m01" would collide with "m1" after parsing
            if digits.len() > 1 && digits.starts_with('0') {
                return None;
            }
            let index = digits.parse().ok()?;
            Some(InstanceName {
                role,
                index,
                name: name.to_string(),
            })
        })
    }

    /// Keep only names following the convention, sorted managers first
    pub fn parse_all<I, S>(&self, names: I) -> Vec<InstanceName>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<InstanceName> = names
            .into_iter()
            .filter_map(|n| self.parse(n.as_ref()))
            .collect();
        set.into_iter().collect()
    }
}

impl From<&SwarmConfig> for Naming {
    fn from(config: &SwarmConfig) -> Self {
        Self::new(config.manager_prefix.clone(), config.worker_prefix.clone())
    }
}

/// A machine name decoded into role and index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceName {
    pub role: Role,
    pub index: u32,
    pub name: String,
}

impl InstanceName {
    pub fn is_leader(&self) -> bool {
        self.role == Role::Manager && self.index == 0
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Requested manager and worker counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredTopology {
    pub managers: u32,
    pub workers: u32,
}

impl DesiredTopology {
    pub fn new(managers: u32, workers: u32) -> Result<Self> {
        if managers == 0 && workers > 0 {
            return Err(ClusterError::invalid_topology(format!(
                "{} worker(s) requested without a manager",
                workers
            )));
        }
        Ok(Self { managers, workers })
    }

    pub fn empty() -> Self {
        Self {
            managers: 0,
            workers: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.managers == 0 && self.workers == 0
    }

    /// Counts as currently provisioned, from a listing of machine names
    pub fn current(naming: &Naming, names: &[String]) -> Self {
        let instances = naming.parse_all(names);
        let count = |role| instances.iter().filter(|i| i.role == role).count() as u32;
        Self {
            managers: count(Role::Manager),
            workers: count(Role::Worker),
        }
    }

    /// Resolve command arguments into a topology.
    ///
    /// No argument keeps `current` (or one manager on an empty cluster), one
    /// argument `N` means one manager and `N - 1` workers, two arguments are
    /// manager and worker counts.
    pub fn resolve(args: &[u32], current: DesiredTopology) -> Result<Self> {
        match args {
            [] if current.is_empty() => Self::new(1, 0),
            [] => Self::new(current.managers, current.workers),
            [0] => Err(ClusterError::invalid_topology(
                "a cluster needs at least one node",
            )),
            [total] => Self::new(1, total - 1),
            [managers, workers] => Self::new(*managers, *workers),
            _ => Err(ClusterError::invalid_topology(format!(
                "expected at most two counts, got {}",
                args.len()
            ))),
        }
    }

    /// Dense zero-based names for every requested node, managers first
    pub fn wanted(&self, naming: &Naming) -> Vec<InstanceName> {
        (0..self.managers)
            .map(|i| naming.instance(Role::Manager, i))
            .chain((0..self.workers).map(|i| naming.instance(Role::Worker, i)))
            .collect()
    }
}

impl fmt::Display for DesiredTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} manager(s), {} worker(s)", self.managers, self.workers)
    }
}

/// Outcome of comparing wanted names against provisioned ones
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopologyDiff {
    pub wanted: Vec<InstanceName>,
    pub missing: Vec<InstanceName>,
    pub extra: Vec<InstanceName>,
}

impl TopologyDiff {
    pub fn is_converged(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }

    pub fn missing_names(&self) -> Vec<String> {
        self.missing.iter().map(|i| i.name.clone()).collect()
    }

    pub fn extra_names(&self) -> Vec<String> {
        self.extra.iter().map(|i| i.name.clone()).collect()
    }
}

/// Compute missing and extra machines. Pure; names outside the naming
/// convention in `actual` are ignored.
pub fn diff<S: AsRef<str>>(desired: DesiredTopology, naming: &Naming, actual: &[S]) -> TopologyDiff {
    let wanted: BTreeSet<InstanceName> = desired.wanted(naming).into_iter().collect();
    let actual: BTreeSet<InstanceName> = naming.parse_all(actual).into_iter().collect();

    TopologyDiff {
        missing: wanted.difference(&actual).cloned().collect(),
        extra: actual.difference(&wanted).cloned().collect(),
        wanted: wanted.into_iter().collect(),
    }
}
