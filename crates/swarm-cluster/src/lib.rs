//! Swarm Cluster Management
//!
//! This crate converges a set of machine-backed instances onto a desired
//! number of managers and workers, and keeps their swarm membership in step:
//! instances are created, started, joined, drained, removed and destroyed
//! through an [`InstanceProvider`](swarm_machine::InstanceProvider) and a
//! [`ControlPlane`].

pub mod config;
pub mod control_plane;
pub mod error;
pub mod lifecycle;
pub mod membership;
pub mod node;
pub mod phase;
pub mod readiness;
pub mod reconcile;
pub mod services;
pub mod topology;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{PollPolicy, SwarmConfig};
pub use control_plane::{ControlPlane, SwarmControlPlane};
pub use error::{ClusterError, Result};
pub use lifecycle::{DeleteMode, LifecycleDriver};
pub use membership::{Activity, MemberState, Membership};
pub use node::{Availability, JoinTokens, LocalNodeState, NodeRecord, Reachability, Role};
pub use phase::{Phase, PhaseReport};
pub use reconcile::{ReconcileReport, Reconciler};
pub use services::{ClusterServices, HealthReport, InstanceHealth, ServiceRecord, ServiceSpec};
pub use topology::{DesiredTopology, InstanceName, Naming, TopologyDiff};

use std::sync::Arc;
use swarm_machine::{DockerMachine, InstanceProvider};

/// Entry point wiring the machine provider and control plane for one config
pub struct SwarmCluster {
    pub config: SwarmConfig,
    pub reconciler: Reconciler,
    pub services: ClusterServices,
}

impl SwarmCluster {
    /// Cluster backed by the configured machine binary
    pub fn new(config: SwarmConfig) -> Result<Self> {
        config.validate()?;
        let provider: Arc<dyn InstanceProvider> = Arc::new(DockerMachine::new(config.machine_config()));
        let control: Arc<dyn ControlPlane> = Arc::new(SwarmControlPlane::new(provider.clone()));
        Ok(Self::with_backends(config, provider, control))
    }

    pub fn with_backends(
        config: SwarmConfig,
        provider: Arc<dyn InstanceProvider>,
        control: Arc<dyn ControlPlane>,
    ) -> Self {
        let reconciler = Reconciler::new(provider.clone(), control.clone(), &config);
        let services = ClusterServices::new(provider, control, config.clone());
        Self {
            config,
            reconciler,
            services,
        }
    }
}
