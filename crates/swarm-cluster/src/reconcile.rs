//! Convergence of the provisioned cluster onto a desired topology

use std::sync::Arc;
use std::time::{Duration, Instant};
use swarm_machine::InstanceProvider;
use tracing::info;

use crate::config::SwarmConfig;
use crate::control_plane::ControlPlane;
use crate::error::Result;
use crate::lifecycle::{DeleteMode, LifecycleDriver};
use crate::membership::Membership;
use crate::phase::Phase;
use crate::topology::{diff, DesiredTopology, Naming, TopologyDiff};

/// What one reconciliation pass did
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub desired: DesiredTopology,
    pub diff: TopologyDiff,
    pub created: Vec<String>,
    pub deleted: Vec<String>,
    pub started: Vec<String>,
    /// Whether the swarm was (re)initialized on the leader
    pub initialized: bool,
    /// Instances that joined, or were reactivated in the role their name encodes
    pub joined: Vec<String>,
    pub total_duration: Duration,
}

impl ReconcileReport {
    fn new(desired: DesiredTopology, diff: TopologyDiff) -> Self {
        Self {
            desired,
            diff,
            created: Vec::new(),
            deleted: Vec::new(),
            started: Vec::new(),
            initialized: false,
            joined: Vec::new(),
            total_duration: Duration::ZERO,
        }
    }

    /// Whether the pass changed anything
    pub fn mutated(&self) -> bool {
        self.initialized
            || !self.created.is_empty()
            || !self.deleted.is_empty()
            || !self.started.is_empty()
            || !self.joined.is_empty()
    }
}

/// Drives the cluster towards a desired topology.
///
/// Every pass re-reads the provider and the control plane, so a pass
/// interrupted half way is completed by running it again.
pub struct Reconciler {
    lifecycle: LifecycleDriver,
    membership: Membership,
    naming: Naming,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn InstanceProvider>,
        control: Arc<dyn ControlPlane>,
        config: &SwarmConfig,
    ) -> Self {
        let membership = Membership::new(provider.clone(), control, config);
        let lifecycle = LifecycleDriver::new(provider, membership.clone(), config);
        Self {
            lifecycle,
            membership,
            naming: Naming::from(config),
        }
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    /// Counts of the instances currently provisioned, in any power state
    pub async fn current_topology(&self) -> Result<DesiredTopology> {
        let instances = self.lifecycle.list(None).await?;
        let names: Vec<String> = instances.into_iter().map(|i| i.name).collect();
        Ok(DesiredTopology::current(&self.naming, &names))
    }

    /// Create, start and join what is missing; gracefully remove what is extra
    pub async fn scale(&self, desired: DesiredTopology) -> Result<ReconcileReport> {
        self.reconcile(desired, DeleteMode::Graceful).await
    }

    /// Bring up a cluster of the given shape, resuming stopped instances
    pub async fn start(&self, desired: DesiredTopology) -> Result<ReconcileReport> {
        self.scale(desired).await
    }

    /// Destroy every cluster instance without leaving the swarm first
    pub async fn delete(&self) -> Result<ReconcileReport> {
        self.reconcile(DesiredTopology::empty(), DeleteMode::Forced).await
    }

    /// Take every running instance out of the swarm and power it off
    pub async fn stop(&self) -> Result<Vec<String>> {
        let stopped = self.lifecycle.stop_running().await?;
        info!("Stopped {} instance(s)", stopped.len());
        Ok(stopped)
    }

    async fn reconcile(&self, desired: DesiredTopology, mode: DeleteMode) -> Result<ReconcileReport> {
        let started_at = Instant::now();

        let provisioned = self.lifecycle.list(None).await?;
        let names: Vec<&str> = provisioned.iter().map(|i| i.as_str()).collect();
        let diff = diff(desired, &self.naming, &names);
        info!(
            "Reconciling to {}: {} missing, {} extra",
            desired,
            diff.missing.len(),
            diff.extra.len()
        );

        let mut report = ReconcileReport::new(desired, diff.clone());
        report.created = self.lifecycle.create_missing(&diff.missing).await?;
        report.deleted = self.lifecycle.delete_extra(&diff.extra, mode).await?;
        report.started = self.lifecycle.start_stopped().await?;

        if desired.managers > 0 {
            report.initialized = self.membership.init_leader().await?;
            let tokens = self.membership.join_tokens().await?;
            let leader = self.membership.leader_endpoint().await?;

            let mut phase = Phase::new("join");
            for instance in diff.wanted.iter().filter(|i| !i.is_leader()) {
                let membership = self.membership.clone();
                let tokens = tokens.clone();
                let instance = instance.clone();
                phase.spawn(instance.name.clone(), async move {
                    membership.join(&instance, &tokens, leader).await
                });
            }
            report.joined = phase.join().await.into_result(&self.naming)?;
        }

        report.total_duration = started_at.elapsed();
        info!(
            "Reconciled to {} in {:?} ({} created, {} deleted, {} joined)",
            desired,
            report.total_duration,
            report.created.len(),
            report.deleted.len(),
            report.joined.len()
        );
        Ok(report)
    }
}
