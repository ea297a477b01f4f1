//! Instance lifecycle: create, destroy, start and stop machines
//!
//! Every fan-out here goes through a [`Phase`], so an instance failing never
//! cancels its siblings and the caller sees every failure at once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use swarm_machine::{InstanceProvider, PowerState};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::{PollPolicy, SwarmConfig};
use crate::error::{ClusterError, Result};
use crate::membership::Membership;
use crate::phase::Phase;
use crate::readiness::wait_for_ok;
use crate::topology::{InstanceName, Naming};

/// How extra instances are taken out before being destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Demote, drain and leave the swarm first, leader last
    Graceful,
    /// Destroy without touching membership
    Forced,
}

#[derive(Clone)]
pub struct LifecycleDriver {
    provider: Arc<dyn InstanceProvider>,
    membership: Membership,
    naming: Naming,
    stagger: Duration,
    poll: PollPolicy,
    /// Set once a machine was created in this process. The provider sets up
    /// shared state (certificates, driver images) on its first creation,
    /// which must not race.
    first_created: Arc<OnceCell<()>>,
}

impl LifecycleDriver {
    pub fn new(provider: Arc<dyn InstanceProvider>, membership: Membership, config: &SwarmConfig) -> Self {
        Self {
            provider,
            membership,
            naming: Naming::from(config),
            stagger: config.create_stagger(),
            poll: config.poll_policy(),
            first_created: Arc::new(OnceCell::new()),
        }
    }

    /// Create every named instance. Returns the names created.
    pub async fn create_missing(&self, instances: &[InstanceName]) -> Result<Vec<String>> {
        if instances.is_empty() {
            return Ok(Vec::new());
        }

        info!("Creating {} instance(s)", instances.len());
        let mut queue: VecDeque<InstanceName> = instances.iter().cloned().collect();
        let mut phase = Phase::new("create");

        while !self.first_created.initialized() {
            let Some(first) = queue.pop_front() else { break };
            debug!("First creation in this process, creating {} alone", first);
            let provider = self.provider.clone();
            let name = first.name.clone();
            let outcome = self
                .first_created
                .get_or_try_init(|| async move {
                    provider.create(&first.name).await.map_err(ClusterError::from)
                })
                .await
                .map(|_| true);
            phase.record(name, outcome);
        }

        for (i, instance) in queue.into_iter().enumerate() {
            if i > 0 && !self.stagger.is_zero() {
                tokio::time::sleep(self.stagger).await;
            }
            let provider = self.provider.clone();
            phase.spawn(instance.name.clone(), async move {
                provider.create(&instance.name).await?;
                Ok(true)
            });
        }

        phase.join().await.into_result(&self.naming)
    }

    /// Destroy the given instances in one provider batch.
    ///
    /// In graceful mode non-leaders leave the swarm concurrently first and
    /// the leader, if listed, leaves after all of them. A failed leave
    /// aborts before anything is destroyed.
    pub async fn delete_extra(&self, instances: &[InstanceName], mode: DeleteMode) -> Result<Vec<String>> {
        if instances.is_empty() {
            return Ok(Vec::new());
        }

        if mode == DeleteMode::Graceful {
            let (leaders, others): (Vec<&InstanceName>, Vec<&InstanceName>) =
                instances.iter().partition(|i| i.is_leader());

            let mut phase = Phase::new("leave");
            for instance in others {
                let membership = self.membership.clone();
                let instance = instance.clone();
                phase.spawn(instance.name.clone(), async move { membership.leave(&instance).await });
            }
            phase.join().await.into_result(&self.naming)?;

            for leader in leaders {
                self.membership.leave(leader).await?;
            }
        }

        let names: Vec<String> = instances.iter().map(|i| i.name.clone()).collect();
        info!("Destroying {}", names.join(", "));
        self.provider.destroy(&names).await?;
        Ok(names)
    }

    async fn power_on(provider: Arc<dyn InstanceProvider>, poll: PollPolicy, name: String) -> Result<bool> {
        provider.start(&name).await?;

        let what = format!("{} to be running", name);
        wait_for_ok(poll, &what, || {
            let provider = provider.clone();
            let name = name.clone();
            async move { Ok(provider.state(&name).await? == PowerState::Running) }
        })
        .await?;

        // A restarted machine may come back with another address
        provider.regenerate_credentials(&name).await?;
        Ok(true)
    }

    /// Power on every stopped cluster instance, leader first.
    /// Returns the names started.
    pub async fn start_stopped(&self) -> Result<Vec<String>> {
        let stopped = self.list(Some(PowerState::Stopped)).await?;
        if stopped.is_empty() {
            return Ok(Vec::new());
        }

        let mut phase = Phase::new("start");
        let (leaders, others): (Vec<InstanceName>, Vec<InstanceName>) =
            stopped.into_iter().partition(|i| i.is_leader());

        for leader in leaders {
            info!("Starting leader {}", leader);
            let outcome = Self::power_on(self.provider.clone(), self.poll, leader.name.clone()).await;
            phase.record(leader.name, outcome);
        }

        for instance in others {
            phase.spawn(
                instance.name.clone(),
                Self::power_on(self.provider.clone(), self.poll, instance.name),
            );
        }

        phase.join().await.into_result(&self.naming)
    }

    /// Leave the swarm, then power off every running cluster instance,
    /// leader last. Returns the names stopped.
    pub async fn stop_running(&self) -> Result<Vec<String>> {
        let running = self.list(Some(PowerState::Running)).await?;
        let (leaders, others): (Vec<InstanceName>, Vec<InstanceName>) =
            running.into_iter().partition(|i| i.is_leader());

        let mut phase = Phase::new("stop");
        for instance in others {
            let membership = self.membership.clone();
            let provider = self.provider.clone();
            phase.spawn(instance.name.clone(), async move {
                membership.leave(&instance).await?;
                provider.stop(&instance.name).await?;
                Ok(true)
            });
        }
        // The leader keeps the cluster reachable until its members are out
        let mut stopped = phase.join().await.into_result(&self.naming)?;

        for leader in leaders {
            self.membership.leave(&leader).await?;
            self.provider.stop(&leader.name).await?;
            stopped.push(leader.name);
        }

        Ok(stopped)
    }

    /// Cluster instances in the given power state, managers first
    pub async fn list(&self, state: Option<PowerState>) -> Result<Vec<InstanceName>> {
        let mut names = self.provider.list(&self.naming.manager_prefix, state.clone()).await?;
        names.extend(self.provider.list(&self.naming.worker_prefix, state).await?);
        Ok(self.naming.parse_all(&names))
    }
}
