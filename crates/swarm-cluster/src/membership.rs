//! Per-instance swarm membership
//!
//! An instance moves `NotMember -> Joining -> Member(Active) ->
//! Member(Draining) -> Leaving -> NotMember`. Every transition is driven
//! through the control plane and checked against what it reports, so each
//! operation here can be repeated safely.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use swarm_machine::{InstanceProvider, PowerState};
use tracing::{debug, info, warn};

use crate::config::{PollPolicy, SwarmConfig};
use crate::control_plane::ControlPlane;
use crate::error::{ClusterError, Result};
use crate::node::{records_for, Availability, JoinTokens, LocalNodeState, NodeRecord, Reachability, Role};
use crate::readiness::wait_for_ok;
use crate::topology::{InstanceName, Naming};

/// Membership of one instance as observed from the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    NotMember,
    Joining,
    Member(Activity),
    Leaving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active,
    Draining,
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotMember => write!(f, "not-member"),
            Self::Joining => write!(f, "joining"),
            Self::Member(Activity::Active) => write!(f, "member(active)"),
            Self::Member(Activity::Draining) => write!(f, "member(draining)"),
            Self::Leaving => write!(f, "leaving"),
        }
    }
}

fn transition(instance: &str, from: MemberState, to: MemberState) {
    debug!("{}: {} -> {}", instance, from, to);
}

/// Drives join and leave of individual instances against the bootstrap leader
#[derive(Clone)]
pub struct Membership {
    provider: Arc<dyn InstanceProvider>,
    control: Arc<dyn ControlPlane>,
    naming: Naming,
    swarm_port: u16,
    settle: Duration,
    poll: PollPolicy,
}

impl Membership {
    pub fn new(
        provider: Arc<dyn InstanceProvider>,
        control: Arc<dyn ControlPlane>,
        config: &SwarmConfig,
    ) -> Self {
        Self {
            provider,
            control,
            naming: Naming::from(config),
            swarm_port: config.swarm_port,
            settle: config.drain_settle(),
            poll: config.poll_policy(),
        }
    }

    fn leader(&self) -> InstanceName {
        self.naming.leader()
    }

    /// Local engine state of `instance` and the ready records the leader
    /// holds for it. Records are only fetched for a locally active engine.
    async fn inspect(&self, instance: &InstanceName) -> Result<(LocalNodeState, Vec<NodeRecord>)> {
        let local = self.control.local_state(&instance.name).await?;
        if local != LocalNodeState::Active || instance.is_leader() {
            return Ok((local, Vec::new()));
        }

        let records = self.control.node_ls(&self.leader().name).await?;
        let ready = records_for(&records, &instance.name)
            .into_iter()
            .filter(|r| r.status == Reachability::Ready)
            .cloned()
            .collect();
        Ok((local, ready))
    }

    fn member_state(instance: &InstanceName, local: &LocalNodeState, ready: &[NodeRecord]) -> MemberState {
        match local {
            LocalNodeState::Pending => MemberState::Joining,
            LocalNodeState::Active if instance.is_leader() => MemberState::Member(Activity::Active),
            LocalNodeState::Active if ready.is_empty() => MemberState::NotMember,
            LocalNodeState::Active if ready.iter().any(|r| r.availability == Availability::Drain) => {
                MemberState::Member(Activity::Draining)
            }
            LocalNodeState::Active => MemberState::Member(Activity::Active),
            _ => MemberState::NotMember,
        }
    }

    /// Current state of `instance`, combining its local engine state with
    /// the leader's view of its records
    pub async fn observe(&self, instance: &InstanceName) -> Result<MemberState> {
        let (local, ready) = self.inspect(instance).await?;
        Ok(Self::member_state(instance, &local, &ready))
    }

    /// Address the leader listens on for joins; resolved on every call
    /// since addresses change across restarts
    pub async fn leader_endpoint(&self) -> Result<SocketAddr> {
        let address = self.provider.address(&self.leader().name).await?;
        Ok(SocketAddr::new(address, self.swarm_port))
    }

    /// Initialize the swarm on the leader unless it already runs one.
    ///
    /// Returns whether an init was issued.
    pub async fn init_leader(&self) -> Result<bool> {
        let leader = self.leader().name;

        let local = self.control.local_state(&leader).await?;
        if local == LocalNodeState::Active {
            match self.control.node_ls(&leader).await {
                Ok(records) if !records.is_empty() => {
                    debug!("Swarm already initialized on {}", leader);
                    return Ok(false);
                }
                Ok(_) => {}
                Err(e) => debug!("Leader {} is active but cannot list nodes: {}", leader, e),
            }
        }

        // Clear stale state, e.g. a worker membership in a foreign swarm
        if local.holds_membership() {
            if let Err(e) = self.control.leave(&leader, true).await {
                debug!("Ignoring leave failure on {}: {}", leader, e);
            }
        }

        let address = self.provider.address(&leader).await?;
        info!("Initializing swarm on {} ({})", leader, address);
        self.control
            .init(&leader, address, SocketAddr::new(address, self.swarm_port))
            .await?;
        transition(&leader, MemberState::NotMember, MemberState::Member(Activity::Active));
        Ok(true)
    }

    pub async fn join_tokens(&self) -> Result<JoinTokens> {
        let leader = self.leader().name;
        Ok(JoinTokens {
            manager: self.control.join_token(&leader, Role::Manager).await?,
            worker: self.control.join_token(&leader, Role::Worker).await?,
        })
    }

    /// Make `instance` an active member in the role its name encodes.
    ///
    /// A ready member is only brought back to active availability and to its
    /// role, e.g. after a removal that drained and demoted it but failed to
    /// leave. Anything else discards its partial membership and joins.
    /// Returns whether anything changed.
    pub async fn join(&self, instance: &InstanceName, tokens: &JoinTokens, leader: SocketAddr) -> Result<bool> {
        if instance.is_leader() {
            return self.init_leader().await;
        }

        let (local, ready) = self.inspect(instance).await?;
        let observed = Self::member_state(instance, &local, &ready);
        if let MemberState::Member(_) = observed {
            return self.conform(instance, observed, &ready).await;
        }

        transition(&instance.name, observed, MemberState::Joining);

        // Whatever partial membership exists is discarded before joining
        if let Err(e) = self.control.leave(&instance.name, true).await {
            debug!("Ignoring leave failure on {}: {}", instance, e);
        }

        let address = self.provider.address(&instance.name).await?;
        info!("Joining {} as {} via {}", instance, instance.role, leader);
        self.control
            .join(
                &instance.name,
                leader,
                address,
                SocketAddr::new(address, self.swarm_port),
                tokens.for_role(instance.role),
            )
            .await?;

        let records = self.control.node_ls(&self.leader().name).await?;
        if records_for(&records, &instance.name).is_empty() {
            return Err(ClusterError::node_not_found(&instance.name));
        }

        transition(&instance.name, MemberState::Joining, MemberState::Member(Activity::Active));
        Ok(true)
    }

    /// Reactivate drained records of a ready member and give them the role
    /// its name encodes
    async fn conform(
        &self,
        instance: &InstanceName,
        observed: MemberState,
        ready: &[NodeRecord],
    ) -> Result<bool> {
        let leader = self.leader().name;
        let mut changed = false;

        for record in ready {
            if record.availability != Availability::Active {
                info!("Reactivating {} ({})", instance, record.id);
                self.control
                    .update_availability(&leader, &record.id, Availability::Active)
                    .await?;
                changed = true;
            }

            match (instance.role, record.role()) {
                (Role::Manager, Role::Worker) => {
                    info!("Promoting {} ({})", instance, record.id);
                    self.control.promote(&leader, &record.id).await?;
                    changed = true;
                }
                (Role::Worker, Role::Manager) => {
                    info!("Demoting {} ({})", instance, record.id);
                    self.control.demote(&leader, &record.id).await?;
                    changed = true;
                }
                _ => {}
            }
        }

        if changed {
            transition(&instance.name, observed, MemberState::Member(Activity::Active));
        } else {
            debug!("{} is already a member", instance);
        }
        Ok(changed)
    }

    /// Records the leader holds for `hostname`, or none when the leader has
    /// no swarm to ask
    async fn leader_records(&self, hostname: &str) -> Result<Vec<NodeRecord>> {
        let leader = self.leader().name;
        if self.provider.state(&leader).await? != PowerState::Running {
            return Ok(Vec::new());
        }
        if self.control.local_state(&leader).await? != LocalNodeState::Active {
            return Ok(Vec::new());
        }

        let records = self.control.node_ls(&leader).await?;
        Ok(records_for(&records, hostname).into_iter().cloned().collect())
    }

    /// Take `instance` out of the swarm and remove every record of it.
    ///
    /// A manager is demoted first, then all of its records are drained and
    /// given time to reschedule before it is forced out. The leader has no
    /// manager left to do that bookkeeping and only leaves. Returns whether
    /// anything changed.
    pub async fn leave(&self, instance: &InstanceName) -> Result<bool> {
        let name = instance.name.as_str();

        let running = self.provider.state(name).await? == PowerState::Running;
        let local = if running {
            self.control.local_state(name).await?
        } else {
            LocalNodeState::Inactive
        };

        if instance.is_leader() {
            if !local.holds_membership() {
                debug!("{} holds no swarm, nothing to leave", name);
                return Ok(false);
            }
            transition(name, MemberState::Member(Activity::Active), MemberState::Leaving);
            self.control.leave(name, true).await?;
            transition(name, MemberState::Leaving, MemberState::NotMember);
            return Ok(true);
        }

        let records = self.leader_records(name).await?;
        if !local.holds_membership() && records.is_empty() {
            debug!("{} was never a member, nothing to leave", name);
            return Ok(false);
        }

        let leader = self.leader().name;

        if instance.role == Role::Manager {
            for record in records.iter().filter(|r| r.role() == Role::Manager) {
                info!("Demoting {} ({})", name, record.id);
                self.control.demote(&leader, &record.id).await?;
            }
        }

        let live: Vec<&NodeRecord> = records.iter().filter(|r| !r.is_down()).collect();
        for record in &live {
            self.control
                .update_availability(&leader, &record.id, Availability::Drain)
                .await?;
        }
        if !live.is_empty() {
            transition(name, MemberState::Member(Activity::Active), MemberState::Member(Activity::Draining));
            debug!("Letting tasks on {} reschedule for {:?}", name, self.settle);
            tokio::time::sleep(self.settle).await;
        }

        transition(name, MemberState::Member(Activity::Draining), MemberState::Leaving);
        if local.holds_membership() {
            self.control.leave(name, true).await?;
        }

        if !records.is_empty() {
            let control = self.control.clone();
            let what = format!("{} to be reported down", name);
            wait_for_ok(self.poll, &what, || {
                let control = control.clone();
                let leader = leader.clone();
                let name = name.to_string();
                async move {
                    let records = control.node_ls(&leader).await?;
                    Ok(records_for(&records, &name).iter().all(|r| r.is_down()))
                }
            })
            .await?;

            // Stale records of earlier incarnations are removed along with the current one
            let remaining = self.control.node_ls(&leader).await?;
            for record in records_for(&remaining, name) {
                self.control.node_rm(&leader, &record.id).await?;
            }
        }

        if !running {
            warn!("{} was not running; removed its records without a local leave", name);
        }

        transition(name, MemberState::Leaving, MemberState::NotMember);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::MockControlPlane;
    use crate::testing::{quick_config, record, MockProvider};
    use mockall::predicate::eq;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn naming() -> Naming {
        Naming::new("m", "w")
    }

    fn tokens() -> JoinTokens {
        JoinTokens {
            manager: "SWMTKN-manager".to_string(),
            worker: "SWMTKN-worker".to_string(),
        }
    }

    fn leader_endpoint() -> SocketAddr {
        "192.168.99.100:2377".parse().unwrap()
    }

    fn membership(provider: MockProvider, control: MockControlPlane) -> Membership {
        Membership::new(Arc::new(provider), Arc::new(control), &quick_config())
    }

    #[tokio::test]
    async fn test_join_is_noop_for_ready_member() {
        let mut provider = MockProvider::new();
        provider.expect_address().times(0);

        let mut control = MockControlPlane::new();
        control
            .expect_local_state()
            .with(eq("w0"))
            .returning(|_| Ok(LocalNodeState::Active));
        control
            .expect_node_ls()
            .with(eq("m0"))
            .returning(|_| Ok(vec![record("id-w0", "w0", Reachability::Ready, "")]));
        control.expect_leave().times(0);
        control.expect_join().times(0);

        let joined = membership(provider, control)
            .join(&naming().parse("w0").unwrap(), &tokens(), leader_endpoint())
            .await
            .unwrap();
        assert!(!joined);
    }

    #[tokio::test]
    async fn test_join_clears_stale_state_first() {
        let address = IpAddr::V4(Ipv4Addr::new(192, 168, 99, 101));

        let mut provider = MockProvider::new();
        provider
            .expect_address()
            .with(eq("m1"))
            .returning(move |_| Ok(address));

        let mut control = MockControlPlane::new();
        // Active locally but unknown to the leader: left over from another swarm
        let listings = Arc::new(AtomicU32::new(0));
        control
            .expect_local_state()
            .returning(|_| Ok(LocalNodeState::Active));
        control.expect_node_ls().with(eq("m0")).returning(move |_| {
            if listings.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Vec::new())
            } else {
                Ok(vec![record("id-m1", "m1", Reachability::Ready, "Reachable")])
            }
        });
        control
            .expect_leave()
            .with(eq("m1"), eq(true))
            .times(1)
            .returning(|_, _| Err(crate::error::ClusterError::control_plane("not part of a swarm")));
        control
            .expect_join()
            .withf(move |on, manager, advertise, listen, token| {
                on == "m1"
                    && *manager == leader_endpoint()
                    && *advertise == address
                    && *listen == SocketAddr::new(address, 2377)
                    && token == "SWMTKN-manager"
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let joined = membership(provider, control)
            .join(&naming().parse("m1").unwrap(), &tokens(), leader_endpoint())
            .await
            .unwrap();
        assert!(joined);
    }

    #[tokio::test]
    async fn test_join_not_listed_afterwards_is_an_error() {
        let mut provider = MockProvider::new();
        provider
            .expect_address()
            .returning(|_| Ok(IpAddr::V4(Ipv4Addr::new(192, 168, 99, 102))));

        let mut control = MockControlPlane::new();
        control
            .expect_local_state()
            .returning(|_| Ok(LocalNodeState::Inactive));
        control
            .expect_node_ls()
            .returning(|_| Ok(vec![record("id-m0", "m0", Reachability::Ready, "Leader")]));
        control.expect_leave().returning(|_, _| Ok(()));
        control.expect_join().times(1).returning(|_, _, _, _, _| Ok(()));

        let result = membership(provider, control)
            .join(&naming().parse("w3").unwrap(), &tokens(), leader_endpoint())
            .await;
        assert!(matches!(result, Err(crate::error::ClusterError::NodeNotFound(name)) if name == "w3"));
    }

    #[tokio::test]
    async fn test_join_reactivates_and_promotes_drained_manager() {
        let mut provider = MockProvider::new();
        provider.expect_address().times(0);

        let mut control = MockControlPlane::new();
        control
            .expect_local_state()
            .returning(|_| Ok(LocalNodeState::Active));
        // Demoted and drained by a removal whose leave never happened
        control.expect_node_ls().with(eq("m0")).returning(|_| {
            let mut drained = record("id-m1", "m1", Reachability::Ready, "");
            drained.availability = Availability::Drain;
            Ok(vec![
                record("id-m0", "m0", Reachability::Ready, "Leader"),
                drained,
                record("old-m1", "m1", Reachability::Down, ""),
            ])
        });
        control
            .expect_update_availability()
            .with(eq("m0"), eq("id-m1"), eq(Availability::Active))
            .times(1)
            .returning(|_, _, _| Ok(()));
        control
            .expect_promote()
            .with(eq("m0"), eq("id-m1"))
            .times(1)
            .returning(|_, _| Ok(()));
        control.expect_leave().times(0);
        control.expect_join().times(0);

        let changed = membership(provider, control)
            .join(&naming().parse("m1").unwrap(), &tokens(), leader_endpoint())
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn test_join_demotes_worker_listed_as_manager() {
        let provider = MockProvider::new();
        let mut control = MockControlPlane::new();
        control
            .expect_local_state()
            .returning(|_| Ok(LocalNodeState::Active));
        control
            .expect_node_ls()
            .returning(|_| Ok(vec![record("id-w0", "w0", Reachability::Ready, "Reachable")]));
        control
            .expect_demote()
            .with(eq("m0"), eq("id-w0"))
            .times(1)
            .returning(|_, _| Ok(()));
        control.expect_update_availability().times(0);
        control.expect_join().times(0);

        let changed = membership(provider, control)
            .join(&naming().parse("w0").unwrap(), &tokens(), leader_endpoint())
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn test_leave_is_noop_for_non_member() {
        let mut provider = MockProvider::new();
        provider.expect_state().returning(|_| Ok(PowerState::Running));

        let mut control = MockControlPlane::new();
        control
            .expect_local_state()
            .with(eq("w2"))
            .returning(|_| Ok(LocalNodeState::Inactive));
        control
            .expect_local_state()
            .with(eq("m0"))
            .returning(|_| Ok(LocalNodeState::Active));
        control
            .expect_node_ls()
            .returning(|_| Ok(vec![record("id-m0", "m0", Reachability::Ready, "Leader")]));
        control.expect_demote().times(0);
        control.expect_update_availability().times(0);
        control.expect_leave().times(0);
        control.expect_node_rm().times(0);

        let changed = membership(provider, control)
            .leave(&naming().parse("w2").unwrap())
            .await
            .unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn test_leader_only_leaves() {
        let mut provider = MockProvider::new();
        provider.expect_state().returning(|_| Ok(PowerState::Running));

        let mut control = MockControlPlane::new();
        control
            .expect_local_state()
            .returning(|_| Ok(LocalNodeState::Active));
        control
            .expect_leave()
            .with(eq("m0"), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));
        control.expect_node_ls().times(0);
        control.expect_demote().times(0);
        control.expect_node_rm().times(0);

        let changed = membership(provider, control)
            .leave(&naming().leader())
            .await
            .unwrap();
        assert!(changed);
    }

    #[tokio::test]
    async fn test_manager_leave_removes_every_record() {
        let mut provider = MockProvider::new();
        provider.expect_state().returning(|_| Ok(PowerState::Running));

        let listings = Arc::new(AtomicU32::new(0));
        let counter = listings.clone();

        let mut control = MockControlPlane::new();
        control
            .expect_local_state()
            .returning(|_| Ok(LocalNodeState::Active));
        control.expect_node_ls().with(eq("m0")).returning(move |_| {
            // First listing before the leave, every later one after it
            let status = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Reachability::Ready
            } else {
                Reachability::Down
            };
            Ok(vec![
                record("id-m0", "m0", Reachability::Ready, "Leader"),
                record("id-m1", "m1", status, "Reachable"),
                record("old-m1", "m1", Reachability::Down, ""),
            ])
        });
        control
            .expect_demote()
            .with(eq("m0"), eq("id-m1"))
            .times(1)
            .returning(|_, _| Ok(()));
        control
            .expect_update_availability()
            .with(eq("m0"), eq("id-m1"), eq(Availability::Drain))
            .times(1)
            .returning(|_, _, _| Ok(()));
        control
            .expect_leave()
            .with(eq("m1"), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));
        control
            .expect_node_rm()
            .withf(|on, id| on == "m0" && (id == "id-m1" || id == "old-m1"))
            .times(2)
            .returning(|_, _| Ok(()));

        let changed = membership(provider, control)
            .leave(&naming().parse("m1").unwrap())
            .await
            .unwrap();
        assert!(changed);
        assert!(listings.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_init_skipped_when_swarm_exists() {
        let mut provider = MockProvider::new();
        provider.expect_address().times(0);

        let mut control = MockControlPlane::new();
        control
            .expect_local_state()
            .returning(|_| Ok(LocalNodeState::Active));
        control
            .expect_node_ls()
            .returning(|_| Ok(vec![record("id-m0", "m0", Reachability::Ready, "Leader")]));
        control.expect_init().times(0);

        assert!(!membership(provider, control).init_leader().await.unwrap());
    }

    #[tokio::test]
    async fn test_observe_reports_draining() {
        let provider = MockProvider::new();
        let mut control = MockControlPlane::new();
        control
            .expect_local_state()
            .returning(|_| Ok(LocalNodeState::Active));
        control.expect_node_ls().returning(|_| {
            let mut drained = record("id-w1", "w1", Reachability::Ready, "");
            drained.availability = Availability::Drain;
            Ok(vec![drained])
        });

        let state = membership(provider, control)
            .observe(&naming().parse("w1").unwrap())
            .await
            .unwrap();
        assert_eq!(state, MemberState::Member(Activity::Draining));
    }
}
