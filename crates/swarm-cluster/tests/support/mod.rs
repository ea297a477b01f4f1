//! In-memory machines and swarm for exercising the reconciler without
//! a hypervisor

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Mutex;
use swarm_cluster::{
    Availability, ClusterError, ControlPlane, LocalNodeState, NodeRecord, Reachability, Role,
    ServiceRecord, ServiceSpec,
};
use swarm_machine::{InstanceProvider, MachineError, PowerState};

#[derive(Debug, Clone)]
pub struct FakeMachine {
    pub power: PowerState,
    pub address: IpAddr,
    pub swarm: LocalNodeState,
}

#[derive(Debug, Default)]
pub struct CloudState {
    pub machines: BTreeMap<String, FakeMachine>,
    pub records: Vec<NodeRecord>,
    pub services: Vec<ServiceRecord>,
    /// Ordered log of operations, e.g. "demote m1"
    pub events: Vec<String>,
    /// Operations that fail, keyed like the events they would log
    pub failures: HashMap<String, String>,
    /// Machines that never finish booting
    pub never_boot: HashSet<String>,
    next_id: u32,
    next_host: u8,
}

/// Provider and control plane sharing one simulated world
#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut CloudState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn fail(&self, operation: &str, reason: &str) {
        self.with(|s| s.failures.insert(operation.to_string(), reason.to_string()));
    }

    pub fn heal(&self) {
        self.with(|s| s.failures.clear());
    }

    pub fn events(&self) -> Vec<String> {
        self.with(|s| s.events.clone())
    }

    /// Events that changed machines or membership
    pub fn mutations(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| !e.starts_with("token "))
            .collect()
    }

    pub fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("no event {:?} in {:?}", event, self.events()))
    }

    pub fn machine_names(&self) -> Vec<String> {
        self.with(|s| s.machines.keys().cloned().collect())
    }

    pub fn power(&self, name: &str) -> PowerState {
        self.with(|s| {
            s.machines
                .get(name)
                .map(|m| m.power.clone())
                .unwrap_or(PowerState::Absent)
        })
    }

    /// Hostnames with a ready record, sorted
    pub fn ready_members(&self) -> Vec<String> {
        let mut names: Vec<String> = self.with(|s| {
            s.records
                .iter()
                .filter(|r| r.status == Reachability::Ready)
                .map(|r| r.hostname.clone())
                .collect()
        });
        names.sort();
        names
    }

    pub fn managers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.with(|s| {
            s.records
                .iter()
                .filter(|r| r.role() == Role::Manager)
                .map(|r| r.hostname.clone())
                .collect()
        });
        names.sort();
        names
    }
}

impl CloudState {
    fn log(&mut self, event: String) -> Result<(), String> {
        if let Some(reason) = self.failures.get(&event) {
            return Err(reason.clone());
        }
        self.events.push(event);
        Ok(())
    }

    fn running(&self, name: &str) -> Result<&FakeMachine, ClusterError> {
        match self.machines.get(name) {
            Some(m) if m.power == PowerState::Running => Ok(m),
            _ => Err(ClusterError::control_plane(format!("cannot connect to {}", name))),
        }
    }

    fn manager(&self, name: &str) -> Result<(), ClusterError> {
        let machine = self.running(name)?;
        let listed = self
            .records
            .iter()
            .any(|r| r.hostname == name && r.role() == Role::Manager && r.status == Reachability::Ready);
        if machine.swarm == LocalNodeState::Active && listed {
            Ok(())
        } else {
            Err(ClusterError::control_plane(format!("{} is not a swarm manager", name)))
        }
    }

    fn hostname_of(&self, id: &str) -> Result<String, ClusterError> {
        self.records
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.hostname.clone())
            .ok_or_else(|| ClusterError::node_not_found(id))
    }

    fn new_record(&mut self, hostname: &str, manager_status: &str) -> NodeRecord {
        self.next_id += 1;
        NodeRecord {
            id: format!("node{}", self.next_id),
            hostname: hostname.to_string(),
            availability: Availability::Active,
            status: Reachability::Ready,
            manager_status: manager_status.to_string(),
        }
    }
}

fn machine_error(command: String, reason: String) -> MachineError {
    MachineError::command_failed(command, reason)
}

#[async_trait]
impl InstanceProvider for FakeCloud {
    async fn create(&self, name: &str) -> swarm_machine::Result<()> {
        self.with(|s| {
            let event = format!("create {}", name);
            if s.machines.contains_key(name) {
                return Err(machine_error(event, "already exists".to_string()));
            }
            s.log(event.clone()).map_err(|r| machine_error(event, r))?;
            s.next_host += 1;
            let address = IpAddr::V4(Ipv4Addr::new(192, 168, 99, 100 + s.next_host));
            s.machines.insert(
                name.to_string(),
                FakeMachine {
                    power: PowerState::Running,
                    address,
                    swarm: LocalNodeState::Inactive,
                },
            );
            Ok(())
        })
    }

    async fn destroy(&self, names: &[String]) -> swarm_machine::Result<()> {
        self.with(|s| {
            let event = format!("destroy {}", names.join(" "));
            s.log(event.clone()).map_err(|r| machine_error(event, r))?;
            for name in names {
                s.machines.remove(name);
            }
            Ok(())
        })
    }

    async fn start(&self, name: &str) -> swarm_machine::Result<()> {
        self.with(|s| {
            let event = format!("start {}", name);
            s.log(event.clone()).map_err(|r| machine_error(event, r))?;
            let stuck = s.never_boot.contains(name);
            let machine = s
                .machines
                .get_mut(name)
                .ok_or_else(|| MachineError::machine_not_found(name))?;
            machine.power = if stuck {
                PowerState::Transitional("starting".to_string())
            } else {
                PowerState::Running
            };
            Ok(())
        })
    }

    async fn stop(&self, name: &str) -> swarm_machine::Result<()> {
        self.with(|s| {
            let event = format!("stop {}", name);
            s.log(event.clone()).map_err(|r| machine_error(event, r))?;
            let machine = s
                .machines
                .get_mut(name)
                .ok_or_else(|| MachineError::machine_not_found(name))?;
            machine.power = PowerState::Stopped;
            for record in s.records.iter_mut().filter(|r| r.hostname == name) {
                record.status = Reachability::Down;
            }
            Ok(())
        })
    }

    async fn list(&self, prefix: &str, state: Option<PowerState>) -> swarm_machine::Result<Vec<String>> {
        Ok(self.with(|s| {
            s.machines
                .iter()
                .filter(|(name, m)| {
                    name.starts_with(prefix) && state.as_ref().map_or(true, |wanted| &m.power == wanted)
                })
                .map(|(name, _)| name.clone())
                .collect()
        }))
    }

    async fn state(&self, name: &str) -> swarm_machine::Result<PowerState> {
        Ok(self.power(name))
    }

    async fn address(&self, name: &str) -> swarm_machine::Result<IpAddr> {
        self.with(|s| {
            s.machines
                .get(name)
                .map(|m| m.address)
                .ok_or_else(|| MachineError::machine_not_found(name))
        })
    }

    async fn regenerate_credentials(&self, name: &str) -> swarm_machine::Result<()> {
        self.with(|s| {
            let event = format!("regenerate {}", name);
            s.log(event.clone()).map_err(|r| machine_error(event, r))
        })
    }

    async fn exec(&self, name: &str, command: &str) -> swarm_machine::Result<String> {
        Err(machine_error(
            format!("ssh {} {}", name, command),
            "exec is not simulated".to_string(),
        ))
    }
}

#[async_trait]
impl ControlPlane for FakeCloud {
    async fn node_ls(&self, on: &str) -> swarm_cluster::Result<Vec<NodeRecord>> {
        self.with(|s| {
            s.manager(on)?;
            Ok(s.records.clone())
        })
    }

    async fn local_state(&self, on: &str) -> swarm_cluster::Result<LocalNodeState> {
        self.with(|s| Ok(s.running(on)?.swarm.clone()))
    }

    async fn join_token(&self, on: &str, role: Role) -> swarm_cluster::Result<String> {
        self.with(|s| {
            s.manager(on)?;
            s.log(format!("token {}", role)).map_err(ClusterError::control_plane)?;
            Ok(format!("SWMTKN-{}", role))
        })
    }

    async fn init(&self, on: &str, _advertise: IpAddr, _listen: SocketAddr) -> swarm_cluster::Result<()> {
        self.with(|s| {
            if s.running(on)?.swarm == LocalNodeState::Active {
                return Err(ClusterError::control_plane("already part of a swarm"));
            }
            s.log(format!("init {}", on)).map_err(ClusterError::control_plane)?;
            let leader = s.new_record(on, "Leader");
            s.records = vec![leader];
            if let Some(machine) = s.machines.get_mut(on) {
                machine.swarm = LocalNodeState::Active;
            }
            Ok(())
        })
    }

    async fn join(
        &self,
        on: &str,
        _manager: SocketAddr,
        _advertise: IpAddr,
        _listen: SocketAddr,
        token: &str,
    ) -> swarm_cluster::Result<()> {
        self.with(|s| {
            if s.running(on)?.swarm == LocalNodeState::Active {
                return Err(ClusterError::control_plane("already part of a swarm"));
            }
            s.log(format!("join {}", on)).map_err(ClusterError::control_plane)?;
            let manager_status = if token.ends_with("manager") { "Reachable" } else { "" };
            let record = s.new_record(on, manager_status);
            s.records.push(record);
            if let Some(machine) = s.machines.get_mut(on) {
                machine.swarm = LocalNodeState::Active;
            }
            Ok(())
        })
    }

    async fn leave(&self, on: &str, _force: bool) -> swarm_cluster::Result<()> {
        self.with(|s| {
            if s.running(on)?.swarm == LocalNodeState::Inactive {
                return Err(ClusterError::control_plane("not part of a swarm"));
            }
            s.log(format!("leave {}", on)).map_err(ClusterError::control_plane)?;
            let was_leader = s
                .records
                .iter()
                .any(|r| r.hostname == on && r.manager_status == "Leader");
            if was_leader {
                s.records.clear();
            } else {
                for record in s.records.iter_mut().filter(|r| r.hostname == on) {
                    record.status = Reachability::Down;
                }
            }
            if let Some(machine) = s.machines.get_mut(on) {
                machine.swarm = LocalNodeState::Inactive;
            }
            Ok(())
        })
    }

    async fn update_availability(
        &self,
        on: &str,
        node_id: &str,
        availability: Availability,
    ) -> swarm_cluster::Result<()> {
        self.with(|s| {
            s.manager(on)?;
            let hostname = s.hostname_of(node_id)?;
            s.log(format!("{} {}", availability, hostname))
                .map_err(ClusterError::control_plane)?;
            for record in s.records.iter_mut().filter(|r| r.id == node_id) {
                record.availability = availability;
            }
            Ok(())
        })
    }

    async fn promote(&self, on: &str, node_id: &str) -> swarm_cluster::Result<()> {
        self.with(|s| {
            s.manager(on)?;
            let hostname = s.hostname_of(node_id)?;
            s.log(format!("promote {}", hostname)).map_err(ClusterError::control_plane)?;
            for record in s.records.iter_mut().filter(|r| r.id == node_id) {
                record.manager_status = "Reachable".to_string();
            }
            Ok(())
        })
    }

    async fn demote(&self, on: &str, node_id: &str) -> swarm_cluster::Result<()> {
        self.with(|s| {
            s.manager(on)?;
            let hostname = s.hostname_of(node_id)?;
            s.log(format!("demote {}", hostname)).map_err(ClusterError::control_plane)?;
            for record in s.records.iter_mut().filter(|r| r.id == node_id) {
                record.manager_status.clear();
            }
            Ok(())
        })
    }

    async fn node_rm(&self, on: &str, node_id: &str) -> swarm_cluster::Result<()> {
        self.with(|s| {
            s.manager(on)?;
            let hostname = s.hostname_of(node_id)?;
            let up = s
                .records
                .iter()
                .any(|r| r.id == node_id && r.status != Reachability::Down);
            if up {
                return Err(ClusterError::control_plane(format!("{} is not down", hostname)));
            }
            s.log(format!("rm {}", hostname)).map_err(ClusterError::control_plane)?;
            s.records.retain(|r| r.id != node_id);
            Ok(())
        })
    }

    async fn service_ls(&self, on: &str) -> swarm_cluster::Result<Vec<ServiceRecord>> {
        self.with(|s| {
            s.manager(on)?;
            Ok(s.services.clone())
        })
    }

    async fn service_create(&self, on: &str, spec: &ServiceSpec) -> swarm_cluster::Result<()> {
        self.with(|s| {
            s.manager(on)?;
            s.log(format!("service create {}", spec.name))
                .map_err(ClusterError::control_plane)?;
            let id = format!("svc{}", s.services.len());
            s.services.push(ServiceRecord {
                id,
                name: spec.name.clone(),
                mode: "replicated".to_string(),
                replicas: format!("{}/{}", spec.replicas, spec.replicas),
                image: spec.image.clone(),
                ports: spec.publish.join(","),
            });
            Ok(())
        })
    }

    async fn service_scale(&self, on: &str, name: &str, replicas: u32) -> swarm_cluster::Result<()> {
        self.with(|s| {
            s.manager(on)?;
            s.log(format!("service scale {}={}", name, replicas))
                .map_err(ClusterError::control_plane)?;
            for service in s.services.iter_mut().filter(|svc| svc.name == name) {
                service.replicas = format!("{}/{}", replicas, replicas);
            }
            Ok(())
        })
    }

    async fn service_rm(&self, on: &str, name: &str) -> swarm_cluster::Result<()> {
        self.with(|s| {
            s.manager(on)?;
            s.log(format!("service rm {}", name)).map_err(ClusterError::control_plane)?;
            s.services.retain(|svc| svc.name != name);
            Ok(())
        })
    }

    async fn service_logs(&self, on: &str, name: &str, tail: u32) -> swarm_cluster::Result<String> {
        self.with(|s| {
            s.manager(on)?;
            Ok((0..tail.min(2))
                .map(|i| format!("{}.1@w0 | line {}", name, i))
                .collect::<Vec<_>>()
                .join("\n"))
        })
    }
}
