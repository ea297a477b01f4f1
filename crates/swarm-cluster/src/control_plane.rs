//! Swarm control-plane client
//!
//! Every operation is a `docker` command executed on a named instance through
//! the instance provider. Node-level operations (listing, tokens, demote,
//! drain, removal) run on a manager, normally the bootstrap leader; join and
//! leave run on the instance changing membership.

use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use swarm_machine::InstanceProvider;
use tracing::{debug, info};

use crate::error::{ClusterError, Result};
use crate::node::{parse_node_listing, Availability, LocalNodeState, NodeRecord, Role};
use crate::services::{parse_service_listing, ServiceRecord, ServiceSpec};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Node records as seen by the manager `on`
    async fn node_ls(&self, on: &str) -> Result<Vec<NodeRecord>>;

    /// Swarm state of the engine running on `on`
    async fn local_state(&self, on: &str) -> Result<LocalNodeState>;

    async fn join_token(&self, on: &str, role: Role) -> Result<String>;

    async fn init(&self, on: &str, advertise: IpAddr, listen: SocketAddr) -> Result<()>;

    async fn join(
        &self,
        on: &str,
        manager: SocketAddr,
        advertise: IpAddr,
        listen: SocketAddr,
        token: &str,
    ) -> Result<()>;

    async fn leave(&self, on: &str, force: bool) -> Result<()>;

    async fn update_availability(&self, on: &str, node_id: &str, availability: Availability) -> Result<()>;

    async fn promote(&self, on: &str, node_id: &str) -> Result<()>;

    async fn demote(&self, on: &str, node_id: &str) -> Result<()>;

    async fn node_rm(&self, on: &str, node_id: &str) -> Result<()>;

    async fn service_ls(&self, on: &str) -> Result<Vec<ServiceRecord>>;

    async fn service_create(&self, on: &str, spec: &ServiceSpec) -> Result<()>;

    async fn service_scale(&self, on: &str, name: &str, replicas: u32) -> Result<()>;

    async fn service_rm(&self, on: &str, name: &str) -> Result<()>;

    async fn service_logs(&self, on: &str, name: &str, tail: u32) -> Result<String>;
}

/// Single-quote a value for the remote shell
pub(crate) fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Command lines sent to the remote engine
pub(crate) mod commands {
    use super::quote;
    use crate::node::{Availability, Role};
    use crate::services::ServiceSpec;
    use std::net::{IpAddr, SocketAddr};

    pub const NODE_LS: &str = "docker node ls --format '{{json .}}'";
    pub const LOCAL_STATE: &str = "docker info --format '{{.Swarm.LocalNodeState}}'";
    pub const SERVICE_LS: &str = "docker service ls --format '{{json .}}'";

    pub fn join_token(role: Role) -> String {
        format!("docker swarm join-token -q {}", role)
    }

    pub fn init(advertise: IpAddr, listen: SocketAddr) -> String {
        format!(
            "docker swarm init --advertise-addr {} --listen-addr {}",
            advertise, listen
        )
    }

    pub fn join(manager: SocketAddr, advertise: IpAddr, listen: SocketAddr, token: &str) -> String {
        format!(
            "docker swarm join --token {} --advertise-addr {} --listen-addr {} {}",
            quote(token),
            advertise,
            listen,
            manager
        )
    }

    pub fn leave(force: bool) -> String {
        if force {
            "docker swarm leave --force".to_string()
        } else {
            "docker swarm leave".to_string()
        }
    }

    pub fn update_availability(node_id: &str, availability: Availability) -> String {
        format!(
            "docker node update --availability {} {}",
            availability.as_arg(),
            quote(node_id)
        )
    }

    pub fn promote(node_id: &str) -> String {
        format!("docker node promote {}", quote(node_id))
    }

    pub fn demote(node_id: &str) -> String {
        format!("docker node demote {}", quote(node_id))
    }

    pub fn node_rm(node_id: &str) -> String {
        format!("docker node rm --force {}", quote(node_id))
    }

    pub fn service_create(spec: &ServiceSpec) -> String {
        let mut command = format!(
            "docker service create --detach --name {} --replicas {}",
            quote(&spec.name),
            spec.replicas
        );
        for publish in &spec.publish {
            command.push_str(&format!(" --publish {}", quote(publish)));
        }
        for constraint in &spec.constraints {
            command.push_str(&format!(" --constraint {}", quote(constraint)));
        }
        for mount in &spec.mounts {
            command.push_str(&format!(" --mount {}", quote(mount)));
        }
        command.push_str(&format!(" {}", quote(&spec.image)));
        command
    }

    pub fn service_scale(name: &str, replicas: u32) -> String {
        format!("docker service scale --detach {}={}", quote(name), replicas)
    }

    pub fn service_rm(name: &str) -> String {
        format!("docker service rm {}", quote(name))
    }

    pub fn service_logs(name: &str, tail: u32) -> String {
        format!("docker service logs --no-trunc --tail {} {} 2>&1", tail, quote(name))
    }
}

/// Control plane reached through the provider's remote execution
pub struct SwarmControlPlane {
    provider: Arc<dyn InstanceProvider>,
}

impl SwarmControlPlane {
    pub fn new(provider: Arc<dyn InstanceProvider>) -> Self {
        Self { provider }
    }

    async fn run(&self, on: &str, command: &str) -> Result<String> {
        self.provider.exec(on, command).await.map_err(|e| match e {
            swarm_machine::MachineError::CommandFailed { stderr, .. } => {
                ClusterError::control_plane(format!("{} on {}: {}", command, on, stderr))
            }
            other => other.into(),
        })
    }
}

#[async_trait]
impl ControlPlane for SwarmControlPlane {
    async fn node_ls(&self, on: &str) -> Result<Vec<NodeRecord>> {
        let output = self.run(on, commands::NODE_LS).await?;
        parse_node_listing(&output)
    }

    async fn local_state(&self, on: &str) -> Result<LocalNodeState> {
        let output = self.run(on, commands::LOCAL_STATE).await?;
        Ok(LocalNodeState::from(output.as_str()))
    }

    async fn join_token(&self, on: &str, role: Role) -> Result<String> {
        let token = self.run(on, &commands::join_token(role)).await?;
        let token = token.trim();
        if token.is_empty() {
            return Err(ClusterError::control_plane(format!(
                "{} returned an empty {} token",
                on, role
            )));
        }
        Ok(token.to_string())
    }

    async fn init(&self, on: &str, advertise: IpAddr, listen: SocketAddr) -> Result<()> {
        info!("Initializing swarm on {} ({})", on, advertise);
        self.run(on, &commands::init(advertise, listen)).await?;
        Ok(())
    }

    async fn join(
        &self,
        on: &str,
        manager: SocketAddr,
        advertise: IpAddr,
        listen: SocketAddr,
        token: &str,
    ) -> Result<()> {
        info!("Joining {} to swarm at {}", on, manager);
        self.run(on, &commands::join(manager, advertise, listen, token))
            .await?;
        Ok(())
    }

    async fn leave(&self, on: &str, force: bool) -> Result<()> {
        debug!("{} leaving swarm (force: {})", on, force);
        self.run(on, &commands::leave(force)).await?;
        Ok(())
    }

    async fn update_availability(&self, on: &str, node_id: &str, availability: Availability) -> Result<()> {
        self.run(on, &commands::update_availability(node_id, availability))
            .await?;
        Ok(())
    }

    async fn promote(&self, on: &str, node_id: &str) -> Result<()> {
        self.run(on, &commands::promote(node_id)).await?;
        Ok(())
    }

    async fn demote(&self, on: &str, node_id: &str) -> Result<()> {
        self.run(on, &commands::demote(node_id)).await?;
        Ok(())
    }

    async fn node_rm(&self, on: &str, node_id: &str) -> Result<()> {
        self.run(on, &commands::node_rm(node_id)).await?;
        Ok(())
    }

    async fn service_ls(&self, on: &str) -> Result<Vec<ServiceRecord>> {
        let output = self.run(on, commands::SERVICE_LS).await?;
        parse_service_listing(&output)
    }

    async fn service_create(&self, on: &str, spec: &ServiceSpec) -> Result<()> {
        info!("Creating service {} ({}) on {}", spec.name, spec.image, on);
        self.run(on, &commands::service_create(spec)).await?;
        Ok(())
    }

    async fn service_scale(&self, on: &str, name: &str, replicas: u32) -> Result<()> {
        info!("Scaling service {} to {} replicas", name, replicas);
        self.run(on, &commands::service_scale(name, replicas)).await?;
        Ok(())
    }

    async fn service_rm(&self, on: &str, name: &str) -> Result<()> {
        info!("Removing service {}", name);
        self.run(on, &commands::service_rm(name)).await?;
        Ok(())
    }

    async fn service_logs(&self, on: &str, name: &str, tail: u32) -> Result<String> {
        self.run(on, &commands::service_logs(name, tail)).await
    }
}
