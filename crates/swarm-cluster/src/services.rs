//! Operations on an already converged cluster: visualizer, services,
//! health and logs

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use swarm_machine::{InstanceProvider, PowerState};
use tracing::{info, warn};

use crate::config::SwarmConfig;
use crate::control_plane::ControlPlane;
use crate::error::{ClusterError, Result};
use crate::node::{records_for, LocalNodeState, NodeRecord, Role};
use crate::readiness::wait_for_ok;
use crate::topology::Naming;

pub const VISUALIZER_SERVICE: &str = "viz";

/// One line of `docker service ls --format '{{json .}}'`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Mode", default)]
    pub mode: String,
    /// Running over desired, e.g. "2/3"
    #[serde(rename = "Replicas", default)]
    pub replicas: String,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "Ports", default)]
    pub ports: String,
}

pub fn parse_service_listing(output: &str) -> Result<Vec<ServiceRecord>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(ClusterError::from))
        .collect()
}

/// Service to create on the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub replicas: u32,
    /// `published:target` port pairs
    pub publish: Vec<String>,
    pub constraints: Vec<String>,
    pub mounts: Vec<String>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            replicas: 1,
            publish: Vec::new(),
            constraints: Vec::new(),
            mounts: Vec::new(),
        }
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_publish(mut self, publish: impl Into<String>) -> Self {
        self.publish.push(publish.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mounts.push(mount.into());
        self
    }

    /// The swarm visualizer, pinned to managers so it can read the node list
    pub fn visualizer(image: &str, port: u16) -> Self {
        Self::new(VISUALIZER_SERVICE, image)
            .with_publish(format!("{}:8080", port))
            .with_constraint("node.role==manager")
            .with_mount("type=bind,src=/var/run/docker.sock,dst=/var/run/docker.sock")
    }
}

/// Health of one provisioned instance
#[derive(Debug, Clone)]
pub struct InstanceHealth {
    pub name: String,
    pub role: Role,
    pub power: PowerState,
    pub address: Option<IpAddr>,
    /// Every control-plane record carrying this hostname
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub instances: Vec<InstanceHealth>,
    /// Whether the leader answered the node listing
    pub control_plane_available: bool,
}

impl HealthReport {
    /// Running instances without a Ready record
    pub fn unhealthy(&self) -> Vec<&InstanceHealth> {
        self.instances
            .iter()
            .filter(|i| {
                i.power != PowerState::Running
                    || !i.nodes.iter().any(|n| n.status == crate::node::Reachability::Ready)
            })
            .collect()
    }
}

/// Auxiliary operations requiring an active cluster session
pub struct ClusterServices {
    provider: Arc<dyn InstanceProvider>,
    control: Arc<dyn ControlPlane>,
    config: SwarmConfig,
    naming: Naming,
}

impl ClusterServices {
    pub fn new(
        provider: Arc<dyn InstanceProvider>,
        control: Arc<dyn ControlPlane>,
        config: SwarmConfig,
    ) -> Self {
        let naming = Naming::from(&config);
        Self {
            provider,
            control,
            config,
            naming,
        }
    }

    /// Fail fast unless the leader is running and holds an active swarm
    pub async fn ensure_connected(&self) -> Result<String> {
        let leader = self.naming.leader().name;

        let power = self.provider.state(&leader).await?;
        if power != PowerState::Running {
            return Err(ClusterError::not_connected(format!(
                "leader {} is {}; run `swarm start` first",
                leader, power
            )));
        }

        let local = self.control.local_state(&leader).await?;
        if local != LocalNodeState::Active {
            return Err(ClusterError::not_connected(format!(
                "leader {} has no active swarm; run `swarm start` first",
                leader
            )));
        }

        Ok(leader)
    }

    /// Deploy the visualizer if absent and wait until it answers over HTTP
    pub async fn deploy_visualizer(&self) -> Result<String> {
        let leader = self.ensure_connected().await?;

        let existing = self.control.service_ls(&leader).await?;
        if existing.iter().any(|s| s.name == VISUALIZER_SERVICE) {
            info!("Visualizer already deployed");
        } else {
            let spec = ServiceSpec::visualizer(&self.config.visualizer_image, self.config.visualizer_port);
            self.control.service_create(&leader, &spec).await?;
        }

        let address = self.provider.address(&leader).await?;
        let url = format!("http://{}:{}/", address, self.config.visualizer_port);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        wait_for_ok(self.config.poll_policy(), "visualizer to answer", || {
            let client = client.clone();
            let url = url.clone();
            async move {
                let response = client.get(&url).send().await?;
                Ok::<bool, ClusterError>(response.status().is_success())
            }
        })
        .await?;

        Ok(url)
    }

    pub async fn list_services(&self) -> Result<Vec<ServiceRecord>> {
        let leader = self.ensure_connected().await?;
        self.control.service_ls(&leader).await
    }

    pub async fn create_service(&self, spec: &ServiceSpec) -> Result<()> {
        let leader = self.ensure_connected().await?;
        self.control.service_create(&leader, spec).await
    }

    pub async fn scale_service(&self, name: &str, replicas: u32) -> Result<()> {
        let leader = self.ensure_connected().await?;
        self.require_service(&leader, name).await?;
        self.control.service_scale(&leader, name, replicas).await
    }

    pub async fn remove_service(&self, name: &str) -> Result<()> {
        let leader = self.ensure_connected().await?;
        self.require_service(&leader, name).await?;
        self.control.service_rm(&leader, name).await
    }

    pub async fn service_logs(&self, name: &str, tail: u32) -> Result<String> {
        let leader = self.ensure_connected().await?;
        self.require_service(&leader, name).await?;
        self.control.service_logs(&leader, name, tail).await
    }

    async fn require_service(&self, leader: &str, name: &str) -> Result<()> {
        let services = self.control.service_ls(leader).await?;
        if services.iter().any(|s| s.name == name) {
            Ok(())
        } else {
            Err(ClusterError::control_plane(format!("no service named {}", name)))
        }
    }

    /// Power state, address and membership of every cluster instance.
    ///
    /// Works without an active session; membership columns are then empty.
    pub async fn health(&self) -> Result<HealthReport> {
        let mut listed = self.provider.list(&self.naming.manager_prefix, None).await?;
        listed.extend(self.provider.list(&self.naming.worker_prefix, None).await?);
        let instances = self.naming.parse_all(&listed);

        let leader = self.naming.leader().name;
        let records = match self.control.node_ls(&leader).await {
            Ok(records) => Some(records),
            Err(e) => {
                warn!("Control plane unavailable on {}: {}", leader, e);
                None
            }
        };

        let mut report = Vec::with_capacity(instances.len());
        for instance in instances {
            let power = self.provider.state(&instance.name).await?;
            let address = if power == PowerState::Running {
                self.provider.address(&instance.name).await.ok()
            } else {
                None
            };
            let nodes = records
                .as_deref()
                .map(|all| records_for(all, &instance.name).into_iter().cloned().collect())
                .unwrap_or_default();

            report.push(InstanceHealth {
                name: instance.name,
                role: instance.role,
                power,
                address,
                nodes,
            });
        }

        Ok(HealthReport {
            instances: report,
            control_plane_available: records.is_some(),
        })
    }
}
