//! Shared fixtures for unit tests

use async_trait::async_trait;
use mockall::mock;
use std::net::IpAddr;
use swarm_machine::{InstanceProvider, PowerState};

use crate::config::SwarmConfig;
use crate::node::{Availability, NodeRecord, Reachability};

mock! {
    pub Provider {}

    #[async_trait]
    impl InstanceProvider for Provider {
        async fn create(&self, name: &str) -> swarm_machine::Result<()>;
        async fn destroy(&self, names: &[String]) -> swarm_machine::Result<()>;
        async fn start(&self, name: &str) -> swarm_machine::Result<()>;
        async fn stop(&self, name: &str) -> swarm_machine::Result<()>;
        async fn list(&self, prefix: &str, state: Option<PowerState>) -> swarm_machine::Result<Vec<String>>;
        async fn state(&self, name: &str) -> swarm_machine::Result<PowerState>;
        async fn address(&self, name: &str) -> swarm_machine::Result<IpAddr>;
        async fn regenerate_credentials(&self, name: &str) -> swarm_machine::Result<()>;
        async fn exec(&self, name: &str, command: &str) -> swarm_machine::Result<String>;
    }
}

pub fn record(id: &str, hostname: &str, status: Reachability, manager_status: &str) -> NodeRecord {
    NodeRecord {
        id: id.to_string(),
        hostname: hostname.to_string(),
        availability: Availability::Active,
        status,
        manager_status: manager_status.to_string(),
    }
}

/// Defaults with waits shrunk to keep tests fast
pub fn quick_config() -> SwarmConfig {
    SwarmConfig {
        create_stagger_secs: 0,
        drain_settle_secs: 0,
        poll_attempts: 3,
        poll_interval_ms: 1,
        ..SwarmConfig::default()
    }
}
