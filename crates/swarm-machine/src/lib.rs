//! Machine provisioning
//!
//! This crate wraps the lifecycle of the virtual machines that host cluster
//! nodes: create, start, stop, destroy, address lookup, certificate refresh
//! and remote command execution.

pub mod error;
pub mod machine;
pub mod provider;

pub use error::{MachineError, Result};
pub use machine::{DockerMachine, MachineConfig};
pub use provider::{InstanceProvider, PowerState};
