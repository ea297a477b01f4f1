use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "swarm",
    about = "Machine-backed swarm cluster management",
    version = env!("CARGO_PKG_VERSION"),
    long_about = "Creates, scales, stops and deletes a swarm of managers and workers running on docker-machine instances."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Clone, Debug, PartialEq)]
pub enum Commands {
    /// Create or resume the cluster: no count keeps the current shape,
    /// one count N means 1 manager and N-1 workers, two counts are managers
    /// and workers
    Start {
        #[arg(value_name = "COUNT", num_args = 0..=2)]
        counts: Vec<u32>,
    },

    /// Take every instance out of the swarm and power it off, leader last
    Stop,

    /// Converge to the given shape, draining and removing surplus nodes
    Scale {
        #[arg(value_name = "COUNT", num_args = 0..=2)]
        counts: Vec<u32>,
    },

    /// Destroy every cluster instance
    Delete,

    /// Deploy the swarm visualizer and print its address
    Vis,

    /// Manage services on the cluster
    #[command(subcommand)]
    Service(ServiceCommands),

    /// Show power state, address and membership of every instance
    Health,

    /// Show the logs of a service
    Logs {
        /// Service name
        service: String,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "100")]
        tail: u32,
    },
}

#[derive(Subcommand, Clone, Debug, PartialEq)]
pub enum ServiceCommands {
    /// List services
    Ls,

    /// Create a service
    Create {
        name: String,
        image: String,

        #[arg(short, long, default_value = "1")]
        replicas: u32,

        /// Published port mapping, e.g. 80:80
        #[arg(short, long)]
        publish: Vec<String>,
    },

    /// Set the replica count of a service
    Scale { name: String, replicas: u32 },

    /// Remove a service
    Rm { name: String },
}
