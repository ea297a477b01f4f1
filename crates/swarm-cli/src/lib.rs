pub mod cli;
pub mod commands;
pub mod config;

pub use cli::{Cli, Commands, ServiceCommands};
pub use commands::handle_command;
pub use config::ConfigManager;
