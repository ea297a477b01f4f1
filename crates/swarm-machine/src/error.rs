use thiserror::Error;

#[derive(Error, Debug)]
pub enum MachineError {
    #[error("Machine command failed: {command} - {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Machine not found: {0}")]
    MachineNotFound(String),

    #[error("Invalid address for machine {name}: {address}")]
    InvalidAddress { name: String, address: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MachineError {
    pub fn command_failed(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    pub fn machine_not_found(name: impl Into<String>) -> Self {
        Self::MachineNotFound(name.into())
    }

    pub fn invalid_address(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::InvalidAddress {
            name: name.into(),
            address: address.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MachineError>;
