//! Remote host error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Host {host} unreachable: {message}")]
    RemoteUnreachable { host: String, message: String },

    #[error("Registry login failed on {host}")]
    RegistryLoginFailed { host: String },

    #[error("Container engine bootstrap failed on {host}")]
    BootstrapFailed { host: String },

    #[error("Container {service} failed to start: {message}")]
    ContainerStartFailed { service: String, message: String },

    #[error("{program} not found in PATH")]
    ToolNotFound { program: &'static str },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RemoteError>;
