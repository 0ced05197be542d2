//! Infrastructure error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InfraError {
    #[error("terraform not found. Please install: https://developer.hashicorp.com/terraform/install")]
    TerraformNotFound,

    #[error("Infrastructure not provisioned: {0}")]
    InfrastructureNotProvisioned(String),

    #[error("terraform {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Invalid output '{key}': {message}")]
    InvalidOutput { key: String, message: String },

    #[error("Infrastructure directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, InfraError>;
