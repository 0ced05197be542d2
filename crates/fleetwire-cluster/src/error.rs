//! Cluster error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("kubectl not found. Please install: az aks install-cli")]
    KubectlNotFound,

    #[error("{program} {command} failed: {stderr}")]
    CommandFailed {
        program: &'static str,
        command: String,
        stderr: String,
    },

    #[error("Manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Manifest apply failed for {service}: {message}")]
    ManifestApplyFailed { service: String, message: String },

    #[error("Rollout of {service} did not complete within {timeout_secs}s")]
    RolloutTimeout { service: String, timeout_secs: u64 },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
