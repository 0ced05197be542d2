//! Cluster API abstraction

use crate::error::Result;
use async_trait::async_trait;
use fleetwire_core::Sensitive;
use std::path::Path;
use std::time::Duration;

/// Outcome of waiting for a rollout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutState {
    Complete,
    /// The wait ended before the rollout finished; carries the last status line
    TimedOut(String),
}

/// Operations the deployer needs from the cluster
///
/// Implemented by [`crate::Kubectl`] and by in-memory fakes in tests.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Point the client at the provisioned cluster
    async fn connect(&self, resource_group: &str, cluster: &str) -> Result<()>;

    async fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    async fn create_namespace(&self, namespace: &str) -> Result<()>;

    /// Apply a document passed on stdin (never written to disk)
    async fn apply_stdin(&self, document: &Sensitive) -> Result<()>;

    async fn apply_file(&self, namespace: &str, path: &Path) -> Result<()>;

    async fn set_env(&self, namespace: &str, deployment: &str, vars: &[(String, String)])
    -> Result<()>;

    async fn rollout_restart(&self, namespace: &str, deployment: &str) -> Result<()>;

    async fn rollout_status(
        &self,
        namespace: &str,
        deployment: &str,
        timeout: Duration,
    ) -> Result<RolloutState>;

    /// InternalIP of a schedulable node
    async fn node_internal_ip(&self) -> Result<Option<String>>;

    /// NodePort of the first port of a Service
    async fn service_node_port(&self, namespace: &str, service: &str) -> Result<Option<u16>>;
}
