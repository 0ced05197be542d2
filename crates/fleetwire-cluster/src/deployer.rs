//! Cluster rollout
//!
//! Ensures the namespace, materializes the shared secret, applies every
//! manifest, forces a restart, waits for the rollouts and resolves externally
//! reachable addresses. Per-service failures are recorded and the batch
//! continues.

use crate::api::{ClusterApi, RolloutState};
use crate::error::{ClusterError, Result};
use crate::manifest::StagingDir;
use crate::secret::{SECRET_NAME, secret_document};
use fleetwire_core::{
    AbortSignal, DeploymentResult, EndpointMap, Outputs, Provenance, ResolvedEndpoint,
    ServiceOutcome, ServiceSpec, TargetKind, TargetRef,
};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ROLLOUT_TIMEOUT: Duration = Duration::from_secs(300);

/// Result of one cluster rollout
#[derive(Debug, Clone)]
pub struct ClusterDeployment {
    pub endpoints: EndpointMap,
    pub result: DeploymentResult,
}

pub struct ClusterDeployer {
    api: Arc<dyn ClusterApi>,
    namespace: String,
    rollout_timeout: Duration,
    abort: AbortSignal,
}

impl ClusterDeployer {
    pub fn new(api: Arc<dyn ClusterApi>, namespace: impl Into<String>) -> Self {
        Self {
            api,
            namespace: namespace.into(),
            rollout_timeout: DEFAULT_ROLLOUT_TIMEOUT,
            abort: AbortSignal::new(),
        }
    }

    pub fn with_rollout_timeout(mut self, timeout: Duration) -> Self {
        self.rollout_timeout = timeout;
        self
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Deploy every cluster-kind spec
    pub async fn deploy(&self, specs: &[ServiceSpec], outputs: &Outputs) -> ClusterDeployment {
        let mut result = DeploymentResult::new(TargetRef::Namespace(self.namespace.clone()));
        let mut endpoints = EndpointMap::new();

        let specs: Vec<&ServiceSpec> = specs
            .iter()
            .filter(|s| s.target == TargetKind::Cluster)
            .collect();
        if specs.is_empty() {
            return ClusterDeployment { endpoints, result };
        }
        // A missing cluster output means the feature is not provisioned
        let Some(cluster) = outputs.cluster_name() else {
            tracing::warn!(
                "Cluster not provisioned, skipping {} service(s)",
                specs.len()
            );
            result.note = Some(format!(
                "cluster not provisioned; {} service(s) skipped",
                specs.len()
            ));
            return ClusterDeployment { endpoints, result };
        };
        if self.abort.is_raised() {
            for spec in &specs {
                result.push(ServiceOutcome::failed(spec.id, "aborted before apply"));
            }
            return ClusterDeployment { endpoints, result };
        }

        let staging = match self.prepare(outputs, cluster).await {
            Ok(staging) => staging,
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, "Cluster preparation failed: {}", e);
                result.target_error = Some(e.to_string());
                return ClusterDeployment { endpoints, result };
            }
        };
        let login_server = outputs
            .registry()
            .map(|r| r.login_server.as_str())
            .unwrap_or_default();

        // Apply + restart, in catalogue order
        let mut applied = Vec::new();
        for spec in &specs {
            if self.abort.is_raised() {
                result.push(ServiceOutcome::failed(spec.id, "aborted before apply"));
                continue;
            }
            match self.apply(spec, &staging, login_server).await {
                Ok(()) => applied.push(*spec),
                Err(e) => {
                    tracing::warn!(service = spec.name(), "{}", e);
                    result.push(ServiceOutcome::failed(spec.id, e.to_string()));
                }
            }
        }

        // Wait for each rollout
        let mut rolled_out = Vec::new();
        for spec in applied {
            if self.abort.is_raised() {
                result.push(ServiceOutcome::degraded(spec.id, "applied; rollout wait aborted"));
                continue;
            }
            let outcome = self.wait(spec).await;
            if !outcome.status.is_failed() {
                rolled_out.push(spec);
            }
            result.push(outcome);
        }

        // Resolve external addresses
        if !rolled_out.is_empty() && !self.abort.is_raised() {
            let node_ip = match self.api.node_internal_ip().await {
                Ok(ip) => ip,
                Err(e) => {
                    tracing::warn!("Could not resolve node address: {}", e);
                    None
                }
            };
            for spec in rolled_out {
                if let Some(endpoint) = self.resolve_endpoint(spec, node_ip.as_deref()).await {
                    endpoints.offer(endpoint);
                }
            }
        }

        ClusterDeployment { endpoints, result }
    }

    /// Credentials, namespace and shared secret
    async fn prepare(&self, outputs: &Outputs, cluster: &str) -> Result<StagingDir> {
        tracing::info!(cluster, namespace = %self.namespace, "Connecting to cluster");
        self.api.connect(outputs.resource_group(), cluster).await?;

        if !self.api.namespace_exists(&self.namespace).await? {
            tracing::info!("Creating namespace {}", self.namespace);
            self.api.create_namespace(&self.namespace).await?;
        }

        tracing::info!("Applying secret {}", SECRET_NAME);
        self.api
            .apply_stdin(&secret_document(&self.namespace, outputs))
            .await?;

        StagingDir::new()
    }

    async fn apply(&self, spec: &ServiceSpec, staging: &StagingDir, login_server: &str) -> Result<()> {
        let manifest = spec
            .manifest
            .as_deref()
            .ok_or_else(|| ClusterError::ManifestApplyFailed {
                service: spec.name().to_string(),
                message: "no manifest declared".to_string(),
            })?;
        let staged = staging.stage(manifest, login_server)?;

        tracing::info!(service = spec.name(), "Applying manifest");
        self.api
            .apply_file(&self.namespace, &staged)
            .await
            .map_err(|e| ClusterError::ManifestApplyFailed {
                service: spec.name().to_string(),
                message: e.to_string(),
            })?;

        let vars: Vec<(String, String)> = spec
            .env()
            .plain()
            .map(|(k, v)| (k.env_name().to_string(), v.to_string()))
            .collect();
        self.api.set_env(&self.namespace, spec.name(), &vars).await?;

        // An unchanged manifest would not pick up a re-pushed image under the same tag
        self.api.rollout_restart(&self.namespace, spec.name()).await?;
        Ok(())
    }

    async fn wait(&self, spec: &ServiceSpec) -> ServiceOutcome {
        match self
            .api
            .rollout_status(&self.namespace, spec.name(), self.rollout_timeout)
            .await
        {
            Ok(RolloutState::Complete) => ServiceOutcome::succeeded(spec.id),
            Ok(RolloutState::TimedOut(status)) => {
                let reason = ClusterError::RolloutTimeout {
                    service: spec.name().to_string(),
                    timeout_secs: self.rollout_timeout.as_secs(),
                };
                tracing::warn!("{}", reason);
                ServiceOutcome::degraded(spec.id, reason.to_string()).with_diagnostics(vec![status])
            }
            Err(e) => {
                tracing::warn!(service = spec.name(), "Rollout status failed: {}", e);
                ServiceOutcome::degraded(spec.id, "rollout status unavailable")
                    .with_diagnostics(vec![e.to_string()])
            }
        }
    }

    /// Node IP + NodePort, falling back to in-cluster DNS
    async fn resolve_endpoint(
        &self,
        spec: &ServiceSpec,
        node_ip: Option<&str>,
    ) -> Option<ResolvedEndpoint> {
        if let Some(ip) = node_ip {
            match self.api.service_node_port(&self.namespace, spec.name()).await {
                Ok(Some(node_port)) => {
                    return Some(ResolvedEndpoint::new(
                        spec.id,
                        format!("http://{}:{}", ip, node_port),
                        Provenance::DiscoveredAddress,
                    ));
                }
                Ok(None) => {
                    tracing::debug!(service = spec.name(), "Service has no NodePort");
                }
                Err(e) => {
                    tracing::debug!(service = spec.name(), "NodePort lookup failed: {}", e);
                }
            }
        }

        let port = spec.port()?;
        Some(ResolvedEndpoint::cluster_dns(spec.id, &self.namespace, port))
    }
}
