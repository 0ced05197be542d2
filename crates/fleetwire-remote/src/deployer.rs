//! Remote host rollout
//!
//! Groups the remote-host specs by host, runs one generated script per host
//! and turns the reported markers into per-service outcomes. Hosts run
//! concurrently; a failing host never affects another host's result.

use crate::error::RemoteError;
use crate::executor::{ExecOutput, RemoteExecutor};
use crate::report::{HostFailure, HostReport, ReportedStatus};
use crate::script::ScriptBuilder;
use fleetwire_core::{
    AbortSignal, DeploymentResult, EndpointMap, HostAddress, Provenance, Registry,
    ResolvedEndpoint, ResultLog, ServiceOutcome, ServiceSpec, TargetKind, TargetRef,
};
use futures_util::StreamExt;
use futures_util::stream;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_HOST_PARALLELISM: usize = 4;
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(20);

/// Number of stderr lines kept when a script ends without its exit marker
const STDERR_TAIL: usize = 20;

/// Result of one remote rollout
#[derive(Debug, Clone, Default)]
pub struct RemoteDeployment {
    pub endpoints: EndpointMap,
    /// One entry per host, sorted by host name
    pub results: Vec<DeploymentResult>,
}

pub struct RemoteHostDeployer {
    executor: Arc<dyn RemoteExecutor>,
    parallelism: usize,
    warmup: Duration,
    abort: AbortSignal,
}

impl RemoteHostDeployer {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            parallelism: DEFAULT_HOST_PARALLELISM,
            warmup: DEFAULT_WARMUP,
            abort: AbortSignal::new(),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    /// Deploy every remote-host spec to the host it is assigned to
    pub async fn deploy(
        &self,
        hosts: &[HostAddress],
        specs: &[ServiceSpec],
        registry: Option<&Registry>,
    ) -> RemoteDeployment {
        let mut assignments: BTreeMap<&str, Vec<&ServiceSpec>> = BTreeMap::new();
        for spec in specs.iter().filter(|s| s.target == TargetKind::RemoteHost) {
            match spec.host.as_deref() {
                Some(host) => assignments.entry(host).or_default().push(spec),
                None => tracing::warn!("{} has no host assignment, skipping", spec.name()),
            }
        }

        let mut batches = Vec::new();
        for (name, specs) in assignments {
            match hosts.iter().find(|h| h.name == name) {
                Some(host) => batches.push((host, specs)),
                None => tracing::warn!(
                    "Host {} not provisioned, skipping {} service(s)",
                    name,
                    specs.len()
                ),
            }
        }

        if batches.is_empty() {
            tracing::info!("No remote hosts to deploy");
            return RemoteDeployment::default();
        }

        let log = ResultLog::new();
        let endpoint_batches: Vec<Vec<ResolvedEndpoint>> = stream::iter(batches)
            .map(|(host, specs)| {
                let log = log.clone();
                async move {
                    let (result, endpoints) = self.deploy_host(host, &specs, registry).await;
                    log.record(result);
                    endpoints
                }
            })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        let mut endpoints = EndpointMap::new();
        for endpoint in endpoint_batches.into_iter().flatten() {
            endpoints.offer(endpoint);
        }

        let mut results = log.snapshot();
        results.sort_by_key(|r| r.target.to_string());

        RemoteDeployment { endpoints, results }
    }

    async fn deploy_host(
        &self,
        host: &HostAddress,
        specs: &[&ServiceSpec],
        registry: Option<&Registry>,
    ) -> (DeploymentResult, Vec<ResolvedEndpoint>) {
        let mut result = DeploymentResult::new(TargetRef::Host(host.name.clone()));

        if self.abort.is_raised() {
            for spec in specs {
                result.push(ServiceOutcome::failed(spec.id, "aborted before start"));
            }
            return (result, Vec::new());
        }

        tracing::info!("Deploying {} service(s) to {}", specs.len(), host.name);

        let script = ScriptBuilder::new(self.warmup)
            .log_tail(self.executor.log_tail_lines())
            .registry(registry)
            .services(specs.iter().copied())
            .build();

        let output = match self.executor.execute(host, &script).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("{}: {}", host.name, e);
                result.target_error = Some(e.to_string());
                for spec in specs {
                    result.push(ServiceOutcome::failed(spec.id, "host unreachable"));
                }
                return (result, Vec::new());
            }
        };

        let report = HostReport::parse(&output.stdout);
        if report.engine_installed {
            tracing::info!("Installed container engine on {}", host.name);
        }

        if let Some(failure) = report.host_failure() {
            let error = match failure {
                HostFailure::RegistryLogin => RemoteError::RegistryLoginFailed {
                    host: host.name.clone(),
                },
                HostFailure::Bootstrap => RemoteError::BootstrapFailed {
                    host: host.name.clone(),
                },
            };
            tracing::warn!("{}", error);
            result.target_error = Some(error.to_string());
            for spec in specs {
                result.push(ServiceOutcome::failed(spec.id, "not attempted"));
            }
            return (result, Vec::new());
        }

        if !report.completed() {
            result.target_error = Some(incomplete_run(&output));
        }

        let mut endpoints = Vec::new();
        for spec in specs {
            let outcome = match report.statuses.get(spec.name()) {
                Some(ReportedStatus::Running) => {
                    if let Some(endpoint) = host_endpoint(host, spec) {
                        endpoints.push(endpoint);
                    }
                    ServiceOutcome::succeeded(spec.id)
                }
                Some(ReportedStatus::Failed(reason)) => {
                    let error = RemoteError::ContainerStartFailed {
                        service: spec.name().to_string(),
                        message: reason.clone(),
                    };
                    tracing::warn!("{}: {}", host.name, error);
                    ServiceOutcome::failed(spec.id, reason.clone()).with_diagnostics(
                        report.logs.get(spec.name()).cloned().unwrap_or_default(),
                    )
                }
                None => ServiceOutcome::failed(spec.id, "no status reported"),
            };
            result.push(outcome);
        }

        (result, endpoints)
    }
}

/// `http://<private_ip>:<port>` for in-network consumers, public address for the rest
pub fn host_endpoint(host: &HostAddress, spec: &ServiceSpec) -> Option<ResolvedEndpoint> {
    let port = spec.port()?;
    let endpoint = ResolvedEndpoint::new(
        spec.id,
        format!("http://{}:{}", host.private_ip, port),
        Provenance::DiscoveredAddress,
    );
    Some(match host.public_ip {
        Some(ref public) => endpoint.with_public_url(format!("http://{}:{}", public, port)),
        None => endpoint,
    })
}

fn incomplete_run(output: &ExecOutput) -> String {
    let tail: Vec<&str> = output
        .stderr
        .lines()
        .rev()
        .take(STDERR_TAIL)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    match output.exit_code {
        Some(code) => format!("script exited with {} before finishing: {}", code, tail.join(" | ")),
        None => format!("script output ended early: {}", tail.join(" | ")),
    }
}
