//! Endpoint rewiring
//!
//! Recomputes the base URLs of every downstream consumer from the endpoints
//! resolved during the run and pushes them to the running consumer.
//!
//! Per dependency the first match wins:
//!
//! 1. an endpoint resolved at runtime in this run
//! 2. an address derived from the outputs (explicit `<service>_url`, loopback
//!    when co-located with the consumer, otherwise the VM address + port)
//! 3. in-cluster DNS for cluster-kind services
//! 4. nothing; the setting is omitted and reported
//!
//! Consumers outside the virtual network get public addresses.

use crate::error::PipelineError;
use crate::webapp::WebAppClient;
use fleetwire_core::{
    AbortSignal, DeploymentResult, EndpointMap, EnvKey, Outputs, Placement, Provenance, ResolvedEndpoint,
    ServiceId, ServiceSpec, TargetKind,
};
use fleetwire_remote::RemoteHostDeployer;
use std::fmt;

/// Settings each consumer receives, and the service each one points at
const GATEWAY_WIRING: [(EnvKey, ServiceId); 4] = [
    (EnvKey::OrderServiceBaseUrl, ServiceId::OrderService),
    (EnvKey::PaymentServiceBaseUrl, ServiceId::PaymentService),
    (EnvKey::EventProcessorBaseUrl, ServiceId::EventProcessor),
    (EnvKey::NotificationServiceBaseUrl, ServiceId::NotificationService),
];

const FRONTEND_WIRING: [(EnvKey, ServiceId); 2] = [
    (EnvKey::ApiGatewayUrl, ServiceId::ApiGateway),
    (EnvKey::InventoryServiceUrl, ServiceId::InventoryService),
];

/// Services whose configuration is rewired
pub const CONSUMERS: [ServiceId; 2] = [ServiceId::ApiGateway, ServiceId::Frontend];

fn wiring_table(consumer: ServiceId) -> &'static [(EnvKey, ServiceId)] {
    match consumer {
        ServiceId::ApiGateway => &GATEWAY_WIRING,
        ServiceId::Frontend => &FRONTEND_WIRING,
        _ => &[],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WiringState {
    /// No setting could be resolved
    Unwired,
    /// Some settings are missing; reported, never fatal
    PartiallyWired,
    FullyWired,
    /// Every setting resolved and pushed to the running consumer
    Rewired,
}

impl fmt::Display for WiringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WiringState::Unwired => "unwired",
            WiringState::PartiallyWired => "partially wired",
            WiringState::FullyWired => "fully wired",
            WiringState::Rewired => "rewired",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WiredSetting {
    pub key: EnvKey,
    pub dependency: ServiceId,
    pub url: String,
    pub provenance: Provenance,
}

/// Computed wiring of one consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerWiring {
    pub consumer: ServiceId,
    pub state: WiringState,
    pub settings: Vec<WiredSetting>,
    /// Settings with no endpoint, and the dependency they point at
    pub unresolved: Vec<(EnvKey, ServiceId)>,
    pub pushed: bool,
    /// Why the push did not happen or failed
    pub note: Option<String>,
}

impl ConsumerWiring {
    fn new(consumer: ServiceId, settings: Vec<WiredSetting>, unresolved: Vec<(EnvKey, ServiceId)>) -> Self {
        let state = match (settings.is_empty(), unresolved.is_empty()) {
            (true, false) => WiringState::Unwired,
            (false, false) => WiringState::PartiallyWired,
            (_, true) => WiringState::FullyWired,
        };
        Self {
            consumer,
            state,
            settings,
            unresolved,
            pushed: false,
            note: None,
        }
    }

    pub fn setting(&self, key: EnvKey) -> Option<&WiredSetting> {
        self.settings.iter().find(|s| s.key == key)
    }

    /// `(name, url)` pairs in the form the consumer reads them
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.settings
            .iter()
            .map(|s| (s.key.env_name().to_string(), s.url.clone()))
            .collect()
    }

    pub fn unresolved_errors(&self) -> Vec<PipelineError> {
        self.unresolved
            .iter()
            .map(|(key, _)| PipelineError::EndpointUnresolved {
                consumer: self.consumer,
                key: *key,
            })
            .collect()
    }

    /// Apply the computed settings to `spec`
    pub fn apply_to(&self, spec: &mut ServiceSpec) -> fleetwire_core::Result<()> {
        for setting in &self.settings {
            spec.set_plain(setting.key, setting.url.as_str())?;
        }
        Ok(())
    }

    pub(crate) fn mark_pushed(&mut self) {
        self.pushed = true;
        if self.state == WiringState::FullyWired {
            self.state = WiringState::Rewired;
        }
    }
}

/// Wiring of every consumer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewireResult {
    pub consumers: Vec<ConsumerWiring>,
    /// Results of redeploying consumers that run on remote hosts
    pub redeployments: Vec<DeploymentResult>,
}

impl RewireResult {
    pub fn consumer(&self, consumer: ServiceId) -> Option<&ConsumerWiring> {
        self.consumers.iter().find(|c| c.consumer == consumer)
    }

    pub fn consumer_mut(&mut self, consumer: ServiceId) -> Option<&mut ConsumerWiring> {
        self.consumers.iter_mut().find(|c| c.consumer == consumer)
    }
}

pub struct EndpointRewirer {
    namespace: String,
    exclude: Vec<ServiceId>,
    abort: AbortSignal,
}

impl EndpointRewirer {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            exclude: Vec::new(),
            abort: AbortSignal::new(),
        }
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    /// Services removed from the run; settings pointing at them are dropped
    pub fn with_exclude(mut self, exclude: Vec<ServiceId>) -> Self {
        self.exclude = exclude;
        self
    }

    /// Compute the wiring of every consumer
    pub fn rewire(&self, resolved: &EndpointMap, outputs: &Outputs) -> RewireResult {
        RewireResult {
            consumers: CONSUMERS
                .iter()
                .filter(|c| !self.exclude.contains(c))
                .map(|c| self.wire(*c, resolved, outputs))
                .collect(),
            redeployments: Vec::new(),
        }
    }

    /// Compute the wiring of one consumer
    pub fn wire(
        &self,
        consumer: ServiceId,
        resolved: &EndpointMap,
        outputs: &Outputs,
    ) -> ConsumerWiring {
        let mut settings = Vec::new();
        let mut unresolved = Vec::new();

        for &(key, dependency) in wiring_table(consumer) {
            if self.exclude.contains(&dependency) {
                continue;
            }
            match self.resolve(consumer, dependency, resolved, outputs) {
                Some((url, provenance)) => settings.push(WiredSetting {
                    key,
                    dependency,
                    url,
                    provenance,
                }),
                None => {
                    tracing::warn!("No endpoint for {} of {}", key, consumer);
                    unresolved.push((key, dependency));
                }
            }
        }

        ConsumerWiring::new(consumer, settings, unresolved)
    }

    fn resolve(
        &self,
        consumer: ServiceId,
        dependency: ServiceId,
        resolved: &EndpointMap,
        outputs: &Outputs,
    ) -> Option<(String, Provenance)> {
        let external = consumer.is_external();

        // 1. runtime endpoint
        if let Some(endpoint) = resolved.get(dependency)
            && endpoint.provenance.is_runtime()
        {
            return Some((endpoint.url_for(external).to_string(), endpoint.provenance));
        }

        // 2. output-derived
        if let Some(endpoint) = output_endpoint(consumer, dependency, outputs) {
            return Some((endpoint.url_for(external).to_string(), endpoint.provenance));
        }

        // 3. in-cluster DNS, unreachable from outside the network
        if external {
            return None;
        }
        if let Some(endpoint) = resolved.get(dependency) {
            return Some((endpoint.base_url.clone(), endpoint.provenance));
        }
        if dependency.target_kind() == Some(TargetKind::Cluster)
            && let Some(port) = dependency.port()
        {
            let endpoint = ResolvedEndpoint::cluster_dns(dependency, &self.namespace, port);
            return Some((endpoint.base_url, endpoint.provenance));
        }

        None
    }

    /// Push the gateway settings by redeploying it on its host
    pub async fn push_gateway(
        &self,
        wiring: &mut ConsumerWiring,
        spec: &ServiceSpec,
        deployer: &RemoteHostDeployer,
        outputs: &Outputs,
    ) -> Option<DeploymentResult> {
        if wiring.settings.is_empty() {
            wiring.note = Some("nothing to push".to_string());
            return None;
        }

        let mut spec = spec.clone();
        if let Err(e) = wiring.apply_to(&mut spec) {
            wiring.note = Some(e.to_string());
            return None;
        }

        tracing::info!("Redeploying {} with rewired settings", spec.name());
        let deployment = deployer
            .deploy(outputs.hosts(), std::slice::from_ref(&spec), outputs.registry())
            .await;

        let Some(result) = deployment.results.into_iter().next() else {
            wiring.note = Some("gateway host not provisioned".to_string());
            return None;
        };

        match result.outcome(spec.id) {
            Some(outcome) if !outcome.status.is_failed() && result.target_error.is_none() => {
                wiring.mark_pushed();
            }
            _ => {
                wiring.note = Some(
                    result
                        .target_error
                        .clone()
                        .unwrap_or_else(|| "redeploy failed".to_string()),
                );
            }
        }
        Some(result)
    }

    /// Push the frontend settings as app settings and restart the app
    pub async fn push_frontend(
        &self,
        wiring: &mut ConsumerWiring,
        client: &dyn WebAppClient,
        outputs: &Outputs,
    ) {
        let Some(app) = outputs.frontend_app_name() else {
            wiring.note = Some("no web app provisioned".to_string());
            return;
        };
        if wiring.settings.is_empty() {
            wiring.note = Some("nothing to push".to_string());
            return;
        }

        let settings = wiring.env_pairs();
        let rg = outputs.resource_group();
        tracing::info!("Updating {} app settings on {}", settings.len(), app);

        if let Err(e) = client.set_app_settings(rg, app, &settings).await {
            tracing::warn!("Failed to update {}: {}", app, e);
            wiring.note = Some(e.to_string());
            return;
        }
        if self.abort.is_raised() {
            tracing::warn!("Aborted before restarting {}", app);
            wiring.note = Some("aborted before restart".to_string());
            return;
        }
        match client.restart(rg, app).await {
            Ok(()) => wiring.mark_pushed(),
            Err(e) => {
                tracing::warn!("Failed to update {}: {}", app, e);
                wiring.note = Some(e.to_string());
            }
        }
    }
}

/// Address of `dependency` derived from the outputs alone
fn output_endpoint(
    consumer: ServiceId,
    dependency: ServiceId,
    outputs: &Outputs,
) -> Option<ResolvedEndpoint> {
    let explicit_key = format!("{}_url", dependency.name().replace('-', "_"));
    if let Some(url) = outputs.value(&explicit_key) {
        return Some(ResolvedEndpoint::new(dependency, url, Provenance::ExplicitOutput));
    }

    let Placement::Host(host) = dependency.placement() else {
        return None;
    };
    let port = dependency.port()?;

    if consumer.placement() == Placement::Host(host) {
        return Some(ResolvedEndpoint::new(
            dependency,
            format!("http://localhost:{}", port),
            Provenance::Loopback,
        ));
    }

    let address = outputs.host(host)?;
    let endpoint = ResolvedEndpoint::new(
        dependency,
        format!("http://{}:{}", address.private_ip, port),
        Provenance::DiscoveredAddress,
    );
    Some(match address.public_ip {
        Some(ref public) => endpoint.with_public_url(format!("http://{}:{}", public, port)),
        None => endpoint,
    })
}
