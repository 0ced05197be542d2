//! Pipeline driver
//!
//! Runs the stage table in order: infra, outputs, images, cluster, hosts,
//! rewire. Fatal stages stop the run with the stage attached to the error;
//! best-effort stages record their failures in the report and the run goes on.

use crate::error::{InStage, PipelineError, Result, StageError};
use crate::options::PipelineOptions;
use crate::report::RunReport;
use crate::rewire::{EndpointRewirer, RewireResult};
use crate::stage::{Stage, StageStatus};
use crate::webapp::WebAppClient;
use fleetwire_build::{ImageBackend, ImagePublisher};
use fleetwire_cluster::{ClusterApi, ClusterDeployer};
use fleetwire_core::{
    AbortSignal, DeploymentResult, EndpointMap, Outputs, Placement, ServiceId, ServiceSpec,
    TargetKind, TargetRef, build_specs,
};
use fleetwire_infra::{OutputResolver, Provisioner, StateSource};
use fleetwire_remote::{RemoteExecutor, RemoteHostDeployer, host_endpoint};
use std::sync::Arc;

/// Builds the remote transport once the outputs are known
pub type ExecutorFactory = Box<dyn Fn(&Outputs) -> Arc<dyn RemoteExecutor> + Send + Sync>;

/// External systems the pipeline talks to
pub struct Collaborators {
    pub provisioner: Arc<dyn Provisioner>,
    pub state: Arc<dyn StateSource>,
    /// Only needed when the images stage runs
    pub images: Option<Arc<dyn ImageBackend>>,
    pub cluster: Arc<dyn ClusterApi>,
    pub remote: ExecutorFactory,
    pub webapp: Arc<dyn WebAppClient>,
}

/// What a run would do, without doing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Stage and whether it runs
    pub stages: Vec<(Stage, bool)>,
    pub services: Vec<(ServiceId, TargetRef)>,
}

impl Plan {
    pub fn new(options: &PipelineOptions) -> Self {
        let excluded = options.excluded();
        Self {
            stages: Stage::ALL.iter().map(|s| (*s, !options.skips(*s))).collect(),
            services: ServiceId::ALL
                .iter()
                .filter(|s| !excluded.contains(s))
                .map(|s| {
                    let target = match s.placement() {
                        Placement::Cluster => TargetRef::Namespace(options.namespace.clone()),
                        Placement::Host(host) => TargetRef::Host(host.to_string()),
                        Placement::WebApp => TargetRef::WebApp(s.name().to_string()),
                    };
                    (*s, target)
                })
                .collect(),
        }
    }
}

pub struct PipelineDriver {
    options: PipelineOptions,
    tools: Collaborators,
    abort: AbortSignal,
}

impl PipelineDriver {
    pub fn new(options: PipelineOptions, tools: Collaborators) -> Self {
        Self {
            options,
            tools,
            abort: AbortSignal::new(),
        }
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn plan(&self) -> Plan {
        Plan::new(&self.options)
    }

    /// Run every stage and return the report
    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::new();
        if let Err(e) = self.execute(&mut report).await {
            if matches!(e, PipelineError::Aborted(_)) {
                report.aborted = true;
            }
            report.fatal = Some(e);
        }
        // Ctrl-C during the last stage never reaches another stage boundary
        if self.abort.is_raised() {
            report.aborted = true;
        }
        report.finish();
        report
    }

    async fn execute(&self, report: &mut RunReport) -> Result<()> {
        // infra
        self.enter(Stage::Infra, report)?;
        if self.options.skips(Stage::Infra) {
            report.record(Stage::Infra, StageStatus::Skipped);
        } else {
            fatal(report, Stage::Infra, self.tools.provisioner.provision().await)?;
            report.record(Stage::Infra, StageStatus::Completed);
        }

        // outputs
        self.enter(Stage::Outputs, report)?;
        let resolver = OutputResolver::new(self.tools.state.clone());
        let outputs = fatal(report, Stage::Outputs, resolver.resolve().await)?;
        report.resource_group = Some(outputs.resource_group().to_string());
        report.registry = outputs.registry().map(|r| r.login_server.clone());
        let mut specs = fatal(
            report,
            Stage::Outputs,
            build_specs(&outputs, &self.options.catalogue()),
        )?;
        report.record(Stage::Outputs, StageStatus::Completed);

        // images
        self.enter(Stage::Images, report)?;
        if self.options.skips(Stage::Images) {
            report.record(Stage::Images, StageStatus::Skipped);
        } else {
            self.publish_images(&mut specs, &outputs, report).await?;
            report.record(Stage::Images, StageStatus::Completed);
        }

        let mut endpoints = EndpointMap::new();

        // cluster
        self.enter(Stage::Cluster, report)?;
        if self.options.skips(Stage::Cluster) {
            report.record(Stage::Cluster, StageStatus::Skipped);
        } else {
            let deployer = ClusterDeployer::new(self.tools.cluster.clone(), &self.options.namespace)
                .with_rollout_timeout(self.options.rollout_timeout)
                .with_abort(self.abort.clone());
            let deployment = deployer.deploy(&specs, &outputs).await;
            endpoints.merge(deployment.endpoints);
            report.record(Stage::Cluster, status_of(std::slice::from_ref(&deployment.result)));
            report.results.push(deployment.result);
        }

        // The gateway starts with the cluster endpoints and the addresses its
        // host neighbours will get
        let rewirer = EndpointRewirer::new(&self.options.namespace)
            .with_exclude(self.options.excluded())
            .with_abort(self.abort.clone());
        let mut expected = endpoints.clone();
        for spec in specs.iter().filter(|s| s.target == TargetKind::RemoteHost) {
            if let Some(host) = spec.host.as_deref().and_then(|h| outputs.host(h))
                && let Some(endpoint) = host_endpoint(host, spec)
            {
                expected.offer(endpoint);
            }
        }
        let mut gateway_env = None;
        if let Some(gateway) = specs.iter_mut().find(|s| s.id == ServiceId::ApiGateway) {
            let wiring = rewirer.wire(ServiceId::ApiGateway, &expected, &outputs);
            match wiring.apply_to(gateway) {
                Ok(()) => gateway_env = Some(wiring.env_pairs()),
                Err(e) => tracing::warn!("Could not pre-wire the gateway: {}", e),
            }
        }

        // hosts
        self.enter(Stage::Hosts, report)?;
        let mut gateway_deployed = false;
        if self.options.skips(Stage::Hosts) {
            report.record(Stage::Hosts, StageStatus::Skipped);
        } else {
            let deployment = self
                .remote_deployer(&outputs)
                .deploy(outputs.hosts(), &specs, outputs.registry())
                .await;
            gateway_deployed = deployment.results.iter().any(|r| {
                r.target_error.is_none()
                    && r.outcome(ServiceId::ApiGateway)
                        .is_some_and(|o| !o.status.is_failed())
            });
            endpoints.merge(deployment.endpoints);
            report.record(Stage::Hosts, status_of(&deployment.results));
            report.results.extend(deployment.results);
        }

        // rewire
        self.enter(Stage::Rewire, report)?;
        let rewired = self
            .rewire(&rewirer, &specs, &endpoints, &outputs, gateway_env, gateway_deployed)
            .await;
        report.record(Stage::Rewire, self.rewire_status(&rewired));
        report.endpoints = endpoints;
        report.rewire = Some(rewired);

        Ok(())
    }

    async fn publish_images(
        &self,
        specs: &mut [ServiceSpec],
        outputs: &Outputs,
        report: &mut RunReport,
    ) -> Result<()> {
        let backend = fatal(
            report,
            Stage::Images,
            self.tools.images.clone().ok_or(StageError::NoImageBackend),
        )?;
        let publisher = fatal(report, Stage::Images, ImagePublisher::new(backend, outputs))?;

        for spec in specs.iter_mut() {
            self.enter(Stage::Images, report)?;
            tracing::info!("Publishing {}:{}", spec.name(), self.options.tag);
            let reference = fatal(
                report,
                Stage::Images,
                publisher.publish(spec, &self.options.tag).await,
            )?;
            spec.image = reference.to_string();
            report.images.push(reference);
        }
        Ok(())
    }

    async fn rewire(
        &self,
        rewirer: &EndpointRewirer,
        specs: &[ServiceSpec],
        endpoints: &EndpointMap,
        outputs: &Outputs,
        gateway_env: Option<Vec<(String, String)>>,
        gateway_deployed: bool,
    ) -> RewireResult {
        let mut rewired = rewirer.rewire(endpoints, outputs);

        let mut redeployment = None;
        if let Some(gateway) = specs.iter().find(|s| s.id == ServiceId::ApiGateway)
            && let Some(wiring) = rewired.consumer_mut(ServiceId::ApiGateway)
        {
            if gateway_deployed && gateway_env.as_ref() == Some(&wiring.env_pairs()) {
                // Already running with these settings
                wiring.mark_pushed();
            } else if self.abort.is_raised() {
                wiring.note = Some("aborted before redeploy".to_string());
            } else {
                let deployer = self.remote_deployer(outputs);
                redeployment = rewirer
                    .push_gateway(wiring, gateway, &deployer, outputs)
                    .await;
            }
        }
        rewired.redeployments.extend(redeployment);

        if let Some(wiring) = rewired.consumer_mut(ServiceId::Frontend) {
            if self.options.skip_frontend {
                wiring.note = Some("skipped (--skip-frontend)".to_string());
            } else if self.abort.is_raised() {
                wiring.note = Some("aborted before push".to_string());
            } else {
                rewirer
                    .push_frontend(wiring, self.tools.webapp.as_ref(), outputs)
                    .await;
            }
        }

        rewired
    }

    fn rewire_status(&self, rewired: &RewireResult) -> StageStatus {
        let mut problems = Vec::new();
        for wiring in &rewired.consumers {
            if !wiring.unresolved.is_empty() {
                problems.push(format!(
                    "{}: {} unresolved",
                    wiring.consumer,
                    wiring.unresolved.len()
                ));
            }
            let skipped = wiring.consumer == ServiceId::Frontend && self.options.skip_frontend;
            if !wiring.pushed && !skipped {
                problems.push(format!("{}: not pushed", wiring.consumer));
            }
        }
        if problems.is_empty() {
            StageStatus::Completed
        } else {
            StageStatus::CompletedWithErrors(problems.join(", "))
        }
    }

    fn remote_deployer(&self, outputs: &Outputs) -> RemoteHostDeployer {
        RemoteHostDeployer::new((self.tools.remote)(outputs))
            .with_parallelism(self.options.parallelism)
            .with_warmup(self.options.warmup)
            .with_abort(self.abort.clone())
    }

    /// Stop before `stage` when the run was aborted
    fn enter(&self, stage: Stage, report: &mut RunReport) -> Result<()> {
        if !self.abort.is_raised() {
            return Ok(());
        }
        for remaining in Stage::ALL.iter().filter(|s| **s >= stage) {
            if report.stage_status(*remaining).is_none() {
                report.record(*remaining, StageStatus::Aborted);
            }
        }
        Err(PipelineError::Aborted(stage))
    }
}

/// Attach the stage and record the failure
fn fatal<T, E: Into<StageError>>(
    report: &mut RunReport,
    stage: Stage,
    result: std::result::Result<T, E>,
) -> Result<T> {
    result.in_stage(stage).inspect_err(|e| {
        report.record(stage, StageStatus::Failed(e.to_string()));
    })
}

fn status_of(results: &[DeploymentResult]) -> StageStatus {
    let failing: Vec<String> = results
        .iter()
        .filter(|r| r.has_failures())
        .map(|r| r.target.to_string())
        .collect();
    if failing.is_empty() {
        StageStatus::Completed
    } else {
        StageStatus::CompletedWithErrors(format!("failures on {}", failing.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WebAppError;
    use crate::rewire::WiringState;
    use async_trait::async_trait;
    use fleetwire_build::{BuildError, BuildResult};
    use fleetwire_cluster::RolloutState;
    use fleetwire_core::{EnvKey, HostAddress, Provenance, RegistryCredentials, Sensitive};
    use fleetwire_infra::{InfraError, StaticState};
    use fleetwire_remote::{ExecOutput, RemoteError, RemoteScript};
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const STATE: &str = r#"{
        "resource_group_name": {"value": "rg-otel-demo", "type": "string", "sensitive": false},
        "acr_login_server": {"value": "oteldemo.azurecr.io", "type": "string"},
        "acr_admin_username": {"value": "oteldemo", "type": "string"},
        "acr_admin_password": {"value": "acr-secret", "type": "string", "sensitive": true},
        "aks_cluster_name": {"value": "aks-otel-demo", "type": "string"},
        "redis_connection_string": {"value": "rediss://:pw@cache:6380", "type": "string", "sensitive": true},
        "frontend_app_name": {"value": "oteldemo-frontend", "type": "string"},
        "virtual_machines": {"value": {
            "gateway": {"public_ip": "20.0.0.1", "private_ip": "10.0.1.4"},
            "inventory": {"public_ip": "20.0.0.2", "private_ip": "10.0.1.5"}
        }}
    }"#;

    /// Image digests per reference, shared by the image and cluster fakes
    #[derive(Default)]
    struct FakeRegistry {
        digests: Mutex<BTreeMap<String, u32>>,
    }

    impl FakeRegistry {
        fn digest(&self, image: &str) -> u32 {
            self.digests.lock().unwrap().get(image).copied().unwrap_or(0)
        }
    }

    #[derive(Default)]
    struct FakeProvisioner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provisioner for FakeProvisioner {
        async fn provision(&self) -> fleetwire_infra::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeImages {
        registry: Arc<FakeRegistry>,
        fail: Option<&'static str>,
    }

    #[async_trait]
    impl ImageBackend for FakeImages {
        async fn build(&self, service: &str, _source_dir: &Path, _image: &str) -> BuildResult<()> {
            if self.fail == Some(service) {
                return Err(BuildError::BuildFailed {
                    service: service.to_string(),
                    message: "COPY failed".to_string(),
                });
            }
            Ok(())
        }

        async fn push(
            &self,
            image: &str,
            _credentials: Option<&RegistryCredentials>,
        ) -> BuildResult<()> {
            *self
                .registry
                .digests
                .lock()
                .unwrap()
                .entry(image.to_string())
                .or_default() += 1;
            Ok(())
        }
    }

    struct FakeCluster {
        registry: Arc<FakeRegistry>,
        namespaces: Mutex<BTreeSet<String>>,
        /// deployment -> image from the applied manifest
        images: Mutex<BTreeMap<String, String>>,
        /// deployment -> digest picked up by the last restart
        running: Mutex<BTreeMap<String, u32>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeCluster {
        fn new(registry: Arc<FakeRegistry>) -> Self {
            Self {
                registry,
                namespaces: Mutex::new(BTreeSet::new()),
                images: Mutex::new(BTreeMap::new()),
                running: Mutex::new(BTreeMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClusterApi for FakeCluster {
        async fn connect(&self, _rg: &str, cluster: &str) -> fleetwire_cluster::Result<()> {
            self.calls.lock().unwrap().push(format!("connect {}", cluster));
            Ok(())
        }

        async fn namespace_exists(&self, namespace: &str) -> fleetwire_cluster::Result<bool> {
            Ok(self.namespaces.lock().unwrap().contains(namespace))
        }

        async fn create_namespace(&self, namespace: &str) -> fleetwire_cluster::Result<()> {
            self.namespaces.lock().unwrap().insert(namespace.to_string());
            Ok(())
        }

        async fn apply_stdin(&self, _document: &Sensitive) -> fleetwire_cluster::Result<()> {
            Ok(())
        }

        async fn apply_file(&self, _ns: &str, path: &Path) -> fleetwire_cluster::Result<()> {
            let manifest = std::fs::read_to_string(path)?;
            let image = manifest
                .lines()
                .find_map(|l| l.trim().strip_prefix("image: "))
                .unwrap_or_default()
                .to_string();
            let name = path.file_stem().unwrap().to_string_lossy().to_string();
            self.calls.lock().unwrap().push(format!("apply {}", name));
            self.images.lock().unwrap().insert(name, image);
            Ok(())
        }

        async fn set_env(
            &self,
            _ns: &str,
            _deployment: &str,
            _vars: &[(String, String)],
        ) -> fleetwire_cluster::Result<()> {
            Ok(())
        }

        async fn rollout_restart(&self, _ns: &str, deployment: &str) -> fleetwire_cluster::Result<()> {
            let image = self
                .images
                .lock()
                .unwrap()
                .get(deployment)
                .cloned()
                .unwrap_or_default();
            let digest = self.registry.digest(&image);
            self.running
                .lock()
                .unwrap()
                .insert(deployment.to_string(), digest);
            Ok(())
        }

        async fn rollout_status(
            &self,
            _ns: &str,
            _deployment: &str,
            _timeout: Duration,
        ) -> fleetwire_cluster::Result<RolloutState> {
            Ok(RolloutState::Complete)
        }

        async fn node_internal_ip(&self) -> fleetwire_cluster::Result<Option<String>> {
            Ok(Some("10.0.2.9".to_string()))
        }

        async fn service_node_port(
            &self,
            _ns: &str,
            service: &str,
        ) -> fleetwire_cluster::Result<Option<u16>> {
            Ok(match service {
                "order-service" => Some(30080),
                "event-processor" => Some(30800),
                "notification-service" => Some(30900),
                _ => None,
            })
        }
    }

    /// Reports every started service as running
    #[derive(Default)]
    struct FakeExecutor {
        unreachable: Vec<&'static str>,
        scripts: Mutex<Vec<(String, String)>>,
    }

    impl FakeExecutor {
        fn scripts_for(&self, host: &str) -> Vec<String> {
            self.scripts
                .lock()
                .unwrap()
                .iter()
                .filter(|(h, _)| h == host)
                .map(|(_, body)| body.clone())
                .collect()
        }
    }

    #[async_trait]
    impl RemoteExecutor for FakeExecutor {
        async fn execute(
            &self,
            host: &HostAddress,
            script: &RemoteScript,
        ) -> fleetwire_remote::Result<ExecOutput> {
            self.scripts
                .lock()
                .unwrap()
                .push((host.name.clone(), script.body.clone()));
            if self.unreachable.contains(&host.name.as_str()) {
                return Err(RemoteError::RemoteUnreachable {
                    host: host.name.clone(),
                    message: "Connection timed out".to_string(),
                });
            }

            let mut stdout = String::from("@@fleetwire bootstrap ok\n@@fleetwire login ok\n");
            for line in script.body.lines() {
                if let Some(name) = line.trim().strip_prefix("fw_marker started ") {
                    stdout.push_str(&format!("@@fleetwire status {} running\n", name));
                }
            }
            stdout.push_str("@@fleetwire exit 0\n");
            Ok(ExecOutput {
                exit_code: Some(0),
                stdout,
                stderr: String::new(),
            })
        }
    }

    #[derive(Default)]
    struct FakeWebApp {
        settings: Mutex<Vec<(String, String)>>,
        restarts: AtomicUsize,
        /// Raised while the settings are being written
        interrupt: Option<AbortSignal>,
    }

    #[async_trait]
    impl WebAppClient for FakeWebApp {
        async fn set_app_settings(
            &self,
            _rg: &str,
            _app: &str,
            settings: &[(String, String)],
        ) -> std::result::Result<(), WebAppError> {
            *self.settings.lock().unwrap() = settings.to_vec();
            if let Some(ref abort) = self.interrupt {
                abort.raise();
            }
            Ok(())
        }

        async fn restart(&self, _rg: &str, _app: &str) -> std::result::Result<(), WebAppError> {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        _manifests: tempfile::TempDir,
        options: PipelineOptions,
        registry: Arc<FakeRegistry>,
        provisioner: Arc<FakeProvisioner>,
        cluster: Arc<FakeCluster>,
        executor: Arc<FakeExecutor>,
        webapp: Arc<FakeWebApp>,
        state: String,
        image_failure: Option<&'static str>,
    }

    impl Harness {
        fn new() -> Self {
            let manifests = tempfile::tempdir().unwrap();
            for name in ["order-service", "event-processor", "notification-service"] {
                std::fs::write(
                    manifests.path().join(format!("{}.yaml", name)),
                    format!(
                        "kind: Deployment\nspec:\n  containers:\n    - name: {0}\n      image: ${{REGISTRY_LOGIN_SERVER}}/{0}:latest\n",
                        name
                    ),
                )
                .unwrap();
            }
            let options = PipelineOptions {
                manifests_dir: manifests.path().to_path_buf(),
                warmup: Duration::from_secs(0),
                ..Default::default()
            };
            let registry = Arc::new(FakeRegistry::default());
            Self {
                _manifests: manifests,
                options,
                cluster: Arc::new(FakeCluster::new(registry.clone())),
                registry,
                provisioner: Arc::new(FakeProvisioner::default()),
                executor: Arc::new(FakeExecutor::default()),
                webapp: Arc::new(FakeWebApp::default()),
                state: STATE.to_string(),
                image_failure: None,
            }
        }

        fn driver(&self) -> PipelineDriver {
            let executor = self.executor.clone();
            let tools = Collaborators {
                provisioner: self.provisioner.clone(),
                state: Arc::new(StaticState(self.state.clone())),
                images: Some(Arc::new(FakeImages {
                    registry: self.registry.clone(),
                    fail: self.image_failure,
                })),
                cluster: self.cluster.clone(),
                remote: Box::new(move |_outputs: &Outputs| -> Arc<dyn RemoteExecutor> {
                    executor.clone()
                }),
                webapp: self.webapp.clone(),
            };
            PipelineDriver::new(self.options.clone(), tools)
        }
    }

    #[tokio::test]
    async fn test_full_run_wires_cluster_endpoint_into_gateway() {
        let harness = Harness::new();
        let report = harness.driver().run().await;

        assert!(report.succeeded(), "{:?}", report.fatal);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(harness.provisioner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.images.len(), 6);

        let order = report.endpoints.get(ServiceId::OrderService).unwrap();
        assert_eq!(order.base_url, "http://10.0.2.9:30080");

        let gateway_scripts = harness.executor.scripts_for("gateway");
        assert_eq!(gateway_scripts.len(), 1);
        assert!(
            gateway_scripts[0]
                .contains("-e 'Services__OrderService__BaseUrl=http://10.0.2.9:30080'")
        );

        let rewire = report.rewire.as_ref().unwrap();
        let gateway = rewire.consumer(ServiceId::ApiGateway).unwrap();
        assert_eq!(gateway.state, WiringState::Rewired);
        assert_eq!(
            gateway.setting(EnvKey::OrderServiceBaseUrl).unwrap().url,
            "http://10.0.2.9:30080"
        );
        assert!(rewire.redeployments.is_empty());

        let frontend = rewire.consumer(ServiceId::Frontend).unwrap();
        assert_eq!(frontend.state, WiringState::Rewired);
        let settings = harness.webapp.settings.lock().unwrap().clone();
        assert!(settings.contains(&(
            "API_GATEWAY_URL".to_string(),
            "http://20.0.0.1:5000".to_string()
        )));
        assert!(settings.contains(&(
            "INVENTORY_SERVICE_URL".to_string(),
            "http://20.0.0.2:8001".to_string()
        )));
        assert_eq!(harness.webapp.restarts.load(Ordering::SeqCst), 1);
        assert_eq!(report.stage_status(Stage::Rewire), Some(&StageStatus::Completed));
    }

    #[tokio::test]
    async fn test_skip_cluster_falls_back_to_cluster_dns() {
        let mut harness = Harness::new();
        harness.options.skip_cluster = true;
        let report = harness.driver().run().await;

        assert!(report.succeeded());
        assert_eq!(report.stage_status(Stage::Cluster), Some(&StageStatus::Skipped));
        assert!(harness.cluster.calls().is_empty());

        let gateway = report
            .rewire
            .as_ref()
            .unwrap()
            .consumer(ServiceId::ApiGateway)
            .unwrap()
            .clone();
        let order = gateway.setting(EnvKey::OrderServiceBaseUrl).unwrap();
        assert_eq!(order.url, "http://order-service.otel-demo:8080");
        assert_eq!(order.provenance, Provenance::ClusterDns);
    }

    #[tokio::test]
    async fn test_rerun_converges_to_same_endpoints() {
        let harness = Harness::new();
        let first = harness.driver().run().await;
        let second = harness.driver().run().await;

        assert_eq!(first.endpoints, second.endpoints);
        assert_eq!(
            first.rewire.as_ref().unwrap().consumers,
            second.rewire.as_ref().unwrap().consumers
        );
    }

    #[tokio::test]
    async fn test_skipping_earlier_stages_converges() {
        let harness = Harness::new();
        let full = harness.driver().run().await;

        let mut partial = Harness::new();
        partial.options.skip_infra = true;
        partial.options.skip_images = true;
        let rerun = partial.driver().run().await;

        assert_eq!(full.endpoints, rerun.endpoints);
        assert_eq!(partial.provisioner.calls.load(Ordering::SeqCst), 0);
        assert!(rerun.images.is_empty());
    }

    #[tokio::test]
    async fn test_republished_tag_is_picked_up_by_restart() {
        let harness = Harness::new();
        harness.driver().run().await;
        harness.driver().run().await;

        let image = "oteldemo.azurecr.io/order-service:latest";
        assert_eq!(harness.registry.digest(image), 2);
        assert_eq!(
            harness.cluster.running.lock().unwrap().get("order-service"),
            Some(&2)
        );
    }

    #[tokio::test]
    async fn test_not_provisioned_is_fatal() {
        let mut harness = Harness::new();
        harness.state = "{}".to_string();
        let report = harness.driver().run().await;

        assert_eq!(report.exit_code(), 1);
        match &report.fatal {
            Some(PipelineError::StageFailed {
                stage: Stage::Outputs,
                source: StageError::Infra(InfraError::InfrastructureNotProvisioned(_)),
            }) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert!(harness.cluster.calls().is_empty());
        assert!(report.stage_status(Stage::Hosts).is_none());
    }

    #[tokio::test]
    async fn test_build_failure_stops_before_deployment() {
        let mut harness = Harness::new();
        harness.image_failure = Some("payment-service");
        let report = harness.driver().run().await;

        assert!(matches!(
            report.fatal,
            Some(PipelineError::StageFailed {
                stage: Stage::Images,
                ..
            })
        ));
        assert!(harness.cluster.calls().is_empty());
        assert!(harness.executor.scripts_for("gateway").is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_best_effort() {
        let mut harness = Harness::new();
        harness.executor = Arc::new(FakeExecutor {
            unreachable: vec!["inventory"],
            ..Default::default()
        });
        let report = harness.driver().run().await;

        assert_eq!(report.exit_code(), 0);
        assert!(matches!(
            report.stage_status(Stage::Hosts),
            Some(StageStatus::CompletedWithErrors(_))
        ));
        let inventory = report
            .results
            .iter()
            .find(|r| r.target == TargetRef::Host("inventory".into()))
            .unwrap();
        assert!(inventory.target_error.is_some());

        // the frontend still gets the VM address from the outputs
        let frontend = report
            .rewire
            .as_ref()
            .unwrap()
            .consumer(ServiceId::Frontend)
            .unwrap()
            .clone();
        assert_eq!(
            frontend.setting(EnvKey::InventoryServiceUrl).unwrap().url,
            "http://20.0.0.2:8001"
        );
    }

    #[tokio::test]
    async fn test_skip_hosts_redeploys_gateway_on_rewire() {
        let mut harness = Harness::new();
        harness.options.skip_hosts = true;
        let report = harness.driver().run().await;

        let scripts = harness.executor.scripts_for("gateway");
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].contains("fw_marker started api-gateway"));
        assert!(!scripts[0].contains("fw_marker started payment-service"));

        let rewire = report.rewire.as_ref().unwrap();
        assert_eq!(rewire.redeployments.len(), 1);
        assert_eq!(
            rewire.consumer(ServiceId::ApiGateway).unwrap().state,
            WiringState::Rewired
        );
    }

    #[tokio::test]
    async fn test_skip_notification_service_everywhere() {
        let mut harness = Harness::new();
        harness.options.skip_notification_service = true;
        let report = harness.driver().run().await;

        assert!(
            !harness
                .cluster
                .calls()
                .contains(&"apply notification-service".to_string())
        );
        assert!(report.endpoints.get(ServiceId::NotificationService).is_none());
        let gateway = report
            .rewire
            .as_ref()
            .unwrap()
            .consumer(ServiceId::ApiGateway)
            .unwrap()
            .clone();
        assert!(gateway.setting(EnvKey::NotificationServiceBaseUrl).is_none());
        assert_eq!(gateway.state, WiringState::Rewired);
    }

    #[tokio::test]
    async fn test_skip_frontend_leaves_web_app_alone() {
        let mut harness = Harness::new();
        harness.options.skip_frontend = true;
        let report = harness.driver().run().await;

        assert_eq!(harness.webapp.restarts.load(Ordering::SeqCst), 0);
        assert_eq!(report.stage_status(Stage::Rewire), Some(&StageStatus::Completed));
    }

    #[tokio::test]
    async fn test_abort_stops_before_next_stage() {
        let harness = Harness::new();
        let abort = AbortSignal::new();
        abort.raise();
        let report = harness.driver().with_abort(abort).run().await;

        assert!(report.aborted);
        assert_ne!(report.exit_code(), 0);
        assert_eq!(harness.provisioner.calls.load(Ordering::SeqCst), 0);
        assert!(
            report
                .stages
                .iter()
                .all(|(_, status)| *status == StageStatus::Aborted)
        );
    }

    #[tokio::test]
    async fn test_abort_during_rewire_marks_run_aborted() {
        let mut harness = Harness::new();
        let abort = AbortSignal::new();
        harness.webapp = Arc::new(FakeWebApp {
            interrupt: Some(abort.clone()),
            ..Default::default()
        });
        let report = harness.driver().with_abort(abort).run().await;

        assert!(report.aborted);
        assert_eq!(report.exit_code(), 130);
        assert!(!harness.webapp.settings.lock().unwrap().is_empty());
        assert_eq!(harness.webapp.restarts.load(Ordering::SeqCst), 0);

        let frontend = report
            .rewire
            .as_ref()
            .unwrap()
            .consumer(ServiceId::Frontend)
            .unwrap();
        assert!(!frontend.pushed);
        assert_eq!(frontend.note.as_deref(), Some("aborted before restart"));
    }

    #[test]
    fn test_plan_lists_targets() {
        let mut harness = Harness::new();
        harness.options.skip_images = true;
        harness.options.skip_notification_service = true;
        let plan = harness.driver().plan();

        assert!(plan.stages.contains(&(Stage::Images, false)));
        assert!(plan.stages.contains(&(Stage::Outputs, true)));
        assert!(plan.services.contains(&(
            ServiceId::OrderService,
            TargetRef::Namespace("otel-demo".into())
        )));
        assert!(plan.services.contains(&(
            ServiceId::InventoryService,
            TargetRef::Host("inventory".into())
        )));
        assert!(
            plan.services
                .iter()
                .all(|(s, _)| *s != ServiceId::NotificationService)
        );
    }
}
