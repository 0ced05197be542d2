//! サービスカタログ
//!
//! デプロイ対象のサービス一覧は固定です。各サービスのポート、配置先、
//! 受け付ける環境変数はここで宣言し、実行ごとに [`build_specs`] で
//! [`ServiceSpec`] を組み立てます。

use crate::error::Result;
use crate::model::{
    EnvKey, EnvValue, Outputs, PortBinding, Sensitive, ServiceSpec, TargetKind,
};
use std::path::PathBuf;

/// OTLPエンドポイントが出力値にない場合の既定値
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Event Hub名の既定値
pub const DEFAULT_EVENT_HUB_NAME: &str = "orders";

/// ゲートウェイとペイメントサービスが同居するVM
pub const GATEWAY_HOST: &str = "gateway";

/// インベントリサービスのVM
pub const INVENTORY_HOST: &str = "inventory";

/// サービス識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceId {
    OrderService,
    PaymentService,
    InventoryService,
    EventProcessor,
    NotificationService,
    ApiGateway,
    Frontend,
}

/// 配置先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Cluster,
    Host(&'static str),
    /// マネージドWebアプリ（VNet外）
    WebApp,
}

const TELEMETRY: [EnvKey; 5] = [
    EnvKey::OtlpEndpoint,
    EnvKey::ServiceName,
    EnvKey::ApplicationInsightsConnectionString,
    EnvKey::Environment,
    EnvKey::Port,
];

impl ServiceId {
    pub const ALL: [ServiceId; 7] = [
        ServiceId::OrderService,
        ServiceId::PaymentService,
        ServiceId::InventoryService,
        ServiceId::EventProcessor,
        ServiceId::NotificationService,
        ServiceId::ApiGateway,
        ServiceId::Frontend,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            ServiceId::OrderService => "order-service",
            ServiceId::PaymentService => "payment-service",
            ServiceId::InventoryService => "inventory-service",
            ServiceId::EventProcessor => "event-processor",
            ServiceId::NotificationService => "notification-service",
            ServiceId::ApiGateway => "api-gateway",
            ServiceId::Frontend => "frontend",
        }
    }

    /// 待ち受けポート（フロントエンドはWebアプリのため None）
    pub const fn port(self) -> Option<u16> {
        match self {
            ServiceId::OrderService => Some(8080),
            ServiceId::PaymentService => Some(3000),
            ServiceId::InventoryService => Some(8001),
            ServiceId::EventProcessor => Some(8000),
            ServiceId::NotificationService => Some(9000),
            ServiceId::ApiGateway => Some(5000),
            ServiceId::Frontend => None,
        }
    }

    pub const fn placement(self) -> Placement {
        match self {
            ServiceId::OrderService | ServiceId::EventProcessor | ServiceId::NotificationService => {
                Placement::Cluster
            }
            ServiceId::ApiGateway | ServiceId::PaymentService => Placement::Host(GATEWAY_HOST),
            ServiceId::InventoryService => Placement::Host(INVENTORY_HOST),
            ServiceId::Frontend => Placement::WebApp,
        }
    }

    /// ホストネットワークで動かすか
    pub const fn host_network(self) -> bool {
        matches!(self, ServiceId::ApiGateway)
    }

    /// ターゲット種別（Webアプリは None）
    pub const fn target_kind(self) -> Option<TargetKind> {
        match self.placement() {
            Placement::Cluster => Some(TargetKind::Cluster),
            Placement::Host(_) => Some(TargetKind::RemoteHost),
            Placement::WebApp => None,
        }
    }

    /// VNet外から呼び出すコンシューマーか
    pub const fn is_external(self) -> bool {
        matches!(self.placement(), Placement::WebApp)
    }

    /// サービスが受け付ける環境変数
    pub fn recognized_env(self) -> Vec<EnvKey> {
        let specific: &[EnvKey] = match self {
            ServiceId::OrderService => &[
                EnvKey::EventHubConnectionString,
                EnvKey::EventHubName,
                EnvKey::DatabaseUrl,
            ],
            ServiceId::PaymentService => &[EnvKey::RedisUrl],
            ServiceId::InventoryService => &[EnvKey::DatabaseUrl],
            ServiceId::EventProcessor => &[
                EnvKey::EventHubConnectionString,
                EnvKey::EventHubName,
                EnvKey::CosmosEndpoint,
                EnvKey::CosmosKey,
                EnvKey::RedisUrl,
            ],
            ServiceId::NotificationService => &[
                EnvKey::EventHubConnectionString,
                EnvKey::EventHubName,
                EnvKey::RedisUrl,
                EnvKey::DatabaseUrl,
            ],
            ServiceId::ApiGateway => &[
                EnvKey::OrderServiceBaseUrl,
                EnvKey::PaymentServiceBaseUrl,
                EnvKey::EventProcessorBaseUrl,
                EnvKey::NotificationServiceBaseUrl,
            ],
            // Webアプリ側の設定はリワイヤリングでのみ書き込む
            ServiceId::Frontend => {
                return vec![EnvKey::ApiGatewayUrl, EnvKey::InventoryServiceUrl];
            }
        };
        TELEMETRY.iter().chain(specific).copied().collect()
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// [`build_specs`] のオプション
#[derive(Debug, Clone)]
pub struct CatalogueOptions {
    pub tag: String,
    pub namespace: String,
    pub services_dir: PathBuf,
    pub manifests_dir: PathBuf,
    pub environment: String,
    /// 全ステージから除外するサービス
    pub exclude: Vec<ServiceId>,
}

impl Default for CatalogueOptions {
    fn default() -> Self {
        Self {
            tag: "latest".to_string(),
            namespace: "otel-demo".to_string(),
            services_dir: PathBuf::from("services"),
            manifests_dir: PathBuf::from("k8s"),
            environment: "demo".to_string(),
            exclude: Vec::new(),
        }
    }
}

/// 出力値から得られる秘匿環境変数
///
/// クラスタでは共有Secretとして、VMではスクリプト引数として渡されます。
pub fn secret_env(outputs: &Outputs) -> Vec<(EnvKey, Sensitive)> {
    let mut entries = Vec::new();
    let stores = [
        ("event_hub", EnvKey::EventHubConnectionString),
        ("redis", EnvKey::RedisUrl),
        ("postgres", EnvKey::DatabaseUrl),
        ("application_insights", EnvKey::ApplicationInsightsConnectionString),
    ];
    for (store, key) in stores {
        if let Some(value) = outputs.connection_string(store) {
            entries.push((key, value.clone()));
        }
    }
    if let Some(key) = outputs.secret("cosmos_key") {
        entries.push((EnvKey::CosmosKey, key.clone()));
    }
    entries
}

/// イメージ参照を組み立て
pub fn image_reference(outputs: &Outputs, service: ServiceId, tag: &str) -> String {
    match outputs.registry() {
        Some(registry) => format!("{}/{}:{}", registry.login_server, service.name(), tag),
        None => format!("{}:{}", service.name(), tag),
    }
}

/// カタログと出力値からデプロイ対象の [`ServiceSpec`] を組み立て
///
/// Webアプリ配置のサービスと除外指定されたサービスは含みません。
pub fn build_specs(outputs: &Outputs, options: &CatalogueOptions) -> Result<Vec<ServiceSpec>> {
    let otlp = outputs.otlp_endpoint().unwrap_or(DEFAULT_OTLP_ENDPOINT);
    let event_hub_name = outputs
        .value("event_hub_name")
        .unwrap_or(DEFAULT_EVENT_HUB_NAME);
    let secrets = secret_env(outputs);

    let mut specs = Vec::new();
    for id in ServiceId::ALL {
        if options.exclude.contains(&id) {
            continue;
        }
        let Some(target) = id.target_kind() else {
            continue;
        };

        let mut spec = ServiceSpec::new(id, image_reference(outputs, id, &options.tag), target);
        spec.source_dir = options.services_dir.join(id.name());
        spec.host_network = id.host_network();

        spec.set_plain(EnvKey::OtlpEndpoint, otlp)?;
        spec.set_plain(EnvKey::ServiceName, id.name())?;
        spec.set_plain(EnvKey::Environment, options.environment.as_str())?;

        let recognized = id.recognized_env();
        if recognized.contains(&EnvKey::EventHubName) {
            spec.set_plain(EnvKey::EventHubName, event_hub_name)?;
        }
        if recognized.contains(&EnvKey::CosmosEndpoint)
            && let Some(endpoint) = outputs.value("cosmos_endpoint")
        {
            spec.set_plain(EnvKey::CosmosEndpoint, endpoint)?;
        }

        if let Some(port) = id.port() {
            spec.set_plain(EnvKey::Port, port.to_string())?;
            if !spec.host_network {
                spec.ports.push(PortBinding::same(port));
            }
        }

        match id.placement() {
            Placement::Cluster => {
                spec.manifest = Some(options.manifests_dir.join(format!("{}.yaml", id.name())));
            }
            Placement::Host(host) => {
                spec.host = Some(host.to_string());
                // クラスタ側は共有Secret経由で受け取る
                for (key, value) in &secrets {
                    if recognized.contains(key) {
                        spec.set_env(*key, EnvValue::Secret(value.clone()))?;
                    }
                }
            }
            Placement::WebApp => {}
        }

        specs.push(spec);
    }

    Ok(specs)
}
