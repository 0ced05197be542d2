//! 環境変数定義
//!
//! デプロイ済みサービスへの唯一の設定経路です。
//! キーは [`EnvKey`] に列挙されたものだけを扱い、サービスごとに
//! 受け付けるキーはカタログ（[`crate::ServiceId::recognized_env`]）で決まります。

use super::sensitive::Sensitive;
use std::collections::BTreeMap;

/// 認識される環境変数キー
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnvKey {
    // テレメトリ
    OtlpEndpoint,
    ServiceName,
    ApplicationInsightsConnectionString,
    // ランタイム
    Environment,
    Port,
    // データストア
    EventHubConnectionString,
    EventHubName,
    CosmosEndpoint,
    CosmosKey,
    RedisUrl,
    DatabaseUrl,
    // ゲートウェイの下流サービス
    OrderServiceBaseUrl,
    PaymentServiceBaseUrl,
    EventProcessorBaseUrl,
    NotificationServiceBaseUrl,
    // フロントエンド
    ApiGatewayUrl,
    InventoryServiceUrl,
}

impl EnvKey {
    pub const ALL: [EnvKey; 17] = [
        EnvKey::OtlpEndpoint,
        EnvKey::ServiceName,
        EnvKey::ApplicationInsightsConnectionString,
        EnvKey::Environment,
        EnvKey::Port,
        EnvKey::EventHubConnectionString,
        EnvKey::EventHubName,
        EnvKey::CosmosEndpoint,
        EnvKey::CosmosKey,
        EnvKey::RedisUrl,
        EnvKey::DatabaseUrl,
        EnvKey::OrderServiceBaseUrl,
        EnvKey::PaymentServiceBaseUrl,
        EnvKey::EventProcessorBaseUrl,
        EnvKey::NotificationServiceBaseUrl,
        EnvKey::ApiGatewayUrl,
        EnvKey::InventoryServiceUrl,
    ];

    /// コンテナに渡す環境変数名
    ///
    /// ゲートウェイの階層キーは `__` 区切り（`Services__OrderService__BaseUrl`）
    pub const fn env_name(self) -> &'static str {
        match self {
            EnvKey::OtlpEndpoint => "OTEL_EXPORTER_OTLP_ENDPOINT",
            EnvKey::ServiceName => "OTEL_SERVICE_NAME",
            EnvKey::ApplicationInsightsConnectionString => "APPLICATIONINSIGHTS_CONNECTION_STRING",
            EnvKey::Environment => "ENVIRONMENT",
            EnvKey::Port => "PORT",
            EnvKey::EventHubConnectionString => "EVENT_HUB_CONNECTION_STRING",
            EnvKey::EventHubName => "EVENT_HUB_NAME",
            EnvKey::CosmosEndpoint => "COSMOS_ENDPOINT",
            EnvKey::CosmosKey => "COSMOS_KEY",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::OrderServiceBaseUrl => "Services__OrderService__BaseUrl",
            EnvKey::PaymentServiceBaseUrl => "Services__PaymentService__BaseUrl",
            EnvKey::EventProcessorBaseUrl => "Services__EventProcessor__BaseUrl",
            EnvKey::NotificationServiceBaseUrl => "Services__NotificationService__BaseUrl",
            EnvKey::ApiGatewayUrl => "API_GATEWAY_URL",
            EnvKey::InventoryServiceUrl => "INVENTORY_SERVICE_URL",
        }
    }

    /// アプリケーション設定上のキー（`Services.OrderService.BaseUrl` など）
    pub fn config_key(self) -> String {
        self.env_name().replace("__", ".")
    }

    /// 値が秘匿情報かどうか
    pub const fn is_secret(self) -> bool {
        matches!(
            self,
            EnvKey::ApplicationInsightsConnectionString
                | EnvKey::EventHubConnectionString
                | EnvKey::CosmosKey
                | EnvKey::RedisUrl
                | EnvKey::DatabaseUrl
        )
    }

    /// 環境変数名または設定キーからパース
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.replace('.', "__");
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.env_name() == normalized)
    }
}

impl std::fmt::Display for EnvKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.env_name())
    }
}

/// 環境変数の値
#[derive(Debug, Clone, PartialEq)]
pub enum EnvValue {
    Plain(String),
    Secret(Sensitive),
}

impl EnvValue {
    pub fn is_secret(&self) -> bool {
        matches!(self, EnvValue::Secret(_))
    }

    /// 値を取り出す（秘匿値の場合はログに出さないこと）
    pub fn expose(&self) -> &str {
        match self {
            EnvValue::Plain(v) => v,
            EnvValue::Secret(s) => s.expose(),
        }
    }
}

/// 型付き環境変数マップ
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvMap {
    entries: BTreeMap<EnvKey, EnvValue>,
}

impl EnvMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: EnvKey, value: EnvValue) -> Option<EnvValue> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: EnvKey) -> Option<&EnvValue> {
        self.entries.get(&key)
    }

    pub fn remove(&mut self, key: EnvKey) -> Option<EnvValue> {
        self.entries.remove(&key)
    }

    pub fn contains(&self, key: EnvKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EnvKey, &EnvValue)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// 秘匿でないエントリ
    pub fn plain(&self) -> impl Iterator<Item = (EnvKey, &str)> {
        self.entries.iter().filter_map(|(k, v)| match v {
            EnvValue::Plain(s) => Some((*k, s.as_str())),
            EnvValue::Secret(_) => None,
        })
    }

    /// 秘匿エントリ
    pub fn secrets(&self) -> impl Iterator<Item = (EnvKey, &Sensitive)> {
        self.entries.iter().filter_map(|(k, v)| match v {
            EnvValue::Secret(s) => Some((*k, s)),
            EnvValue::Plain(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_key_uses_dots() {
        assert_eq!(
            EnvKey::OrderServiceBaseUrl.config_key(),
            "Services.OrderService.BaseUrl"
        );
        assert_eq!(EnvKey::OtlpEndpoint.config_key(), "OTEL_EXPORTER_OTLP_ENDPOINT");
    }

    #[test]
    fn test_parse_accepts_both_forms() {
        assert_eq!(
            EnvKey::parse("Services.PaymentService.BaseUrl"),
            Some(EnvKey::PaymentServiceBaseUrl)
        );
        assert_eq!(
            EnvKey::parse("Services__PaymentService__BaseUrl"),
            Some(EnvKey::PaymentServiceBaseUrl)
        );
        assert_eq!(EnvKey::parse("REDIS_URL"), Some(EnvKey::RedisUrl));
        assert_eq!(EnvKey::parse("NOT_A_KEY"), None);
    }

    #[test]
    fn test_plain_and_secret_partition() {
        let mut env = EnvMap::new();
        env.insert(EnvKey::Port, EnvValue::Plain("8080".to_string()));
        env.insert(
            EnvKey::RedisUrl,
            EnvValue::Secret(Sensitive::new("redis://:pw@cache:6380")),
        );

        let plain: Vec<_> = env.plain().collect();
        assert_eq!(plain, vec![(EnvKey::Port, "8080")]);

        let secrets: Vec<_> = env.secrets().map(|(k, _)| k).collect();
        assert_eq!(secrets, vec![EnvKey::RedisUrl]);
    }
}
