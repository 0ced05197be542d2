//! インフラ出力値スナップショット
//!
//! インフラのプロビジョニング結果から一度だけ作られ、以降のステージでは
//! 読み取り専用で参照されます。後段で精緻化された値（NodePortなど）は
//! [`crate::EndpointMap`] 側に積み上げ、ここは書き換えません。

use super::sensitive::Sensitive;
use std::collections::BTreeMap;

/// レジストリの管理者認証情報
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: Sensitive,
}

/// コンテナレジストリ
#[derive(Debug, Clone, PartialEq)]
pub struct Registry {
    /// ログインサーバー（例: myregistry.azurecr.io）
    pub login_server: String,
    /// 管理者認証情報（無効化されている場合は None）
    pub credentials: Option<RegistryCredentials>,
}

/// デプロイ先VMのアドレス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    /// VM名（カタログの配置先と対応）
    pub name: String,
    pub public_ip: Option<String>,
    pub private_ip: String,
}

impl HostAddress {
    /// オーケストレーター（VNet外）から接続するときのアドレス
    pub fn reachable_ip(&self) -> &str {
        self.public_ip.as_deref().unwrap_or(&self.private_ip)
    }
}

/// インフラ出力値
#[derive(Debug, Clone)]
pub struct Outputs {
    resource_group: String,
    registry: Option<Registry>,
    cluster_name: Option<String>,
    connection_strings: BTreeMap<String, Sensitive>,
    secrets: BTreeMap<String, Sensitive>,
    values: BTreeMap<String, String>,
    hosts: Vec<HostAddress>,
}

impl Outputs {
    pub fn builder(resource_group: impl Into<String>) -> OutputsBuilder {
        OutputsBuilder {
            outputs: Outputs {
                resource_group: resource_group.into(),
                registry: None,
                cluster_name: None,
                connection_strings: BTreeMap::new(),
                secrets: BTreeMap::new(),
                values: BTreeMap::new(),
                hosts: Vec::new(),
            },
        }
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn registry(&self) -> Option<&Registry> {
        self.registry.as_ref()
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    /// ストア名（`event_hub`, `redis` など）で接続文字列を取得
    pub fn connection_string(&self, store: &str) -> Option<&Sensitive> {
        self.connection_strings.get(store)
    }

    pub fn connection_strings(&self) -> impl Iterator<Item = (&str, &Sensitive)> {
        self.connection_strings.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 接続文字列以外の秘匿値（`cosmos_key` など）
    pub fn secret(&self, key: &str) -> Option<&Sensitive> {
        self.secrets.get(key)
    }

    pub fn secrets(&self) -> impl Iterator<Item = (&str, &Sensitive)> {
        self.secrets.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 秘匿でない任意の出力値
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn hosts(&self) -> &[HostAddress] {
        &self.hosts
    }

    pub fn host(&self, name: &str) -> Option<&HostAddress> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn frontend_app_name(&self) -> Option<&str> {
        self.value("frontend_app_name")
    }

    pub fn otlp_endpoint(&self) -> Option<&str> {
        self.value("otlp_endpoint")
    }
}

/// [`Outputs`] のビルダー
///
/// `build()` 以降は変更できません。
pub struct OutputsBuilder {
    outputs: Outputs,
}

impl OutputsBuilder {
    pub fn registry(mut self, registry: Registry) -> Self {
        self.outputs.registry = Some(registry);
        self
    }

    pub fn cluster(mut self, name: impl Into<String>) -> Self {
        self.outputs.cluster_name = Some(name.into());
        self
    }

    pub fn connection_string(mut self, store: impl Into<String>, value: Sensitive) -> Self {
        self.outputs.connection_strings.insert(store.into(), value);
        self
    }

    pub fn secret(mut self, key: impl Into<String>, value: Sensitive) -> Self {
        self.outputs.secrets.insert(key.into(), value);
        self
    }

    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.values.insert(key.into(), value.into());
        self
    }

    /// 同名のホストがあれば置き換え
    pub fn host(mut self, host: HostAddress) -> Self {
        self.outputs.hosts.retain(|h| h.name != host.name);
        self.outputs.hosts.push(host);
        self
    }

    pub fn build(mut self) -> Outputs {
        self.outputs.hosts.sort_by(|a, b| a.name.cmp(&b.name));
        self.outputs
    }
}
