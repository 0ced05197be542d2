//! 解決済みエンドポイント
//!
//! 各ステージが解決したサービスのベースURLを [`EndpointMap`] に積み上げます。
//! 実行時に解決された値は、後から来たより弱い出自の値で上書きされません。

use crate::catalogue::ServiceId;
use std::collections::BTreeMap;

/// エンドポイントの出自
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// インフラ出力値に明示されたURL
    ExplicitOutput,
    /// 実行時に発見したアドレス + ポート（ノードIP + NodePort、VMのプライベートIPなど）
    DiscoveredAddress,
    /// 同一ホスト上の `http://localhost:<port>`
    Loopback,
    /// クラスタ内DNS `http://<svc>.<ns>:<port>`
    ClusterDns,
}

impl Provenance {
    /// 優先度（大きいほど強い）
    pub const fn strength(self) -> u8 {
        match self {
            Provenance::ExplicitOutput | Provenance::DiscoveredAddress => 3,
            Provenance::Loopback => 2,
            Provenance::ClusterDns => 1,
        }
    }

    /// 実行時に解決された値か
    pub const fn is_runtime(self) -> bool {
        !matches!(self, Provenance::ClusterDns)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::ExplicitOutput => "output",
            Provenance::DiscoveredAddress => "discovered",
            Provenance::Loopback => "loopback",
            Provenance::ClusterDns => "cluster-dns",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解決済みエンドポイント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub service: ServiceId,
    pub base_url: String,
    /// VNet外のコンシューマー向けURL（VMのパブリックIPなど）
    pub public_url: Option<String>,
    pub provenance: Provenance,
}

impl ResolvedEndpoint {
    pub fn new(service: ServiceId, base_url: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            service,
            base_url: base_url.into(),
            public_url: None,
            provenance,
        }
    }

    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    /// コンシューマーの位置に応じたURL
    pub fn url_for(&self, external: bool) -> &str {
        if external {
            self.public_url.as_deref().unwrap_or(&self.base_url)
        } else {
            &self.base_url
        }
    }

    /// クラスタ内DNS名からエンドポイントを作成
    pub fn cluster_dns(service: ServiceId, namespace: &str, port: u16) -> Self {
        Self::new(
            service,
            format!("http://{}.{}:{}", service.name(), namespace, port),
            Provenance::ClusterDns,
        )
    }
}

/// エンドポイントの集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointMap {
    entries: BTreeMap<ServiceId, ResolvedEndpoint>,
}

impl EndpointMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// エンドポイントを提示する
    ///
    /// 既存エントリより厳密に強い出自の場合のみ置き換え、採用されたら true
    pub fn offer(&mut self, endpoint: ResolvedEndpoint) -> bool {
        match self.entries.get(&endpoint.service) {
            Some(existing)
                if existing.provenance.strength() >= endpoint.provenance.strength() =>
            {
                tracing::debug!(
                    service = endpoint.service.name(),
                    kept = %existing.provenance,
                    ignored = %endpoint.provenance,
                    "Keeping existing endpoint"
                );
                false
            }
            _ => {
                self.entries.insert(endpoint.service, endpoint);
                true
            }
        }
    }

    /// 別のマップの全エントリを提示する
    pub fn merge(&mut self, other: EndpointMap) {
        for endpoint in other.entries.into_values() {
            self.offer(endpoint);
        }
    }

    pub fn get(&self, service: ServiceId) -> Option<&ResolvedEndpoint> {
        self.entries.get(&service)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedEndpoint> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<ResolvedEndpoint> for EndpointMap {
    fn from_iter<T: IntoIterator<Item = ResolvedEndpoint>>(iter: T) -> Self {
        let mut map = EndpointMap::new();
        for endpoint in iter {
            map.offer(endpoint);
        }
        map
    }
}
