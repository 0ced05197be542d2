//! サービス定義

use super::env::{EnvKey, EnvMap, EnvValue};
use super::port::PortBinding;
use crate::catalogue::ServiceId;
use crate::error::{CoreError, Result};
use std::path::PathBuf;

/// デプロイ先の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// VMへのリモートシェル実行
    RemoteHost,
    /// クラスタへのマニフェスト適用
    Cluster,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::RemoteHost => "remote-host",
            TargetKind::Cluster => "cluster",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// デプロイ単位の宣言
///
/// 実行のたびにカタログから組み立て直され、永続化はされません。
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub id: ServiceId,
    /// イメージ参照（`<login_server>/<name>:<tag>`）
    pub image: String,
    pub target: TargetKind,
    env: EnvMap,
    pub ports: Vec<PortBinding>,
    pub host_network: bool,
    /// VMターゲットの配置先ホスト名
    pub host: Option<String>,
    /// クラスタターゲットのマニフェストパス
    pub manifest: Option<PathBuf>,
    /// Dockerfile を含むソースディレクトリ
    pub source_dir: PathBuf,
}

impl ServiceSpec {
    pub fn new(id: ServiceId, image: impl Into<String>, target: TargetKind) -> Self {
        Self {
            id,
            image: image.into(),
            target,
            env: EnvMap::new(),
            ports: Vec::new(),
            host_network: false,
            host: None,
            manifest: None,
            source_dir: PathBuf::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    pub fn env(&self) -> &EnvMap {
        &self.env
    }

    /// 環境変数を設定
    ///
    /// サービスが受け付けないキーはエラー
    pub fn set_env(&mut self, key: EnvKey, value: EnvValue) -> Result<()> {
        if !self.id.recognized_env().contains(&key) {
            return Err(CoreError::UnrecognizedEnvKey {
                service: self.name().to_string(),
                key: key.env_name(),
            });
        }
        self.env.insert(key, value);
        Ok(())
    }

    pub fn set_plain(&mut self, key: EnvKey, value: impl Into<String>) -> Result<()> {
        self.set_env(key, EnvValue::Plain(value.into()))
    }

    /// コンテナが待ち受けるポート（最初のバインディング、なければカタログ既定値）
    pub fn port(&self) -> Option<u16> {
        self.ports
            .first()
            .map(|p| p.container)
            .or_else(|| self.id.port())
    }
}
