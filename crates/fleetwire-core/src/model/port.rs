//! ポート定義

use serde::{Deserialize, Serialize};

/// ポートバインディング（ホスト側 → コンテナ側）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host: u16,
    pub container: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortBinding {
    /// ホストとコンテナで同じ番号を使うバインディング
    pub fn same(port: u16) -> Self {
        Self {
            host: port,
            container: port,
            protocol: Protocol::Tcp,
        }
    }

    /// `docker run -p` に渡す形式に変換
    pub fn to_publish_arg(&self) -> String {
        match self.protocol {
            Protocol::Tcp => format!("{}:{}", self.host, self.container),
            Protocol::Udp => format!("{}:{}/udp", self.host, self.container),
        }
    }
}

/// プロトコル種別
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// 文字列からProtocolをパース
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "udp" => Protocol::Udp,
            _ => Protocol::Tcp,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}
