//! 秘匿値
//!
//! 認証情報や接続文字列はプロセスメモリ上にのみ保持し、
//! `Debug` / `Display` では常に伏せ字で表示します。

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

/// 秘匿値（クローン可能、表示時は伏せ字）
#[derive(Clone)]
pub struct Sensitive(Arc<SecretString>);

impl Sensitive {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::from(value.into())))
    }

    /// 値を取り出す（ファイルやログに書き出さないこと）
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl std::fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sensitive([REDACTED])")
    }
}

impl std::fmt::Display for Sensitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("********")
    }
}

impl From<String> for Sensitive {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Sensitive {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl PartialEq for Sensitive {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}
