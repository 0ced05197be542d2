//! デプロイ結果

use crate::catalogue::ServiceId;
use std::sync::{Arc, Mutex};

/// デプロイ対象
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRef {
    /// VM名
    Host(String),
    /// クラスタのnamespace
    Namespace(String),
    /// マネージドWebアプリ名
    WebApp(String),
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetRef::Host(name) => write!(f, "host/{}", name),
            TargetRef::Namespace(ns) => write!(f, "cluster/{}", ns),
            TargetRef::WebApp(name) => write!(f, "webapp/{}", name),
        }
    }
}

/// サービスごとの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Succeeded,
    /// 警告付きで完了（ロールアウトのタイムアウトなど）
    Degraded(String),
    Failed(String),
}

impl OutcomeStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, OutcomeStatus::Failed(_))
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, OutcomeStatus::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOutcome {
    pub service: ServiceId,
    pub status: OutcomeStatus,
    /// コンテナログやロールアウト状況など
    pub diagnostics: Vec<String>,
}

impl ServiceOutcome {
    pub fn succeeded(service: ServiceId) -> Self {
        Self {
            service,
            status: OutcomeStatus::Succeeded,
            diagnostics: Vec::new(),
        }
    }

    pub fn degraded(service: ServiceId, reason: impl Into<String>) -> Self {
        Self {
            service,
            status: OutcomeStatus::Degraded(reason.into()),
            diagnostics: Vec::new(),
        }
    }

    pub fn failed(service: ServiceId, reason: impl Into<String>) -> Self {
        Self {
            service,
            status: OutcomeStatus::Failed(reason.into()),
            diagnostics: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, lines: Vec<String>) -> Self {
        self.diagnostics = lines;
        self
    }
}

/// ターゲットごとのデプロイ結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentResult {
    pub target: TargetRef,
    pub outcomes: Vec<ServiceOutcome>,
    /// ターゲット全体のエラー（ホスト到達不可、レジストリログイン失敗など）
    pub target_error: Option<String>,
    /// 失敗ではない補足（未構築のためスキップ、など）
    pub note: Option<String>,
}

impl DeploymentResult {
    pub fn new(target: TargetRef) -> Self {
        Self {
            target,
            outcomes: Vec::new(),
            target_error: None,
            note: None,
        }
    }

    pub fn push(&mut self, outcome: ServiceOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcome(&self, service: ServiceId) -> Option<&ServiceOutcome> {
        self.outcomes.iter().find(|o| o.service == service)
    }

    /// ターゲットエラーまたは失敗したサービスがあるか
    pub fn has_failures(&self) -> bool {
        self.target_error.is_some() || self.outcomes.iter().any(|o| o.status.is_failed())
    }
}

/// 並行追記可能な結果ログ
#[derive(Debug, Clone, Default)]
pub struct ResultLog(Arc<Mutex<Vec<DeploymentResult>>>);

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: DeploymentResult) {
        // ロック中にパニックしても記録済みの結果は残す
        let mut guard = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(result);
    }

    pub fn snapshot(&self) -> Vec<DeploymentResult> {
        match self.0.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
