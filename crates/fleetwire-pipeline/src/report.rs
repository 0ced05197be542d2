//! Run report
//!
//! Collected while the pipeline runs and printed once at the end: resource
//! group, registry, every target with its per-service outcome, every
//! resolved endpoint and the unresolved consumer settings.

use crate::error::PipelineError;
use crate::rewire::{RewireResult, WiringState};
use crate::stage::{Stage, StageStatus};
use chrono::{DateTime, Local};
use colored::Colorize;
use fleetwire_build::ImageReference;
use fleetwire_core::{DeploymentResult, EndpointMap, OutcomeStatus};

#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub stages: Vec<(Stage, StageStatus)>,
    pub resource_group: Option<String>,
    pub registry: Option<String>,
    pub images: Vec<ImageReference>,
    pub results: Vec<DeploymentResult>,
    pub endpoints: EndpointMap,
    pub rewire: Option<RewireResult>,
    /// The fatal error that stopped the run
    pub fatal: Option<PipelineError>,
    pub aborted: bool,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            started_at: Local::now(),
            finished_at: None,
            stages: Vec::new(),
            resource_group: None,
            registry: None,
            images: Vec::new(),
            results: Vec::new(),
            endpoints: EndpointMap::new(),
            rewire: None,
            fatal: None,
            aborted: false,
        }
    }

    pub fn record(&mut self, stage: Stage, status: StageStatus) {
        match &status {
            StageStatus::Skipped => tracing::info!("Stage {} skipped", stage),
            StageStatus::Failed(e) => tracing::error!("Stage {} failed: {}", stage, e),
            StageStatus::CompletedWithErrors(e) => {
                tracing::warn!("Stage {} completed with errors: {}", stage, e)
            }
            _ => tracing::info!("Stage {} {:?}", stage, status),
        }
        self.stages.push((stage, status));
    }

    pub fn stage_status(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, status)| status)
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Local::now());
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Local::now) - self.started_at
    }

    /// No fatal stage failed and the run was not aborted
    pub fn succeeded(&self) -> bool {
        self.fatal.is_none() && !self.aborted
    }

    pub fn exit_code(&self) -> i32 {
        match (&self.fatal, self.aborted) {
            (_, true) => 130,
            (Some(_), false) => 1,
            (None, false) => 0,
        }
    }

    /// Print the summary to stdout
    pub fn print(&self) {
        println!();
        println!("{}", "━━━ デプロイ結果 ━━━".bold());
        println!(
            "開始: {}  所要時間: {}秒",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.duration().num_seconds()
        );
        if let Some(ref rg) = self.resource_group {
            println!("リソースグループ: {}", rg.cyan());
        }
        if let Some(ref registry) = self.registry {
            println!("レジストリ: {}", registry.cyan());
        }

        println!();
        println!("{}", "ステージ:".bold());
        for (stage, status) in &self.stages {
            let line = match status {
                StageStatus::Completed => format!("  ✓ {}", stage).green(),
                StageStatus::CompletedWithErrors(e) => format!("  ⚠ {} ({})", stage, e).yellow(),
                StageStatus::Skipped => format!("  - {} (スキップ)", stage).dimmed(),
                StageStatus::Failed(e) => format!("  ✗ {}: {}", stage, e).red(),
                StageStatus::Aborted => format!("  ✗ {} (中断)", stage).red(),
            };
            println!("{}", line);
        }

        if !self.images.is_empty() {
            println!();
            println!("{}", format!("イメージ ({} 個):", self.images.len()).bold());
            for image in &self.images {
                println!("  • {}", image.to_string().cyan());
            }
        }

        if !self.results.is_empty() {
            println!();
            println!("{}", "デプロイ先:".bold());
            for result in &self.results {
                print_result(result);
            }
        }

        if let Some(ref rewire) = self.rewire {
            for result in &rewire.redeployments {
                print_result(result);
            }
        }

        if !self.endpoints.is_empty() {
            println!();
            println!("{}", "エンドポイント:".bold());
            for endpoint in self.endpoints.iter() {
                let public = endpoint
                    .public_url
                    .as_deref()
                    .map(|url| format!(" (外部: {})", url))
                    .unwrap_or_default();
                println!(
                    "  {} → {}{} [{}]",
                    endpoint.service.name().cyan(),
                    endpoint.base_url,
                    public,
                    endpoint.provenance
                );
            }
        }

        if let Some(ref rewire) = self.rewire {
            println!();
            println!("{}", "リワイヤリング:".bold());
            for wiring in &rewire.consumers {
                let state = match wiring.state {
                    WiringState::Rewired => wiring.state.to_string().green(),
                    WiringState::FullyWired => wiring.state.to_string().normal(),
                    WiringState::PartiallyWired => wiring.state.to_string().yellow(),
                    WiringState::Unwired => wiring.state.to_string().red(),
                };
                println!("  {} [{}]", wiring.consumer.name().cyan(), state);
                for setting in &wiring.settings {
                    println!(
                        "    {} = {} [{}]",
                        setting.key.config_key(),
                        setting.url,
                        setting.provenance
                    );
                }
                for error in wiring.unresolved_errors() {
                    println!("    {}", format!("✗ {}", error).red());
                }
                if let Some(ref note) = wiring.note {
                    println!("    {}", note.dimmed());
                }
            }
        }

        println!();
        if self.aborted {
            println!("{}", "✗ 中断されました（適用済みの変更はそのまま残ります）".red().bold());
        } else if let Some(ref fatal) = self.fatal {
            println!("{}", format!("✗ {}", fatal).red().bold());
        } else {
            println!("{}", "✓ デプロイが完了しました".green().bold());
        }
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

fn print_result(result: &DeploymentResult) {
    println!("  {}", result.target.to_string().bold());
    if let Some(ref error) = result.target_error {
        println!("    {}", format!("✗ {}", error).red());
    }
    if let Some(ref note) = result.note {
        println!("    {}", note.dimmed());
    }
    for outcome in &result.outcomes {
        let line = match outcome.status {
            OutcomeStatus::Succeeded => format!("    ✓ {}", outcome.service).green(),
            OutcomeStatus::Degraded(ref reason) => {
                format!("    ⚠ {}: {}", outcome.service, reason).yellow()
            }
            OutcomeStatus::Failed(ref reason) => {
                format!("    ✗ {}: {}", outcome.service, reason).red()
            }
        };
        println!("{}", line);
        for line in &outcome.diagnostics {
            println!("      {}", line.dimmed());
        }
    }
}
