//! Script output parsing
//!
//! The generated script prints `@@fleetwire ...` marker lines between the
//! regular command output. Everything else is ignored except lines captured
//! between `logs-begin` and `logs-end`.

use crate::script::{EXIT_BOOTSTRAP_FAILED, EXIT_LOGIN_FAILED, MARKER};
use std::collections::BTreeMap;

/// Status a service reported from the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedStatus {
    Running,
    Failed(String),
}

/// Parsed markers of one script run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostReport {
    /// The container engine had to be installed
    pub engine_installed: bool,
    pub bootstrap_failed: bool,
    pub login_failed: bool,
    pub exit_code: Option<i32>,
    /// Services whose container was created
    pub started: Vec<String>,
    pub statuses: BTreeMap<String, ReportedStatus>,
    pub logs: BTreeMap<String, Vec<String>>,
}

impl HostReport {
    pub fn parse(stdout: &str) -> Self {
        let mut report = HostReport::default();
        let mut capturing: Option<String> = None;

        for line in stdout.lines() {
            let Some(rest) = marker_body(line) else {
                if let Some(ref service) = capturing {
                    report
                        .logs
                        .entry(service.clone())
                        .or_default()
                        .push(line.to_string());
                }
                continue;
            };

            let mut words = rest.splitn(3, ' ');
            let kind = words.next().unwrap_or_default();
            let first = words.next().unwrap_or_default();
            let tail = words.next().unwrap_or_default().trim();

            match kind {
                "bootstrap" => match first {
                    "install" => report.engine_installed = true,
                    "failed" => report.bootstrap_failed = true,
                    _ => {}
                },
                "login" if first == "failed" => report.login_failed = true,
                "started" if !first.is_empty() => report.started.push(first.to_string()),
                "status" if !first.is_empty() => {
                    let status = match tail.split_once(' ') {
                        _ if tail == "running" => ReportedStatus::Running,
                        Some(("failed", reason)) => ReportedStatus::Failed(reason.to_string()),
                        _ if tail == "failed" => ReportedStatus::Failed(String::new()),
                        _ => continue,
                    };
                    report.statuses.insert(first.to_string(), status);
                }
                "logs-begin" => capturing = Some(first.to_string()),
                "logs-end" => capturing = None,
                "exit" => report.exit_code = first.parse().ok(),
                _ => {
                    tracing::debug!("Ignoring unknown marker: {}", line);
                }
            }
        }

        report
    }

    /// Host-level failure that stopped the whole batch
    pub fn host_failure(&self) -> Option<HostFailure> {
        if self.login_failed || self.exit_code == Some(EXIT_LOGIN_FAILED) {
            return Some(HostFailure::RegistryLogin);
        }
        if self.bootstrap_failed || self.exit_code == Some(EXIT_BOOTSTRAP_FAILED) {
            return Some(HostFailure::Bootstrap);
        }
        None
    }

    /// The script printed its final exit marker
    pub fn completed(&self) -> bool {
        self.exit_code.is_some()
    }
}

/// Failures that stop every service on a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFailure {
    RegistryLogin,
    Bootstrap,
}

fn marker_body(line: &str) -> Option<&str> {
    line.trim_end()
        .strip_prefix(MARKER)
        .and_then(|rest| rest.strip_prefix(' '))
}
