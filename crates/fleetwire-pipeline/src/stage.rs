//! Stage table

use std::fmt;

/// What a failure of the stage does to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatality {
    /// The run stops and exits non-zero
    Fatal,
    /// The failure is recorded and the run continues
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Infra,
    Outputs,
    Images,
    Cluster,
    Hosts,
    Rewire,
}

impl Stage {
    /// Execution order
    pub const ALL: [Stage; 6] = [
        Stage::Infra,
        Stage::Outputs,
        Stage::Images,
        Stage::Cluster,
        Stage::Hosts,
        Stage::Rewire,
    ];

    pub const fn fatality(self) -> Fatality {
        match self {
            Stage::Infra | Stage::Outputs | Stage::Images => Fatality::Fatal,
            Stage::Cluster | Stage::Hosts | Stage::Rewire => Fatality::BestEffort,
        }
    }

    pub const fn is_fatal(self) -> bool {
        matches!(self.fatality(), Fatality::Fatal)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Infra => "infra",
            Stage::Outputs => "outputs",
            Stage::Images => "images",
            Stage::Cluster => "cluster",
            Stage::Hosts => "hosts",
            Stage::Rewire => "rewire",
        }
    }

    /// CLI flag that skips the stage
    pub const fn skip_flag(self) -> Option<&'static str> {
        match self {
            Stage::Infra => Some("--skip-infra"),
            Stage::Outputs => None,
            Stage::Images => Some("--skip-images"),
            Stage::Cluster => Some("--skip-cluster"),
            Stage::Hosts => Some("--skip-hosts"),
            Stage::Rewire => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    /// Completed with recorded failures
    CompletedWithErrors(String),
    Skipped,
    Failed(String),
    /// Not started because the run was aborted
    Aborted,
}
