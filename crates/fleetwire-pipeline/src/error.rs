//! Pipeline error types

use crate::stage::Stage;
use fleetwire_build::BuildError;
use fleetwire_cluster::ClusterError;
use fleetwire_core::{CoreError, EnvKey, ServiceId};
use fleetwire_infra::InfraError;
use fleetwire_remote::RemoteError;
use thiserror::Error;

/// Error raised inside one stage
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Infra(#[from] InfraError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    WebApp(#[from] WebAppError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("No image backend configured")]
    NoImageBackend,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A fatal stage failed; carries the stage it happened in
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: StageError,
    },

    #[error("Run aborted before stage '{0}'")]
    Aborted(Stage),

    #[error("No endpoint resolved for {key} of {consumer}")]
    EndpointUnresolved { consumer: ServiceId, key: EnvKey },
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::StageFailed { stage, .. } | PipelineError::Aborted(stage) => {
                Some(*stage)
            }
            PipelineError::EndpointUnresolved { .. } => Some(Stage::Rewire),
        }
    }
}

/// Managed web app settings errors
#[derive(Error, Debug)]
pub enum WebAppError {
    #[error("az CLI not found in PATH")]
    AzNotFound,

    #[error("Command failed: az {command}\n{stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Attach the stage a failure happened in
pub(crate) trait InStage<T> {
    fn in_stage(self, stage: Stage) -> Result<T>;
}

impl<T, E: Into<StageError>> InStage<T> for std::result::Result<T, E> {
    fn in_stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| PipelineError::StageFailed {
            stage,
            source: e.into(),
        })
    }
}
