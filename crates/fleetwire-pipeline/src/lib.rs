//! fleetwire pipeline
//!
//! Sequences the deployment stages and rewires consumer endpoints.
//!
//! - [`PipelineDriver`]: runs the stage table and produces a [`RunReport`]
//! - [`EndpointRewirer`]: computes and pushes consumer base URLs
//! - [`install_interrupt_handler`]: Ctrl-C / SIGTERM to [`fleetwire_core::AbortSignal`]

pub mod driver;
pub mod error;
pub mod options;
pub mod report;
pub mod rewire;
pub mod signal;
pub mod stage;
pub mod webapp;

pub use driver::{Collaborators, ExecutorFactory, PipelineDriver, Plan};
pub use error::{PipelineError, Result, StageError, WebAppError};
pub use options::PipelineOptions;
pub use report::RunReport;
pub use rewire::{ConsumerWiring, EndpointRewirer, RewireResult, WiredSetting, WiringState};
pub use signal::install_interrupt_handler;
pub use stage::{Fatality, Stage, StageStatus};
pub use webapp::{AzWebApp, WebAppClient};
