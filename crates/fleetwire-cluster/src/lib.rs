//! fleetwire cluster rollout
//!
//! Deploys cluster-kind services by applying templated manifests through
//! kubectl, then resolves the addresses other consumers should use.

pub mod api;
pub mod deployer;
pub mod error;
pub mod kubectl;
pub mod manifest;
pub mod secret;

pub use api::{ClusterApi, RolloutState};
pub use deployer::{ClusterDeployer, ClusterDeployment, DEFAULT_ROLLOUT_TIMEOUT};
pub use error::{ClusterError, Result};
pub use kubectl::Kubectl;
pub use manifest::{REGISTRY_PLACEHOLDER, StagingDir, render};
pub use secret::{SECRET_NAME, secret_document};
