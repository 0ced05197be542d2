//! fleetwire remote host rollout
//!
//! Deploys remote-host services by generating one shell script per host and
//! running it over ssh or `az vm run-command`.

pub mod deployer;
pub mod error;
pub mod executor;
pub mod report;
pub mod script;

pub use deployer::{DEFAULT_HOST_PARALLELISM, DEFAULT_WARMUP, RemoteDeployment, RemoteHostDeployer, host_endpoint};
pub use error::{RemoteError, Result};
pub use executor::{AzRunCommandExecutor, ExecOutput, RemoteExecutor, SshExecutor};
pub use report::{HostFailure, HostReport, ReportedStatus};
pub use script::{RemoteScript, ScriptBuilder};
