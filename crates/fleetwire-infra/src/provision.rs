//! Infrastructure provisioning

use crate::error::Result;
use crate::terraform::Terraform;
use async_trait::async_trait;

/// Brings the environment to its declared state
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self) -> Result<()>;
}

#[async_trait]
impl Provisioner for Terraform {
    async fn provision(&self) -> Result<()> {
        provision(self).await
    }
}

/// Bring the infrastructure to the declared state
///
/// Re-running against an up-to-date environment is a no-op on the provider side.
pub async fn provision(terraform: &Terraform) -> Result<()> {
    terraform.check_installed().await?;

    tracing::info!("Initializing terraform in {}", terraform.dir().display());
    terraform.init().await?;

    tracing::info!("Applying infrastructure");
    terraform.apply().await?;

    Ok(())
}
