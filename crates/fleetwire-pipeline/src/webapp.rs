//! Managed web app settings
//!
//! The frontend runs as a managed web app outside the virtual network. Its
//! configuration is pushed as app settings followed by a restart.

use crate::error::WebAppError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

#[async_trait]
pub trait WebAppClient: Send + Sync {
    /// Merge `settings` into the app's settings
    async fn set_app_settings(
        &self,
        resource_group: &str,
        app: &str,
        settings: &[(String, String)],
    ) -> Result<(), WebAppError>;

    async fn restart(&self, resource_group: &str, app: &str) -> Result<(), WebAppError>;
}

/// `az webapp` CLI client
#[derive(Debug, Clone, Default)]
pub struct AzWebApp;

impl AzWebApp {
    pub fn new() -> Self {
        Self
    }

    async fn run_command(&self, args: &[&str]) -> Result<String, WebAppError> {
        tracing::debug!("Running: az {}", args.join(" "));

        let output = Command::new("az")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => WebAppError::AzNotFound,
                _ => WebAppError::IoError(e),
            })?;

        if !output.status.success() {
            return Err(WebAppError::CommandFailed {
                command: args.iter().take(3).copied().collect::<Vec<_>>().join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl WebAppClient for AzWebApp {
    async fn set_app_settings(
        &self,
        resource_group: &str,
        app: &str,
        settings: &[(String, String)],
    ) -> Result<(), WebAppError> {
        if settings.is_empty() {
            return Ok(());
        }
        let assignments: Vec<String> = settings
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        let mut args = vec![
            "webapp",
            "config",
            "appsettings",
            "set",
            "--resource-group",
            resource_group,
            "--name",
            app,
            "--output",
            "none",
            "--settings",
        ];
        args.extend(assignments.iter().map(String::as_str));

        self.run_command(&args).await?;
        Ok(())
    }

    async fn restart(&self, resource_group: &str, app: &str) -> Result<(), WebAppError> {
        self.run_command(&[
            "webapp",
            "restart",
            "--resource-group",
            resource_group,
            "--name",
            app,
        ])
        .await?;
        Ok(())
    }
}
