//! terraform CLI wrapper
//!
//! Wraps the terraform commands used to provision the environment and read
//! its outputs.

use crate::error::{InfraError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// terraform CLI wrapper bound to one working directory
#[derive(Debug, Clone)]
pub struct Terraform {
    dir: PathBuf,
    var_file: Option<PathBuf>,
}

impl Terraform {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            var_file: None,
        }
    }

    pub fn with_var_file(mut self, var_file: impl Into<PathBuf>) -> Self {
        self.var_file = Some(var_file.into());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Check if terraform is installed
    pub async fn check_installed(&self) -> Result<()> {
        let which = Command::new("which").arg("terraform").output().await?;

        if !which.status.success() {
            return Err(InfraError::TerraformNotFound);
        }
        Ok(())
    }

    /// Run a terraform command and return stdout
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        if !self.dir.is_dir() {
            return Err(InfraError::DirectoryNotFound(self.dir.display().to_string()));
        }

        let mut cmd = Command::new("terraform");
        cmd.current_dir(&self.dir);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: terraform {} (in {})", args.join(" "), self.dir.display());

        let output = cmd.output().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => InfraError::TerraformNotFound,
            _ => InfraError::IoError(e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InfraError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// terraform init
    pub async fn init(&self) -> Result<()> {
        self.run_command(&["init", "-input=false", "-no-color"]).await?;
        Ok(())
    }

    /// terraform apply (non-interactive)
    pub async fn apply(&self) -> Result<()> {
        let var_file_arg = self
            .var_file
            .as_ref()
            .map(|f| format!("-var-file={}", f.display()));

        let mut args = vec!["apply", "-auto-approve", "-input=false", "-no-color"];
        if let Some(ref arg) = var_file_arg {
            args.push(arg.as_str());
        }

        self.run_command(&args).await?;
        Ok(())
    }

    /// terraform output -json
    pub async fn output_json(&self) -> Result<String> {
        self.run_command(&["output", "-json", "-no-color"]).await
    }
}
