//! kubectl CLI wrapper
//!
//! Wraps the kubectl (and `az aks`) commands used for a rollout.

use crate::api::{ClusterApi, RolloutState};
use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use fleetwire_core::Sensitive;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Slack added on top of `--timeout` before the wait is abandoned locally
const WAIT_SLACK: Duration = Duration::from_secs(30);

/// kubectl CLI wrapper
#[derive(Debug, Clone, Default)]
pub struct Kubectl;

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl Kubectl {
    pub fn new() -> Self {
        Self
    }

    /// Check if kubectl is installed
    pub async fn check_installed(&self) -> Result<()> {
        let which = Command::new("which").arg("kubectl").output().await?;
        if !which.status.success() {
            return Err(ClusterError::KubectlNotFound);
        }
        Ok(())
    }

    async fn exec(
        &self,
        program: &'static str,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: {} {}", program, args.join(" "));

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound if program == "kubectl" => ClusterError::KubectlNotFound,
            _ => ClusterError::IoError(e),
        })?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input).await?;
            // Close stdin so kubectl sees EOF
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Run a command and return stdout, failing on a non-zero exit
    async fn run_command(
        &self,
        program: &'static str,
        args: &[&str],
        stdin: Option<&[u8]>,
    ) -> Result<String> {
        let output = self.exec(program, args, stdin).await?;
        if !output.success {
            return Err(ClusterError::CommandFailed {
                program,
                command: args.iter().take(2).copied().collect::<Vec<_>>().join(" "),
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl ClusterApi for Kubectl {
    async fn connect(&self, resource_group: &str, cluster: &str) -> Result<()> {
        self.check_installed().await?;

        let args = [
            "aks",
            "get-credentials",
            "--resource-group",
            resource_group,
            "--name",
            cluster,
            "--overwrite-existing",
            "--only-show-errors",
        ];
        self.run_command("az", &args, None).await?;
        Ok(())
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let output = self
            .exec("kubectl", &["get", "namespace", namespace, "-o", "name"], None)
            .await?;
        if output.success {
            return Ok(true);
        }
        if output.stderr.contains("NotFound") || output.stderr.contains("not found") {
            return Ok(false);
        }
        Err(ClusterError::CommandFailed {
            program: "kubectl",
            command: "get namespace".to_string(),
            stderr: output.stderr,
        })
    }

    async fn create_namespace(&self, namespace: &str) -> Result<()> {
        self.run_command("kubectl", &["create", "namespace", namespace], None)
            .await?;
        Ok(())
    }

    async fn apply_stdin(&self, document: &Sensitive) -> Result<()> {
        self.run_command(
            "kubectl",
            &["apply", "-f", "-"],
            Some(document.expose().as_bytes()),
        )
        .await?;
        Ok(())
    }

    async fn apply_file(&self, namespace: &str, path: &Path) -> Result<()> {
        let path = path.display().to_string();
        self.run_command("kubectl", &["apply", "-n", namespace, "-f", &path], None)
            .await?;
        Ok(())
    }

    async fn set_env(
        &self,
        namespace: &str,
        deployment: &str,
        vars: &[(String, String)],
    ) -> Result<()> {
        if vars.is_empty() {
            return Ok(());
        }
        let target = format!("deployment/{}", deployment);
        let assignments: Vec<String> = vars.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let mut args = vec!["set", "env", target.as_str(), "-n", namespace];
        args.extend(assignments.iter().map(|s| s.as_str()));

        self.run_command("kubectl", &args, None).await?;
        Ok(())
    }

    async fn rollout_restart(&self, namespace: &str, deployment: &str) -> Result<()> {
        let target = format!("deployment/{}", deployment);
        self.run_command(
            "kubectl",
            &["rollout", "restart", &target, "-n", namespace],
            None,
        )
        .await?;
        Ok(())
    }

    async fn rollout_status(
        &self,
        namespace: &str,
        deployment: &str,
        timeout: Duration,
    ) -> Result<RolloutState> {
        let target = format!("deployment/{}", deployment);
        let timeout_arg = format!("--timeout={}s", timeout.as_secs());
        let args = [
            "rollout",
            "status",
            target.as_str(),
            "-n",
            namespace,
            timeout_arg.as_str(),
        ];

        let output = match tokio::time::timeout(
            timeout + WAIT_SLACK,
            self.exec("kubectl", &args, None),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Ok(RolloutState::TimedOut(format!(
                    "no rollout status after {}s",
                    timeout.as_secs()
                )));
            }
        };

        if output.success {
            return Ok(RolloutState::Complete);
        }
        if output.stderr.contains("timed out") || output.stderr.contains("progress deadline") {
            return Ok(RolloutState::TimedOut(output.stderr));
        }
        Err(ClusterError::CommandFailed {
            program: "kubectl",
            command: "rollout status".to_string(),
            stderr: output.stderr,
        })
    }

    async fn node_internal_ip(&self) -> Result<Option<String>> {
        let stdout = self
            .run_command(
                "kubectl",
                &[
                    "get",
                    "nodes",
                    "-o",
                    r#"jsonpath={.items[0].status.addresses[?(@.type=="InternalIP")].address}"#,
                ],
                None,
            )
            .await?;
        Ok(first_field(&stdout))
    }

    async fn service_node_port(&self, namespace: &str, service: &str) -> Result<Option<u16>> {
        let stdout = self
            .run_command(
                "kubectl",
                &[
                    "get",
                    "service",
                    service,
                    "-n",
                    namespace,
                    "-o",
                    "jsonpath={.spec.ports[0].nodePort}",
                ],
                None,
            )
            .await?;
        Ok(first_field(&stdout).and_then(|s| s.parse().ok()))
    }
}

/// First whitespace-separated field of a jsonpath result
fn first_field(stdout: &str) -> Option<String> {
    stdout
        .split_whitespace()
        .next()
        .map(|s| s.trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
}
