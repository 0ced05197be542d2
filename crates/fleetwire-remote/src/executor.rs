//! Remote script transports
//!
//! `SshExecutor` streams the script to `bash -s` over ssh. `AzRunCommandExecutor`
//! hands it to `az vm run-command invoke`, which needs no inbound port on the VM.
//! Both deliver the base64 parameters as the script's positional arguments and
//! never log them.

use crate::error::{RemoteError, Result};
use crate::script::{LOG_TAIL_LINES, RemoteScript};
use async_trait::async_trait;
use fleetwire_core::{HostAddress, Outputs, Sensitive, shell_escape};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Raw result of one script run
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Exit code of the script, when the transport reports one
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Executes a generated script on a host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, host: &HostAddress, script: &RemoteScript) -> Result<ExecOutput>;

    /// Log lines the script captures per container that is not running
    fn log_tail_lines(&self) -> u32 {
        LOG_TAIL_LINES
    }
}

/// ssh exits with 255 when the connection itself fails
const SSH_CONNECTION_FAILED: i32 = 255;

/// ssh transport
#[derive(Debug, Clone)]
pub struct SshExecutor {
    user: String,
    key: Option<PathBuf>,
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            key: None,
            connect_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_key(mut self, key: Option<PathBuf>) -> Self {
        self.key = key;
        self
    }

    fn ssh_args(&self, host: &HostAddress) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
        ];
        if let Some(ref key) = self.key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{}", self.user, host.reachable_ip()));
        args
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, host: &HostAddress, script: &RemoteScript) -> Result<ExecOutput> {
        let args = self.ssh_args(host);
        tracing::debug!(
            "Running: ssh {} bash -s -- <{} parameters>",
            args.join(" "),
            script.params.len()
        );

        // The remote side re-parses the command line, so every parameter is quoted
        let mut remote = String::from("bash -s --");
        for param in &script.params {
            remote.push(' ');
            remote.push_str(&shell_escape(param.expose()));
        }

        let mut child = Command::new("ssh")
            .args(&args)
            .arg(remote)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => RemoteError::ToolNotFound { program: "ssh" },
                _ => RemoteError::IoError(e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.body.as_bytes()).await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let exit_code = output.status.code();

        if exit_code == Some(SSH_CONNECTION_FAILED) || exit_code.is_none() {
            return Err(RemoteError::RemoteUnreachable {
                host: host.name.clone(),
                message: if stderr.is_empty() {
                    "ssh connection failed".to_string()
                } else {
                    stderr
                },
            });
        }

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }
}

/// run-command returns only the last few KB of stdout
const RUN_COMMAND_LOG_TAIL_LINES: u32 = 5;

/// `--parameters` entries as `argN=<value>`
///
/// az splits every entry at its first `=`, and base64 values end in `=` padding.
fn run_command_parameters(params: &[Sensitive]) -> Vec<String> {
    params
        .iter()
        .enumerate()
        .map(|(i, p)| format!("arg{}={}", i + 1, p.expose()))
        .collect()
}

/// `az vm run-command invoke` transport
#[derive(Debug, Clone)]
pub struct AzRunCommandExecutor {
    resource_group: String,
    /// logical host name -> VM resource name
    vm_names: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RunCommandResult {
    #[serde(default)]
    value: Vec<RunCommandStatus>,
}

#[derive(Debug, Deserialize)]
struct RunCommandStatus {
    #[serde(default)]
    message: String,
}

impl AzRunCommandExecutor {
    pub fn new(resource_group: impl Into<String>) -> Self {
        Self {
            resource_group: resource_group.into(),
            vm_names: BTreeMap::new(),
        }
    }

    /// Resource group and `<host>_vm_name` overrides from the outputs
    pub fn from_outputs(outputs: &Outputs) -> Self {
        let mut executor = Self::new(outputs.resource_group());
        for host in outputs.hosts() {
            if let Some(vm) = outputs.value(&format!("{}_vm_name", host.name)) {
                executor = executor.with_vm_name(&host.name, vm);
            }
        }
        executor
    }

    pub fn with_vm_name(mut self, host: impl Into<String>, vm: impl Into<String>) -> Self {
        self.vm_names.insert(host.into(), vm.into());
        self
    }

    fn vm_name<'a>(&'a self, host: &'a HostAddress) -> &'a str {
        self.vm_names
            .get(&host.name)
            .map(String::as_str)
            .unwrap_or(&host.name)
    }

    /// Write the script to a private staging directory
    fn stage_script(script: &RemoteScript) -> Result<(tempfile::TempDir, PathBuf)> {
        let dir = tempfile::Builder::new().prefix("fleetwire-").tempdir()?;
        let path = dir.path().join("deploy.sh");
        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700))?;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&path)?;
            file.write_all(script.body.as_bytes())?;
        }
        #[cfg(not(unix))]
        std::fs::write(&path, &script.body)?;
        Ok((dir, path))
    }
}

#[async_trait]
impl RemoteExecutor for AzRunCommandExecutor {
    async fn execute(&self, host: &HostAddress, script: &RemoteScript) -> Result<ExecOutput> {
        let (_staging, path) = Self::stage_script(script)?;
        let vm = self.vm_name(host);
        let scripts_arg = format!("@{}", path.display());

        let mut args: Vec<&str> = vec![
            "vm",
            "run-command",
            "invoke",
            "--resource-group",
            self.resource_group.as_str(),
            "--name",
            vm,
            "--command-id",
            "RunShellScript",
            "--scripts",
            scripts_arg.as_str(),
            "--output",
            "json",
            "--only-show-errors",
        ];
        tracing::debug!(
            "Running: az {} --parameters <{} parameters>",
            args.join(" "),
            script.params.len()
        );
        let parameters = run_command_parameters(&script.params);
        args.push("--parameters");
        args.extend(parameters.iter().map(String::as_str));

        let output = Command::new("az")
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => RemoteError::ToolNotFound { program: "az" },
                _ => RemoteError::IoError(e),
            })?;

        if !output.status.success() {
            return Err(RemoteError::RemoteUnreachable {
                host: host.name.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let parsed: RunCommandResult = serde_json::from_slice(&output.stdout)?;
        let message = parsed
            .value
            .into_iter()
            .next()
            .map(|status| status.message)
            .unwrap_or_default();
        let (stdout, stderr) = split_run_command_message(&message);

        Ok(ExecOutput {
            // run-command does not report the script's exit status; the exit marker does
            exit_code: None,
            stdout,
            stderr,
        })
    }

    fn log_tail_lines(&self) -> u32 {
        RUN_COMMAND_LOG_TAIL_LINES
    }
}

/// Split `Enable succeeded: \n[stdout]\n...\n[stderr]\n...` into its two streams
fn split_run_command_message(message: &str) -> (String, String) {
    let after_stdout = match message.split_once("[stdout]\n") {
        Some((_, rest)) => rest,
        None => return (String::new(), message.trim().to_string()),
    };
    match after_stdout.split_once("[stderr]\n") {
        Some((stdout, stderr)) => (stdout.to_string(), stderr.trim().to_string()),
        None => (after_stdout.to_string(), String::new()),
    }
}
