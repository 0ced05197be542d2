//! レジストリ認証処理
//!
//! インフラ出力値の管理者認証情報を優先し、なければ Docker config.json
//! （auths / credential helper）から Bollard の DockerCredentials を作ります。

use crate::error::{BuildError, BuildResult};
use base64::Engine;
use bollard::auth::DockerCredentials;
use fleetwire_core::RegistryCredentials;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Docker config.json の構造
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(default)]
    creds_store: Option<String>,
    /// レジストリごとの credential helper
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    auth: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

/// レジストリ認証を管理
#[derive(Debug)]
pub struct RegistryAuth {
    config_path: PathBuf,
}

impl Default for RegistryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryAuth {
    /// ~/.docker/config.json（DOCKER_CONFIG があればそちら）を使用
    pub fn new() -> Self {
        let config_path = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            })
            .join("config.json");

        Self { config_path }
    }

    pub fn with_config_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// プッシュに使う認証情報を解決
    ///
    /// 1. インフラ出力値の管理者認証情報
    /// 2. config.json の auths
    /// 3. credential helper
    pub async fn resolve(
        &self,
        image: &str,
        explicit: Option<&RegistryCredentials>,
    ) -> BuildResult<Option<DockerCredentials>> {
        let registry = extract_registry(image);

        if let Some(creds) = explicit {
            tracing::debug!("Using provisioned admin credentials for {}", registry);
            return Ok(Some(DockerCredentials {
                username: Some(creds.username.clone()),
                password: Some(creds.password.expose().to_string()),
                serveraddress: Some(registry),
                ..Default::default()
            }));
        }

        if !self.config_path.exists() {
            tracing::debug!("Docker config.json not found at {:?}", self.config_path);
            return Ok(None);
        }

        let config = self.load_docker_config()?;

        if let Some(auth_entry) = config.auths.get(&registry)
            && let Some(auth_b64) = &auth_entry.auth
            && let Some(creds) = decode_auth(auth_b64, &registry)?
        {
            tracing::debug!("Found credentials in auths for {}", registry);
            return Ok(Some(creds));
        }

        let helper = config
            .cred_helpers
            .get(&registry)
            .or(config.creds_store.as_ref());
        if let Some(helper) = helper {
            tracing::debug!("Trying credential helper: {}", helper);
            match get_from_helper(helper, &registry).await {
                Ok(Some(creds)) => return Ok(Some(creds)),
                Ok(None) => {}
                Err(e) => tracing::debug!("Credential helper failed: {}", e),
            }
        }

        tracing::debug!("No credentials found for {}", registry);
        Ok(None)
    }

    fn load_docker_config(&self) -> BuildResult<DockerConfig> {
        let content =
            std::fs::read_to_string(&self.config_path).map_err(|e| BuildError::AuthFailed {
                registry: self.config_path.display().to_string(),
                message: format!("Failed to read config.json: {}", e),
            })?;

        serde_json::from_str(&content).map_err(|e| BuildError::AuthFailed {
            registry: self.config_path.display().to_string(),
            message: format!("Failed to parse config.json: {}", e),
        })
    }
}

/// イメージ名からレジストリを抽出
///
/// - `oteldemo.azurecr.io/order-service:v1` -> `oteldemo.azurecr.io`
/// - `localhost:5000/app` -> `localhost:5000`
/// - `myuser/app` -> `docker.io`
pub fn extract_registry(image: &str) -> String {
    match image.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first.to_string()
        }
        _ => "docker.io".to_string(),
    }
}

fn decode_auth(auth_b64: &str, registry: &str) -> BuildResult<Option<DockerCredentials>> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64)
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to decode auth: {}", e),
        })?;

    let auth_str = String::from_utf8(decoded).map_err(|e| BuildError::AuthFailed {
        registry: registry.to_string(),
        message: format!("Invalid UTF-8 in auth: {}", e),
    })?;

    Ok(auth_str
        .split_once(':')
        .map(|(username, password)| DockerCredentials {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            serveraddress: Some(registry.to_string()),
            ..Default::default()
        }))
}

async fn get_from_helper(helper: &str, registry: &str) -> BuildResult<Option<DockerCredentials>> {
    let helper_cmd = format!("docker-credential-{}", helper);

    let mut child = Command::new(&helper_cmd)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to run {}: {}", helper_cmd, e),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(registry.as_bytes()).await?;
    }

    let output = child.wait_with_output().await?;

    if !output.status.success() {
        tracing::debug!(
            "Credential helper returned error for {}: {}",
            registry,
            String::from_utf8_lossy(&output.stderr)
        );
        return Ok(None);
    }

    let response: CredentialResponse =
        serde_json::from_slice(&output.stdout).map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to parse credential helper response: {}", e),
        })?;

    Ok(Some(DockerCredentials {
        username: Some(response.username),
        password: Some(response.secret),
        serveraddress: Some(registry.to_string()),
        ..Default::default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwire_core::Sensitive;
    use std::fs;

    #[test]
    fn test_extract_registry() {
        assert_eq!(
            extract_registry("oteldemo.azurecr.io/order-service:v1"),
            "oteldemo.azurecr.io"
        );
        assert_eq!(extract_registry("localhost:5000/myapp"), "localhost:5000");
        assert_eq!(extract_registry("myuser/app:latest"), "docker.io");
        assert_eq!(extract_registry("nginx:alpine"), "docker.io");
    }

    #[tokio::test]
    async fn test_explicit_credentials_take_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("config.json");
        // user:fromfile
        fs::write(
            &config_path,
            r#"{"auths": {"r.azurecr.io": {"auth": "dXNlcjpmcm9tZmlsZQ=="}}}"#,
        )
        .unwrap();
        let auth = RegistryAuth::with_config_path(config_path);

        let explicit = RegistryCredentials {
            username: "admin".to_string(),
            password: Sensitive::new("fromoutputs"),
        };
        let creds = auth
            .resolve("r.azurecr.io/api-gateway:latest", Some(&explicit))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creds.username.as_deref(), Some("admin"));
        assert_eq!(creds.password.as_deref(), Some("fromoutputs"));
        assert_eq!(creds.serveraddress.as_deref(), Some("r.azurecr.io"));
    }

    #[tokio::test]
    async fn test_falls_back_to_docker_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(
            &config_path,
            r#"{"auths": {"r.azurecr.io": {"auth": "dXNlcjpmcm9tZmlsZQ=="}}}"#,
        )
        .unwrap();
        let auth = RegistryAuth::with_config_path(config_path);

        let creds = auth
            .resolve("r.azurecr.io/api-gateway:latest", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creds.username.as_deref(), Some("user"));
        assert_eq!(creds.password.as_deref(), Some("fromfile"));
    }

    #[tokio::test]
    async fn test_missing_config_means_anonymous() {
        let auth = RegistryAuth::with_config_path(PathBuf::from("/nonexistent/config.json"));
        let creds = auth.resolve("r.azurecr.io/app:latest", None).await.unwrap();
        assert!(creds.is_none());
    }
}
