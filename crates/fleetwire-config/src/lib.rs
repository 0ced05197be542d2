//! fleetwire プロジェクト設定
//!
//! `fleetwire.yaml` を探索して読み込みます。ファイルがなければ既定値を使い、
//! CLIフラグはこの値を上書きします。

pub mod error;

pub use error::*;

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 設定ファイルのパスを直接指定する環境変数
pub const CONFIG_ENV: &str = "FLEETWIRE_CONFIG";

const CANDIDATES: [&str; 2] = ["fleetwire.yaml", ".fleetwire.yaml"];

/// リモート実行の経路
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteTransport {
    #[default]
    Ssh,
    AzRunCommand,
}

/// リモート実行設定
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub transport: RemoteTransport,
    pub ssh_user: String,
    pub ssh_key: Option<PathBuf>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            transport: RemoteTransport::Ssh,
            ssh_user: "azureuser".to_string(),
            ssh_key: None,
        }
    }
}

/// プロジェクト設定
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// terraform の作業ディレクトリ
    pub infra_dir: PathBuf,
    pub var_file: Option<PathBuf>,
    /// サービスのソースディレクトリ
    pub services_dir: PathBuf,
    /// クラスタマニフェストのディレクトリ
    pub manifests_dir: PathBuf,
    pub namespace: String,
    pub image_tag: String,
    pub rollout_timeout_secs: u64,
    pub warmup_timeout_secs: u64,
    pub host_parallelism: usize,
    pub remote: RemoteConfig,
    pub environment: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            infra_dir: PathBuf::from("infra"),
            var_file: None,
            services_dir: PathBuf::from("services"),
            manifests_dir: PathBuf::from("k8s"),
            namespace: "otel-demo".to_string(),
            image_tag: "latest".to_string(),
            rollout_timeout_secs: 300,
            warmup_timeout_secs: 20,
            host_parallelism: 4,
            remote: RemoteConfig::default(),
            environment: "demo".to_string(),
        }
    }
}

impl ProjectConfig {
    /// 相対パスを基準ディレクトリからの絶対パスに解決
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        let join = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        self.infra_dir = join(&self.infra_dir);
        self.var_file = self.var_file.as_deref().map(join);
        self.services_dir = join(&self.services_dir);
        self.manifests_dir = join(&self.manifests_dir);
        self.remote.ssh_key = self.remote.ssh_key.as_deref().map(join);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.host_parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                field: "host_parallelism",
                message: "1以上を指定してください".to_string(),
            });
        }
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "namespace",
                message: "空にはできません".to_string(),
            });
        }
        Ok(())
    }
}

/// fleetwire のグローバル設定ディレクトリ
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fleetwire"))
}

/// プロジェクトの fleetwire.yaml を探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 FLEETWIRE_CONFIG (直接パス指定)
/// 2. カレントディレクトリ: fleetwire.yaml, .fleetwire.yaml
/// 3. ./.fleetwire/fleetwire.yaml
/// 4. ~/.config/fleetwire/fleetwire.yaml (グローバル設定)
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        tracing::warn!("{} が存在しません: {}", CONFIG_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    let project_dir = current_dir.join(".fleetwire");
    let path = project_dir.join("fleetwire.yaml");
    if path.exists() {
        return Ok(Some(path));
    }

    if let Some(config_dir) = get_config_dir() {
        let global_config = config_dir.join("fleetwire.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// 指定ファイルから設定を読み込む
///
/// 相対パスは設定ファイルのあるディレクトリ基準で解決します。
pub fn load_from(path: &Path) -> Result<ProjectConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: ProjectConfig = if content.trim().is_empty() {
        ProjectConfig::default()
    } else {
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };
    config.validate()?;

    // `.fleetwire/fleetwire.yaml` の場合はプロジェクトルート基準
    let base = match path.parent() {
        Some(dir) if dir.file_name().is_some_and(|n| n == ".fleetwire") => {
            dir.parent().unwrap_or(dir).to_path_buf()
        }
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config.resolve_paths(&base))
}

/// 設定を探索して読み込む（見つからなければ既定値）
pub fn load() -> Result<(ProjectConfig, Option<PathBuf>)> {
    match find_config_file()? {
        Some(path) => Ok((load_from(&path)?, Some(path))),
        None => {
            let cwd = std::env::current_dir()?;
            Ok((ProjectConfig::default().resolve_paths(&cwd), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = ProjectConfig::default();
        assert_eq!(config.namespace, "otel-demo");
        assert_eq!(config.rollout_timeout_secs, 300);
        assert_eq!(config.warmup_timeout_secs, 20);
        assert_eq!(config.host_parallelism, 4);
        assert_eq!(config.remote.transport, RemoteTransport::Ssh);
        assert_eq!(config.remote.ssh_user, "azureuser");
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("fleetwire.yaml");
        fs::write(
            &path,
            "namespace: shop\nhost_parallelism: 2\nremote:\n  transport: az-run-command\n",
        )
        .unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.namespace, "shop");
        assert_eq!(config.host_parallelism, 2);
        assert_eq!(config.remote.transport, RemoteTransport::AzRunCommand);
        // 未指定の値は既定値
        assert_eq!(config.image_tag, "latest");
        assert_eq!(config.infra_dir, temp_dir.path().join("infra"));
    }

    #[test]
    fn test_load_empty_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("fleetwire.yaml");
        fs::write(&path, "").unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.namespace, "otel-demo");
    }

    #[test]
    fn test_parse_error_names_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("fleetwire.yaml");
        fs::write(&path, "host_parallelism: many\n").unwrap();

        let err = load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("fleetwire.yaml"));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("fleetwire.yaml");
        fs::write(&path, "host_parallelism: 0\n").unwrap();

        assert!(matches!(
            load_from(&path),
            Err(ConfigError::InvalidValue {
                field: "host_parallelism",
                ..
            })
        ));
    }

    #[test]
    fn test_project_dir_resolves_from_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let project_dir = temp_dir.path().join(".fleetwire");
        fs::create_dir(&project_dir).unwrap();
        let path = project_dir.join("fleetwire.yaml");
        fs::write(&path, "manifests_dir: deploy/k8s\n").unwrap();

        let config = load_from(&path).unwrap();
        assert_eq!(config.manifests_dir, temp_dir.path().join("deploy/k8s"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("fleetwire.yaml"), "namespace: a\n").unwrap();
        fs::write(temp_dir.path().join(".fleetwire.yaml"), "namespace: b\n").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();

        let found = temp_env::with_var_unset(CONFIG_ENV, find_config_file)
            .unwrap()
            .unwrap();
        // 隠しファイルより通常ファイルが優先
        assert!(found.ends_with("fleetwire.yaml"));
        assert!(!found.ends_with(".fleetwire.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "namespace: custom\n").unwrap();

        let found = temp_env::with_var(CONFIG_ENV, Some(config_path.as_os_str()), || {
            find_config_file()
        })
        .unwrap();
        assert_eq!(found, Some(config_path));
    }

    #[test]
    #[serial]
    fn test_load_without_file_uses_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        // HOMEとXDGを一時ディレクトリに向けてグローバル設定を無効化
        let (config, path) = temp_env::with_vars(
            [
                (CONFIG_ENV, None),
                ("HOME", Some(temp_dir.path().as_os_str())),
                ("XDG_CONFIG_HOME", Some(temp_dir.path().as_os_str())),
            ],
            load,
        )
        .unwrap();
        assert!(path.is_none());
        assert_eq!(config.namespace, "otel-demo");

        std::env::set_current_dir(original_dir).unwrap();
    }
}
