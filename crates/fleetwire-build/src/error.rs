use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Build failed for {service}: {message}")]
    BuildFailed { service: String, message: String },

    #[error("Push failed for {image}: {message}")]
    PushFailed { image: String, message: String },

    #[error("Invalid tag: {tag}")]
    InvalidTag { tag: String },

    #[error("Registry authentication failed for {registry}: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("Container registry is not provisioned")]
    RegistryNotProvisioned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::DockerfileNotFound(path) => {
                format!(
                    "Dockerfileが見つかりません: {}\n\
                     \n\
                     解決方法:\n\
                     1. services_dir の設定を確認してください\n\
                     2. サービスのディレクトリ直下に Dockerfile を配置してください",
                    path.display()
                )
            }
            BuildError::BuildFailed { service, message } => {
                format!(
                    "{} のビルドに失敗しました: {}\n\
                     \n\
                     Dockerfileの内容を確認してください。",
                    service, message
                )
            }
            BuildError::PushFailed { image, message } => {
                format!(
                    "{} のプッシュに失敗しました: {}\n\
                     \n\
                     レジストリの認証情報（acr_admin_username / acr_admin_password）を確認してください。",
                    image, message
                )
            }
            BuildError::RegistryNotProvisioned => "コンテナレジストリがプロビジョニングされていません。\n\
                 \n\
                 terraform の出力に acr_login_server が含まれているか確認してください。"
                .to_string(),
            _ => format!("{}", self),
        }
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
