//! イメージプッシュ処理
//!
//! ビルドしたイメージをコンテナレジストリにプッシュします。
//! 同じタグへの再プッシュはレジストリ側のタグを上書きします。

use crate::error::{BuildError, BuildResult};
use crate::progress::BuildProgress;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::models::PushImageInfo;
use futures_util::StreamExt;

/// イメージプッシュを実行するハンドラ
pub struct ImagePusher {
    docker: Docker,
}

impl ImagePusher {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// イメージをレジストリにプッシュ
    ///
    /// `image` はレジストリ込み・タグ付きの参照
    pub async fn push(
        &self,
        image: &str,
        credentials: Option<DockerCredentials>,
        progress: &BuildProgress,
    ) -> BuildResult<()> {
        let (repository, tag) = split_image_tag(image);
        validate_tag(&tag)?;

        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> { tag: tag.clone() };

        tracing::info!("Pushing image: {}", image);
        progress.step(&format!("Pushing {}", image));

        #[allow(deprecated)]
        let mut stream = self
            .docker
            .push_image(&repository, Some(options), credentials);

        let mut error_message: Option<String> = None;

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(err) = info.error {
                        error_message = Some(err);
                    } else {
                        handle_progress(&info, progress);
                    }
                }
                Err(e) => {
                    return Err(BuildError::PushFailed {
                        image: image.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(message) = error_message {
            return Err(BuildError::PushFailed {
                image: image.to_string(),
                message,
            });
        }

        tracing::info!("Pushed: {}", image);
        Ok(())
    }
}

/// プッシュ進捗を表示
fn handle_progress(info: &PushImageInfo, progress: &BuildProgress) {
    if let Some(status) = &info.status {
        match status.as_str() {
            // 準備中は表示をスキップ（ノイズ軽減）
            "Preparing" | "Waiting" => {}
            "Pushing" => {
                let detail = info.progress.as_deref().unwrap_or("");
                progress.step(&format!("↑ Pushing {}", detail));
            }
            other => progress.step(other),
        }
    }
}

/// タグのバリデーション
///
/// Docker タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
pub fn validate_tag(tag: &str) -> BuildResult<()> {
    if tag.is_empty() {
        return Err(BuildError::InvalidTag {
            tag: "(empty)".to_string(),
        });
    }

    if tag.len() > 128 {
        return Err(BuildError::InvalidTag {
            tag: format!("Tag too long ({} characters, max 128)", tag.len()),
        });
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(BuildError::InvalidTag {
            tag: tag.to_string(),
        });
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '.' && *c != '-' && *c != '_')
    {
        return Err(BuildError::InvalidTag {
            tag: format!("Invalid character '{}' in tag: {}", c, tag),
        });
    }

    Ok(())
}

/// イメージ名とタグを分離
///
/// - `oteldemo.azurecr.io/order-service:v1` -> `("oteldemo.azurecr.io/order-service", "v1")`
/// - `oteldemo.azurecr.io/order-service` -> `("oteldemo.azurecr.io/order-service", "latest")`
/// - `localhost:5000/app` -> `("localhost:5000/app", "latest")`
pub fn split_image_tag(image: &str) -> (String, String) {
    if let Some(pos) = image.rfind(':') {
        let potential_tag = &image[pos + 1..];
        let potential_image = &image[..pos];

        // localhost:5000/app のようにレジストリのポート番号の場合はタグではない
        if !potential_tag.contains('/') && !potential_tag.chars().all(|c| c.is_ascii_digit()) {
            return (potential_image.to_string(), potential_tag.to_string());
        }
    }

    (image.to_string(), "latest".to_string())
}

/// タグを解決
///
/// 1. CLI `--tag` オプション（最優先）
/// 2. 設定ファイルの image_tag
/// 3. デフォルト: "latest"
pub fn resolve_tag(cli_tag: Option<&str>, configured: Option<&str>) -> String {
    cli_tag
        .or(configured)
        .filter(|t| !t.is_empty())
        .unwrap_or("latest")
        .to_string()
}
