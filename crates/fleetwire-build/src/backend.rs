//! イメージ操作のバックエンド
//!
//! [`ImagePublisher`](crate::ImagePublisher) はこのトレイト越しにビルドと
//! プッシュを行います。本番では Docker Engine API（bollard）を使います。

use crate::auth::RegistryAuth;
use crate::builder::{BuildOptions, ImageBuilder};
use crate::context::ContextBuilder;
use crate::error::BuildResult;
use crate::progress::BuildProgress;
use crate::pusher::ImagePusher;
use async_trait::async_trait;
use bollard::Docker;
use fleetwire_core::RegistryCredentials;
use std::path::Path;

#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// `source_dir/Dockerfile` から `image` をビルド
    async fn build(&self, service: &str, source_dir: &Path, image: &str) -> BuildResult<()>;

    /// `image` をレジストリにプッシュ
    async fn push(&self, image: &str, credentials: Option<&RegistryCredentials>)
    -> BuildResult<()>;
}

/// Docker Engine API によるバックエンド
pub struct DockerBackend {
    builder: ImageBuilder,
    pusher: ImagePusher,
    auth: RegistryAuth,
    options: BuildOptions,
    show_progress: bool,
}

impl DockerBackend {
    /// ローカルの Docker デーモンに接続
    pub fn connect(options: BuildOptions) -> BuildResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            builder: ImageBuilder::new(docker.clone()),
            pusher: ImagePusher::new(docker),
            auth: RegistryAuth::new(),
            options,
            show_progress: true,
        })
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress(&self, service: &str) -> BuildProgress {
        if self.show_progress {
            BuildProgress::new(service)
        } else {
            BuildProgress::hidden()
        }
    }
}

#[async_trait]
impl ImageBackend for DockerBackend {
    async fn build(&self, service: &str, source_dir: &Path, image: &str) -> BuildResult<()> {
        let context = ContextBuilder::create_context(source_dir)?;
        let progress = self.progress(service);

        match self
            .builder
            .build_image(service, context, image, &self.options, &progress)
            .await
        {
            Ok(()) => {
                progress.finish_success(image);
                Ok(())
            }
            Err(e) => {
                progress.finish_error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn push(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> BuildResult<()> {
        let docker_credentials = self.auth.resolve(image, credentials).await?;
        let progress = self.progress(image);

        let result = self.pusher.push(image, docker_credentials, &progress).await;
        match &result {
            Ok(()) => progress.finish_success(image),
            Err(e) => progress.finish_error(&e.to_string()),
        }
        result
    }
}
