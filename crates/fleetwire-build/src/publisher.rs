//! イメージ公開
//!
//! サービスごとにソースからイメージをビルドし、出力値のレジストリへプッシュします。
//! 同じ (サービス, タグ) の再公開は再ビルド・再プッシュでタグを上書きします。

use crate::backend::ImageBackend;
use crate::error::{BuildError, BuildResult};
use crate::pusher::validate_tag;
use fleetwire_core::{Outputs, Registry, ServiceId, ServiceSpec};
use std::sync::Arc;

/// 公開済みイメージの参照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub service: ServiceId,
    pub tag: String,
}

impl ImageReference {
    pub fn new(registry: impl Into<String>, service: ServiceId, tag: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            service,
            tag: tag.into(),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.service.name(), self.tag)
    }
}

pub struct ImagePublisher {
    backend: Arc<dyn ImageBackend>,
    registry: Registry,
}

impl ImagePublisher {
    /// レジストリが出力値にない場合は公開できない
    pub fn new(backend: Arc<dyn ImageBackend>, outputs: &Outputs) -> BuildResult<Self> {
        let registry = outputs
            .registry()
            .cloned()
            .ok_or(BuildError::RegistryNotProvisioned)?;
        Ok(Self { backend, registry })
    }

    /// 1サービスをビルドしてプッシュ
    pub async fn publish(&self, spec: &ServiceSpec, tag: &str) -> BuildResult<ImageReference> {
        validate_tag(tag)?;
        let reference = ImageReference::new(&self.registry.login_server, spec.id, tag);
        let image = reference.to_string();

        self.backend
            .build(spec.name(), &spec.source_dir, &image)
            .await?;
        self.backend
            .push(&image, self.registry.credentials.as_ref())
            .await?;

        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleetwire_core::{RegistryCredentials, Sensitive, TargetKind};
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
        fail_build: Option<&'static str>,
        fail_push: bool,
    }

    #[async_trait]
    impl ImageBackend for RecordingBackend {
        async fn build(&self, service: &str, _source_dir: &Path, image: &str) -> BuildResult<()> {
            if self.fail_build == Some(service) {
                return Err(BuildError::BuildFailed {
                    service: service.to_string(),
                    message: "exit code 1".to_string(),
                });
            }
            self.calls.lock().unwrap().push(format!("build {}", image));
            Ok(())
        }

        async fn push(
            &self,
            image: &str,
            credentials: Option<&RegistryCredentials>,
        ) -> BuildResult<()> {
            if self.fail_push {
                return Err(BuildError::PushFailed {
                    image: image.to_string(),
                    message: "unauthorized".to_string(),
                });
            }
            let user = credentials.map(|c| c.username.as_str()).unwrap_or("-");
            self.calls
                .lock()
                .unwrap()
                .push(format!("push {} as {}", image, user));
            Ok(())
        }
    }

    fn outputs() -> Outputs {
        Outputs::builder("rg")
            .registry(Registry {
                login_server: "oteldemo.azurecr.io".to_string(),
                credentials: Some(RegistryCredentials {
                    username: "oteldemo".to_string(),
                    password: Sensitive::new("pw"),
                }),
            })
            .build()
    }

    fn spec(id: ServiceId) -> ServiceSpec {
        ServiceSpec::new(id, "", TargetKind::Cluster)
    }

    #[tokio::test]
    async fn test_publish_builds_then_pushes() {
        let backend = Arc::new(RecordingBackend::default());
        let publisher = ImagePublisher::new(backend.clone(), &outputs()).unwrap();

        let reference = publisher
            .publish(&spec(ServiceId::OrderService), "v1")
            .await
            .unwrap();
        assert_eq!(reference.to_string(), "oteldemo.azurecr.io/order-service:v1");

        let calls = backend.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                "build oteldemo.azurecr.io/order-service:v1".to_string(),
                "push oteldemo.azurecr.io/order-service:v1 as oteldemo".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_republish_same_tag_rebuilds() {
        let backend = Arc::new(RecordingBackend::default());
        let publisher = ImagePublisher::new(backend.clone(), &outputs()).unwrap();

        publisher.publish(&spec(ServiceId::EventProcessor), "latest").await.unwrap();
        publisher.publish(&spec(ServiceId::EventProcessor), "latest").await.unwrap();

        assert_eq!(backend.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_push_failure_is_reported() {
        let backend = Arc::new(RecordingBackend {
            fail_push: true,
            ..Default::default()
        });
        let publisher = ImagePublisher::new(backend, &outputs()).unwrap();

        let err = publisher
            .publish(&spec(ServiceId::ApiGateway), "v1")
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::PushFailed { .. }));
    }

    #[test]
    fn test_registry_required() {
        let backend = Arc::new(RecordingBackend::default());
        let outputs = Outputs::builder("rg").build();
        assert!(matches!(
            ImagePublisher::new(backend, &outputs),
            Err(BuildError::RegistryNotProvisioned)
        ));
    }

    #[tokio::test]
    async fn test_invalid_tag_rejected_before_build() {
        let backend = Arc::new(RecordingBackend::default());
        let publisher = ImagePublisher::new(backend.clone(), &outputs()).unwrap();

        assert!(matches!(
            publisher.publish(&spec(ServiceId::OrderService), "bad tag").await,
            Err(BuildError::InvalidTag { .. })
        ));
        assert!(backend.calls.lock().unwrap().is_empty());
    }
}
