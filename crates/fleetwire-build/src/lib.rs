//! fleetwire image build
//!
//! サービスのソースからイメージをビルドし、プロビジョニング済みの
//! コンテナレジストリへ公開します。ビルドコンテキストの作成、bollard による
//! ビルドとプッシュ、レジストリ認証を含みます。

pub mod auth;
pub mod backend;
pub mod builder;
pub mod context;
pub mod error;
pub mod progress;
pub mod publisher;
pub mod pusher;

pub use auth::RegistryAuth;
pub use backend::{DockerBackend, ImageBackend};
pub use builder::{BuildOptions, ImageBuilder};
pub use context::{BuildContext, ContextBuilder};
pub use error::{BuildError, BuildResult};
pub use progress::BuildProgress;
pub use publisher::{ImagePublisher, ImageReference};
pub use pusher::{ImagePusher, resolve_tag, split_image_tag, validate_tag};
