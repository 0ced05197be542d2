//! fleetwire core
//!
//! パイプライン全体で共有されるデータモデルとサービスカタログを定義します。
//!
//! - [`Outputs`]: インフラの出力値スナップショット（読み取り専用）
//! - [`ServiceSpec`]: デプロイ単位の宣言
//! - [`EndpointMap`]: 実行中に解決されたエンドポイント
//! - [`ResultLog`]: ターゲットごとのデプロイ結果（並行追記可能）

pub mod catalogue;
pub mod error;
pub mod model;
pub mod shell;

pub use catalogue::{
    CatalogueOptions, Placement, ServiceId, build_specs, image_reference, secret_env,
};
pub use error::{CoreError, Result};
pub use model::*;
pub use shell::{shell_escape, shell_join};
