//! モデル定義
//!
//! fleetwireで使用されるデータモデルを定義します。
//! 各モデルは機能ごとにモジュールに分離されています。

mod abort;
mod endpoint;
mod env;
mod outputs;
mod port;
mod result;
mod sensitive;
mod service;

// Re-exports
pub use abort::*;
pub use endpoint::*;
pub use env::*;
pub use outputs::*;
pub use port::*;
pub use result::*;
pub use sensitive::*;
pub use service::*;
