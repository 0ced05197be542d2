use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("サービス '{service}' は環境変数 {key} を受け付けません")]
    UnrecognizedEnvKey { service: String, key: &'static str },
}

pub type Result<T> = std::result::Result<T, CoreError>;
