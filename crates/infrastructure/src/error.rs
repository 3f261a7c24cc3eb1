use thiserror::Error;

/// 构造适配器时的错误
#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("invalid base url {url}: {message}")]
    InvalidBaseUrl { url: String, message: String },
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}
