use thiserror::Error;

use crate::transport::TransportError;

/// 构造服务或非排队操作（创建会话、更新会话状态）返回给调用方的错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplicationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl ApplicationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApplicationError::Cancelled)
    }
}

impl From<config::ConfigError> for ApplicationError {
    fn from(value: config::ConfigError) -> Self {
        ApplicationError::InvalidConfig(value.to_string())
    }
}

impl From<TransportError> for ApplicationError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Cancelled => ApplicationError::Cancelled,
            other => ApplicationError::Transport(other),
        }
    }
}
