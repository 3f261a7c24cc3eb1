use async_trait::async_trait;
use domain::{CreatedSession, Message, OutgoingMessage, Session, SessionId};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// 传输层错误
///
/// `Cancelled` 表示请求被新的同键请求取代或被拆除，它不是失败，
/// 不会触发退避或重试。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,
    #[error("network failure: {0}")]
    Network(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// 聊天服务端的请求/响应契约。
///
/// 每个调用都带一个取消令牌；实现方应在令牌被取消时尽快放弃请求并返回
/// [`TransportError::Cancelled`]。
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn create_session(
        &self,
        contact_info: &str,
        initial_message: &str,
        cancel: &CancellationToken,
    ) -> Result<CreatedSession, TransportError>;

    async fn send_message(
        &self,
        message: &OutgoingMessage,
        cancel: &CancellationToken,
    ) -> Result<Message, TransportError>;

    async fn get_messages(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, TransportError>;

    async fn get_admin_sessions(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Session>, TransportError>;

    async fn update_session_status(
        &self,
        session_id: &SessionId,
        is_active: bool,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError>;
}
