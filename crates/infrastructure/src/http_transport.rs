//! 基于 reqwest 的聊天传输层
//!
//! 服务端所有响应都包在 `{ success, data?, message? }` 信封里。
//! 每个请求都与取消令牌竞争，令牌取消后立即放弃请求并返回 `Cancelled`。

use std::future::Future;

use application::{ChatTransport, TransportError};
use async_trait::async_trait;
use config::TransportConfig;
use domain::{CreatedSession, Message, OutgoingMessage, Session, SessionId};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::InfrastructureError;

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest<'a> {
    contact_info: &'a str,
    initial_message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStatusRequest {
    is_active: bool,
}

#[derive(Deserialize)]
struct SessionList {
    sessions: Vec<Session>,
}

pub struct HttpChatTransport {
    client: Client,
    base_url: Url,
}

impl HttpChatTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, InfrastructureError> {
        let base_url =
            Url::parse(config.base_url.trim_end_matches('/')).map_err(|err| {
                InfrastructureError::InvalidBaseUrl {
                    url: config.base_url.clone(),
                    message: err.to_string(),
                }
            })?;
        if base_url.cannot_be_a_base() {
            return Err(InfrastructureError::InvalidBaseUrl {
                url: config.base_url.clone(),
                message: "url cannot be used as a base".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        tracing::debug!(base_url = %base_url, "http chat transport ready");
        Ok(Self { client, base_url })
    }

    /// 在基础地址后追加路径段，路径段会被转义
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn session_messages_url(&self, session_id: &SessionId) -> Url {
        self.endpoint(&["chat", "sessions", session_id.as_str(), "messages"])
    }

    /// 发送请求并解开信封，返回 `data` 字段（可能缺失）
    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, TransportError> {
        let response = race(cancel, request.send())
            .await?
            .map_err(|err| TransportError::network(err.to_string()))?;

        let status = response.status();
        let body = race(cancel, response.bytes())
            .await?
            .map_err(|err| TransportError::network(err.to_string()))?;

        match serde_json::from_slice::<ApiEnvelope<T>>(&body) {
            Ok(envelope) if envelope.success => Ok(envelope.data),
            Ok(envelope) => Err(TransportError::rejected(
                envelope.message.unwrap_or_else(|| status.to_string()),
            )),
            Err(_) if !status.is_success() => {
                Err(TransportError::network(format!("server responded with {status}")))
            }
            Err(err) => Err(TransportError::decode(err.to_string())),
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<T, TransportError> {
        self.execute(request, cancel)
            .await?
            .ok_or_else(|| TransportError::decode("response is missing data"))
    }
}

/// 令牌先取消时丢弃 `future`
async fn race<F: Future>(cancel: &CancellationToken, future: F) -> Result<F::Output, TransportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        output = future => Ok(output),
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn create_session(
        &self,
        contact_info: &str,
        initial_message: &str,
        cancel: &CancellationToken,
    ) -> Result<CreatedSession, TransportError> {
        let request = self
            .client
            .post(self.endpoint(&["chat", "sessions"]))
            .json(&CreateSessionRequest {
                contact_info,
                initial_message,
            });
        self.fetch(request, cancel).await
    }

    async fn send_message(
        &self,
        message: &OutgoingMessage,
        cancel: &CancellationToken,
    ) -> Result<Message, TransportError> {
        let request = self
            .client
            .post(self.session_messages_url(&message.session_id))
            .json(message);
        self.fetch(request, cancel).await
    }

    async fn get_messages(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, TransportError> {
        let request = self.client.get(self.session_messages_url(session_id));
        self.fetch(request, cancel).await
    }

    async fn get_admin_sessions(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Session>, TransportError> {
        let request = self
            .client
            .get(self.endpoint(&["admin", "chat", "sessions"]));
        let list: SessionList = self.fetch(request, cancel).await?;
        Ok(list.sessions)
    }

    async fn update_session_status(
        &self,
        session_id: &SessionId,
        is_active: bool,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let request = self
            .client
            .patch(self.endpoint(&["admin", "chat", "sessions", session_id.as_str()]))
            .json(&UpdateStatusRequest { is_active });
        self.execute::<IgnoredAny>(request, cancel).await?;
        Ok(())
    }
}
