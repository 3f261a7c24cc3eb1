#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use application::{
    ChatService, ChatServiceDependencies, ChatTransport, MessageListener, SessionListListener,
    SystemClock, TransportError,
};
use async_trait::async_trait;
use config::MessagingConfig;
use domain::{CreatedSession, Message, MessageId, OutgoingMessage, Session, SessionId};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 一次发送尝试的记录
#[derive(Debug, Clone)]
pub struct SendAttempt {
    pub content: String,
    pub at: Instant,
    pub delivered: bool,
}

enum PollScript {
    Respond,
    Fail,
    Hold,
}

#[derive(Default)]
struct FakeState {
    messages: HashMap<SessionId, Vec<Message>>,
    sessions: Vec<Session>,
    poll_failures: HashMap<String, u32>,
    hold_polls: bool,
    send_failures: HashMap<String, u32>,
    send_cancellations: HashMap<String, u32>,
    reject_create: Option<String>,
    reject_status: Option<String>,
    next_message_id: u64,
    poll_tokens: Vec<(String, CancellationToken)>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    send_attempts: Vec<SendAttempt>,
    create_calls: usize,
    status_updates: Vec<(SessionId, bool)>,
}

/// 内存中的传输层，按脚本返回成功、失败或一直挂起直到被取消
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// 接下来 `times` 次对 `key` 的轮询返回网络错误
    pub fn fail_polls(&self, key: &str, times: u32) {
        self.lock().poll_failures.insert(key.to_owned(), times);
    }

    /// 之后的轮询一直挂起，直到令牌被取消
    pub fn hold_polls(&self) {
        self.lock().hold_polls = true;
    }

    /// 内容为 `content` 的消息接下来 `times` 次发送失败，`u32::MAX` 表示永远失败
    pub fn fail_sends(&self, content: &str, times: u32) {
        self.lock().send_failures.insert(content.to_owned(), times);
    }

    /// 内容为 `content` 的消息接下来 `times` 次发送以取消结束
    pub fn cancel_sends(&self, content: &str, times: u32) {
        self.lock().send_cancellations.insert(content.to_owned(), times);
    }

    pub fn reject_create_session(&self, reason: &str) {
        self.lock().reject_create = Some(reason.to_owned());
    }

    pub fn reject_status_update(&self, reason: &str) {
        self.lock().reject_status = Some(reason.to_owned());
    }

    pub fn add_session(&self, session: Session) {
        self.lock().sessions.push(session);
    }

    pub fn poll_count(&self, key: &str) -> usize {
        self.poll_tokens(key).len()
    }

    pub fn poll_tokens(&self, key: &str) -> Vec<CancellationToken> {
        self.lock()
            .poll_tokens
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, token)| token.clone())
            .collect()
    }

    pub fn max_in_flight(&self, key: &str) -> usize {
        self.lock().max_in_flight.get(key).copied().unwrap_or(0)
    }

    pub fn send_attempts(&self) -> Vec<SendAttempt> {
        self.lock().send_attempts.clone()
    }

    /// 所有发送尝试的内容，按发生顺序
    pub fn attempted_contents(&self) -> Vec<String> {
        self.send_attempts().into_iter().map(|a| a.content).collect()
    }

    /// 成功送达的内容，按发生顺序
    pub fn delivered_contents(&self) -> Vec<String> {
        self.send_attempts()
            .into_iter()
            .filter(|a| a.delivered)
            .map(|a| a.content)
            .collect()
    }

    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    pub fn status_updates(&self) -> Vec<(SessionId, bool)> {
        self.lock().status_updates.clone()
    }

    fn record_poll(&self, key: &str, cancel: &CancellationToken) -> PollScript {
        let mut state = self.lock();
        state.poll_tokens.push((key.to_owned(), cancel.clone()));

        if let Some(remaining) = state.poll_failures.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return PollScript::Fail;
            }
        }
        if state.hold_polls {
            PollScript::Hold
        } else {
            PollScript::Respond
        }
    }

    async fn hold(&self, key: &str, cancel: &CancellationToken) -> TransportError {
        let _in_flight = InFlight::enter(self, key);
        cancel.cancelled().await;
        TransportError::Cancelled
    }
}

/// 记录同一个键同时在途的请求数
struct InFlight<'a> {
    transport: &'a FakeTransport,
    key: String,
}

impl<'a> InFlight<'a> {
    fn enter(transport: &'a FakeTransport, key: &str) -> Self {
        {
            let mut state = transport.lock();
            let current = {
                let count = state.in_flight.entry(key.to_owned()).or_insert(0);
                *count += 1;
                *count
            };
            let max = state.max_in_flight.entry(key.to_owned()).or_insert(0);
            *max = (*max).max(current);
        }
        Self {
            transport,
            key: key.to_owned(),
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.transport.lock().in_flight.get_mut(&self.key) {
            *count = count.saturating_sub(1);
        }
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn create_session(
        &self,
        contact_info: &str,
        initial_message: &str,
        _cancel: &CancellationToken,
    ) -> Result<CreatedSession, TransportError> {
        let mut state = self.lock();
        state.create_calls += 1;
        if let Some(reason) = state.reject_create.clone() {
            return Err(TransportError::rejected(reason));
        }

        let session_id = SessionId::new(format!("s{}", state.create_calls));
        let session = Session {
            id: session_id.clone(),
            contact_info: contact_info.to_owned(),
            is_active: true,
            last_message_at: None,
            created_at: None,
        };
        state.next_message_id += 1;
        let message = Message {
            id: MessageId::new(format!("m{}", state.next_message_id)),
            session_id: session_id.clone(),
            content: initial_message.to_owned(),
            is_admin: false,
            timestamp: chrono::Utc::now(),
        };
        state.sessions.push(session.clone());
        state
            .messages
            .entry(session_id)
            .or_default()
            .push(message.clone());

        Ok(CreatedSession { session, message })
    }

    async fn send_message(
        &self,
        message: &OutgoingMessage,
        _cancel: &CancellationToken,
    ) -> Result<Message, TransportError> {
        let mut state = self.lock();

        if let Some(remaining) = state.send_cancellations.get_mut(&message.content) {
            if *remaining > 0 {
                *remaining -= 1;
                state.send_attempts.push(SendAttempt {
                    content: message.content.clone(),
                    at: Instant::now(),
                    delivered: false,
                });
                return Err(TransportError::Cancelled);
            }
        }

        let failing = match state.send_failures.get_mut(&message.content) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                true
            }
            _ => false,
        };
        state.send_attempts.push(SendAttempt {
            content: message.content.clone(),
            at: Instant::now(),
            delivered: !failing,
        });
        if failing {
            return Err(TransportError::network("simulated outage"));
        }

        state.next_message_id += 1;
        let confirmed = Message {
            id: MessageId::new(format!("m{}", state.next_message_id)),
            session_id: message.session_id.clone(),
            content: message.content.clone(),
            is_admin: message.is_admin,
            timestamp: chrono::Utc::now(),
        };
        state
            .messages
            .entry(message.session_id.clone())
            .or_default()
            .push(confirmed.clone());
        Ok(confirmed)
    }

    async fn get_messages(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, TransportError> {
        match self.record_poll(session_id.as_str(), cancel) {
            PollScript::Fail => Err(TransportError::network("simulated outage")),
            PollScript::Hold => Err(self.hold(session_id.as_str(), cancel).await),
            PollScript::Respond => Ok(self
                .lock()
                .messages
                .get(session_id)
                .cloned()
                .unwrap_or_default()),
        }
    }

    async fn get_admin_sessions(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Session>, TransportError> {
        let key = domain::ADMIN_SESSIONS_KEY;
        match self.record_poll(key, cancel) {
            PollScript::Fail => Err(TransportError::network("simulated outage")),
            PollScript::Hold => Err(self.hold(key, cancel).await),
            PollScript::Respond => Ok(self.lock().sessions.clone()),
        }
    }

    async fn update_session_status(
        &self,
        session_id: &SessionId,
        is_active: bool,
        _cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        if let Some(reason) = state.reject_status.clone() {
            return Err(TransportError::rejected(reason));
        }
        state.status_updates.push((session_id.clone(), is_active));
        if let Some(session) = state.sessions.iter_mut().find(|s| &s.id == session_id) {
            session.is_active = is_active;
        }
        Ok(())
    }
}

pub fn test_config() -> MessagingConfig {
    MessagingConfig::default()
}

pub fn chat_service(transport: Arc<FakeTransport>) -> ChatService {
    chat_service_with_config(transport, test_config())
}

pub fn chat_service_with_config(
    transport: Arc<FakeTransport>,
    config: MessagingConfig,
) -> ChatService {
    ChatService::new(ChatServiceDependencies {
        transport,
        clock: Arc::new(SystemClock),
        config,
    })
    .unwrap()
}

pub fn collect_messages() -> (MessageListener, Arc<Mutex<Vec<Vec<Message>>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let listener: MessageListener = Arc::new(move |messages: &Vec<Message>| {
        sink.lock().unwrap().push(messages.clone());
    });
    (listener, received)
}

pub fn collect_sessions() -> (SessionListListener, Arc<Mutex<Vec<Vec<Session>>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let listener: SessionListListener = Arc::new(move |sessions: &Vec<Session>| {
        sink.lock().unwrap().push(sessions.clone());
    });
    (listener, received)
}

/// 让出执行权，使已就绪的后台任务跑完当前一步
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn session(id: &str, contact_info: &str) -> Session {
    Session {
        id: SessionId::from(id),
        contact_info: contact_info.to_owned(),
        is_active: true,
        last_message_at: None,
        created_at: None,
    }
}
