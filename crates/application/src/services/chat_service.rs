use std::sync::{Arc, Mutex, PoisonError};

use config::MessagingConfig;
use domain::{CreatedSession, Message, OutgoingMessage, SessionId, SubscriptionKey};

use crate::{
    cancellation::CancellationRegistry,
    clock::Clock,
    error::ApplicationError,
    outbound_queue::{OutboundQueue, OutboundQueueDependencies, QueueStats},
    poller::{MessageListener, Poller, PollerDependencies, PollingState, SessionListListener},
    rate_limiter::RateLimiter,
    subscription::SubscriptionRegistry,
    transport::ChatTransport,
};

/// 创建会话操作的限流/取消键
pub const CREATE_SESSION_KEY: &str = "create-session";
/// 更新会话状态操作的限流/取消键
pub const SESSION_STATUS_KEY: &str = "session-status";

pub struct ChatServiceDependencies {
    pub transport: Arc<dyn ChatTransport>,
    pub clock: Arc<dyn Clock>,
    pub config: MessagingConfig,
}

/// 聊天组件的消息引擎门面
///
/// 应用启动时构造一次，以引用或 `Arc` 传给各个 UI 组件；
/// 应用关闭时调用 [`ChatService::teardown`]。
pub struct ChatService {
    transport: Arc<dyn ChatTransport>,
    clock: Arc<dyn Clock>,
    rate_limiter: Arc<RateLimiter>,
    cancellations: Arc<CancellationRegistry>,
    session_listeners: Arc<SubscriptionRegistry<Vec<Message>>>,
    admin_listeners: Arc<SubscriptionRegistry<Vec<domain::Session>>>,
    poller: Poller,
    queue: OutboundQueue,
    /// 串行化"订阅/退订 + 启停轮询"，避免最后一个退订与第一个订阅交错
    lifecycle: Mutex<()>,
}

impl ChatService {
    /// 配置不合法（例如间隔为 0）时拒绝构造
    pub fn new(deps: ChatServiceDependencies) -> Result<Self, ApplicationError> {
        let ChatServiceDependencies {
            transport,
            clock,
            config,
        } = deps;
        config.validate()?;

        let rate_limiter = Arc::new(RateLimiter::new(config.min_spacing()));
        let cancellations = Arc::new(CancellationRegistry::new());
        let session_listeners = Arc::new(SubscriptionRegistry::new());
        let admin_listeners = Arc::new(SubscriptionRegistry::new());

        let poller = Poller::new(PollerDependencies {
            config: config.clone(),
            transport: transport.clone(),
            rate_limiter: rate_limiter.clone(),
            cancellations: cancellations.clone(),
            session_listeners: session_listeners.clone(),
            admin_listeners: admin_listeners.clone(),
        });

        let queue = OutboundQueue::new(OutboundQueueDependencies {
            config,
            transport: transport.clone(),
            rate_limiter: rate_limiter.clone(),
            cancellations: cancellations.clone(),
            poller: poller.clone(),
        });

        Ok(Self {
            transport,
            clock,
            rate_limiter,
            cancellations,
            session_listeners,
            admin_listeners,
            poller,
            queue,
            lifecycle: Mutex::new(()),
        })
    }

    pub fn subscribe_to_session(&self, session_id: &SessionId, listener: MessageListener) {
        let _guard = self.lifecycle();
        let key = SubscriptionKey::Session(session_id.clone());
        if self.session_listeners.subscribe(key.as_str(), listener) {
            self.poller.start(key);
        }
    }

    pub fn unsubscribe_from_session(&self, session_id: &SessionId, listener: &MessageListener) {
        let _guard = self.lifecycle();
        let key = SubscriptionKey::Session(session_id.clone());
        if self.session_listeners.unsubscribe(key.as_str(), listener) {
            self.poller.stop(&key);
        }
    }

    pub fn subscribe_to_admin_sessions(&self, listener: SessionListListener) {
        let _guard = self.lifecycle();
        let key = SubscriptionKey::AdminSessions;
        if self.admin_listeners.subscribe(key.as_str(), listener) {
            self.poller.start(key);
        }
    }

    pub fn unsubscribe_from_admin_sessions(&self, listener: &SessionListListener) {
        let _guard = self.lifecycle();
        let key = SubscriptionKey::AdminSessions;
        if self.admin_listeners.unsubscribe(key.as_str(), listener) {
            self.poller.stop(&key);
        }
    }

    /// 立即返回乐观回显，实际发送交给出站队列
    pub fn send(&self, session_id: &SessionId, content: impl Into<String>, is_admin: bool) -> Message {
        let content = content.into();
        let echo = Message::optimistic(
            session_id.clone(),
            content.clone(),
            is_admin,
            self.clock.now(),
        );

        tracing::debug!(session_id = %session_id, temp_id = %echo.id, "message queued for delivery");
        self.queue
            .enqueue(OutgoingMessage::new(session_id.clone(), content, is_admin));
        echo
    }

    /// 创建会话不排队也不重试，失败直接返回给调用方
    pub async fn create_session(
        &self,
        contact_info: &str,
        initial_message: &str,
    ) -> Result<CreatedSession, ApplicationError> {
        let operation = self.cancellations.begin(CREATE_SESSION_KEY);
        self.rate_limiter.rate_limit(CREATE_SESSION_KEY).await;

        let result = self
            .transport
            .create_session(contact_info, initial_message, operation.token())
            .await;
        self.cancellations.release(CREATE_SESSION_KEY, &operation);

        if operation.is_cancelled() {
            return Err(ApplicationError::Cancelled);
        }
        let created = result.map_err(|err| {
            tracing::warn!(error = %err, "create session failed");
            ApplicationError::from(err)
        })?;

        tracing::info!(session_id = %created.session.id, "chat session created");
        Ok(created)
    }

    /// 更新会话状态，成功后立即刷新管理后台的会话列表
    pub async fn update_session_status(
        &self,
        session_id: &SessionId,
        is_active: bool,
    ) -> Result<(), ApplicationError> {
        let operation = self.cancellations.begin(SESSION_STATUS_KEY);
        self.rate_limiter.rate_limit(SESSION_STATUS_KEY).await;

        let result = self
            .transport
            .update_session_status(session_id, is_active, operation.token())
            .await;
        self.cancellations.release(SESSION_STATUS_KEY, &operation);

        if operation.is_cancelled() {
            return Err(ApplicationError::Cancelled);
        }
        result.map_err(|err| {
            tracing::warn!(session_id = %session_id, error = %err, "update session status failed");
            ApplicationError::from(err)
        })?;

        tracing::info!(session_id = %session_id, is_active, "session status updated");
        self.poller.trigger(&SubscriptionKey::AdminSessions);
        Ok(())
    }

    /// 关闭时调用：停止所有轮询、关闭队列、取消全部令牌、清空监听器
    pub fn teardown(&self) {
        let _guard = self.lifecycle();
        self.poller.stop_all();
        self.queue.shutdown();
        self.cancellations.cancel_all();
        self.session_listeners.clear();
        self.admin_listeners.clear();
        tracing::info!("chat service torn down");
    }

    pub fn polling_state(&self, key: &SubscriptionKey) -> Option<PollingState> {
        self.poller.state(key)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
