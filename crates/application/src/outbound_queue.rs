//! 出站消息队列
//!
//! 单个消费任务按入队顺序把消息交给传输层。失败的消息带着新的入队时间
//! 重新排队，超过重试上限后丢弃并记录日志。队列只存在于内存中。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use config::MessagingConfig;
use domain::{OutgoingMessage, SessionId, SubscriptionKey};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::cancellation::CancellationRegistry;
use crate::poller::Poller;
use crate::rate_limiter::RateLimiter;
use crate::transport::{ChatTransport, TransportError};

/// 所有发送共用的限流键
pub const SEND_RATE_KEY: &str = "send-message";

/// 发送操作的取消键，按会话区分
pub fn send_cancel_key(session_id: &SessionId) -> String {
    format!("{SEND_RATE_KEY}-{session_id}")
}

/// 队列中等待投递的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub message: OutgoingMessage,
    pub enqueued_at: Instant,
    pub retry_count: u32,
}

/// 队列统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub delivered: u64,
    pub retried: u64,
    pub dropped: u64,
}

pub struct OutboundQueueDependencies {
    pub config: MessagingConfig,
    pub transport: Arc<dyn ChatTransport>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cancellations: Arc<CancellationRegistry>,
    pub poller: Poller,
}

#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    deps: OutboundQueueDependencies,
    pending: Mutex<VecDeque<QueuedMessage>>,
    /// 唯一的消费任务
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    delivered: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(deps: OutboundQueueDependencies) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                deps,
                pending: Mutex::new(VecDeque::new()),
                worker: Mutex::new(None),
                closed: AtomicBool::new(false),
                delivered: AtomicU64::new(0),
                retried: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// 追加到队尾并立即返回
    pub fn enqueue(&self, message: OutgoingMessage) {
        if self.inner.closed.load(Ordering::Acquire) {
            tracing::warn!(
                session_id = %message.session_id,
                "outbound queue is shut down, message discarded"
            );
            return;
        }

        self.inner.pending().push_back(QueuedMessage {
            message,
            enqueued_at: Instant::now(),
            retry_count: 0,
        });
        self.inner.ensure_worker();
    }

    pub fn len(&self) -> usize {
        self.inner.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pending().is_empty()
    }

    /// 当前排队消息的快照（按投递顺序）
    pub fn pending(&self) -> Vec<QueuedMessage> {
        self.inner.pending().iter().cloned().collect()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.len(),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            retried: self.inner.retried.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    /// 停止消费任务并丢弃未发送的消息
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(worker) = self.inner.worker().take() {
            worker.abort();
        }

        let discarded = {
            let mut pending = self.inner.pending();
            let count = pending.len();
            pending.clear();
            count
        };
        if discarded > 0 {
            tracing::warn!(discarded, "outbound queue shut down with undelivered messages");
        }
    }
}

impl QueueInner {
    fn pending(&self) -> MutexGuard<'_, VecDeque<QueuedMessage>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 消费任务已在运行时什么也不做
    fn ensure_worker(self: &Arc<Self>) {
        let mut worker = self.worker();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *worker = Some(tokio::spawn(self.clone().run()));
    }

    async fn run(self: Arc<Self>) {
        loop {
            let next = self.pending().pop_front();
            match next {
                Some(queued) => self.dispatch(queued).await,
                None => sleep(self.deps.config.idle_poll()).await,
            }
        }
    }

    async fn dispatch(&self, queued: QueuedMessage) {
        self.deps.rate_limiter.rate_limit(SEND_RATE_KEY).await;

        let key = send_cancel_key(&queued.message.session_id);
        let operation = self.deps.cancellations.begin(&key);
        let result = self
            .deps
            .transport
            .send_message(&queued.message, operation.token())
            .await;
        self.deps.cancellations.release(&key, &operation);

        match result {
            Ok(confirmed) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    session_id = %queued.message.session_id,
                    message_id = %confirmed.id,
                    retry_count = queued.retry_count,
                    "message delivered"
                );
                let key = SubscriptionKey::Session(queued.message.session_id);
                self.deps.poller.trigger(&key);
            }
            Err(err) if err.is_cancelled() || operation.is_cancelled() => {
                tracing::debug!(
                    session_id = %queued.message.session_id,
                    "send cancelled, message kept at the head of the queue"
                );
                self.pending().push_front(queued);
            }
            Err(err) => self.handle_failure(queued, err),
        }
    }

    fn handle_failure(&self, mut queued: QueuedMessage, err: TransportError) {
        let max_retries = self.deps.config.max_retries;
        if queued.retry_count >= max_retries {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                session_id = %queued.message.session_id,
                retry_count = queued.retry_count,
                error = %err,
                "message dropped after exhausting retries"
            );
            return;
        }

        queued.retry_count += 1;
        queued.enqueued_at = Instant::now();
        self.retried.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            session_id = %queued.message.session_id,
            retry_count = queued.retry_count,
            max_retries,
            error = %err,
            "send failed, message re-queued"
        );

        let mut pending = self.pending();
        pending.push_back(queued);
        // 稳定排序：同一时刻入队的消息保持原有先后
        pending
            .make_contiguous()
            .sort_by_key(|queued| queued.enqueued_at);
    }
}
