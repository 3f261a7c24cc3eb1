//! 自适应轮询
//!
//! 每个订阅键一个独立的轮询任务：成功后按基础间隔继续，失败后指数退避，
//! 连续失败超过阈值后间隔冻结。新一轮轮询开始前会取消同键仍在途的请求。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use config::MessagingConfig;
use domain::{Message, Session, SubscriptionKey};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::cancellation::CancellationRegistry;
use crate::rate_limiter::RateLimiter;
use crate::subscription::{Listener, SubscriptionRegistry};
use crate::transport::{ChatTransport, TransportError};

pub type MessageListener = Listener<Vec<Message>>;
pub type SessionListListener = Listener<Vec<Session>>;

/// 单个订阅键的轮询状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingState {
    /// 下一次轮询前的等待时间，始终位于 [base, max] 区间
    pub interval: Duration,
    /// 连续失败次数
    pub error_count: u32,
    pub is_polling: bool,
}

impl PollingState {
    pub fn new(config: &MessagingConfig) -> Self {
        Self {
            interval: config.base_interval(),
            error_count: 0,
            is_polling: true,
        }
    }

    /// 任意一次成功都回到基础节奏
    pub fn record_success(&mut self, config: &MessagingConfig) {
        self.error_count = 0;
        self.interval = config.base_interval();
    }

    /// 失败次数不超过阈值时按倍数增长，超过后保持不变
    pub fn record_failure(&mut self, config: &MessagingConfig) {
        self.error_count = self.error_count.saturating_add(1);
        if self.error_count <= config.error_threshold {
            // 乘积溢出时直接取上限
            let grown = Duration::try_from_secs_f64(
                self.interval.as_secs_f64() * config.backoff_factor,
            )
            .unwrap_or_else(|_| config.max_interval());
            self.interval = grown.clamp(config.base_interval(), config.max_interval());
        }
    }
}

enum Snapshot {
    Messages(Vec<Message>),
    Sessions(Vec<Session>),
}

enum PollOutcome {
    Success(Snapshot),
    Cancelled,
    Failed(TransportError),
}

struct PollEntry {
    /// 区分同一个键先后启动的轮询任务
    epoch: u64,
    state: PollingState,
    wake: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

pub struct PollerDependencies {
    pub config: MessagingConfig,
    pub transport: Arc<dyn ChatTransport>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cancellations: Arc<CancellationRegistry>,
    pub session_listeners: Arc<SubscriptionRegistry<Vec<Message>>>,
    pub admin_listeners: Arc<SubscriptionRegistry<Vec<Session>>>,
}

/// 按订阅键管理轮询任务
#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

struct PollerInner {
    deps: PollerDependencies,
    entries: Mutex<HashMap<SubscriptionKey, PollEntry>>,
    next_epoch: AtomicU64,
}

impl Poller {
    pub fn new(deps: PollerDependencies) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                deps,
                entries: Mutex::new(HashMap::new()),
                next_epoch: AtomicU64::new(0),
            }),
        }
    }

    /// 为 `key` 启动轮询并立即发起第一次请求；已在轮询时返回 false
    pub fn start(&self, key: SubscriptionKey) -> bool {
        let mut entries = self.inner.entries();
        if entries.contains_key(&key) {
            return false;
        }

        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let wake = Arc::new(Notify::new());
        let task = tokio::spawn(
            self.inner
                .clone()
                .run(key.clone(), epoch, wake.clone()),
        );

        tracing::debug!(key = %key, "polling started");
        entries.insert(
            key,
            PollEntry {
                epoch,
                state: PollingState::new(&self.inner.deps.config),
                wake,
                task: Some(task),
            },
        );
        true
    }

    /// 跳过计划中的等待，立即轮询一次；没有活动轮询时返回 false
    pub fn trigger(&self, key: &SubscriptionKey) -> bool {
        match self.inner.entries().get(key) {
            Some(entry) => {
                entry.wake.notify_one();
                true
            }
            None => false,
        }
    }

    /// 停止 `key` 的轮询：清除定时任务、取消在途请求、删除状态
    pub fn stop(&self, key: &SubscriptionKey) -> bool {
        let removed = self.inner.entries().remove(key);
        match removed {
            Some(entry) => {
                self.inner.shutdown_entry(key, entry);
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let drained: Vec<_> = self.inner.entries().drain().collect();
        for (key, entry) in drained {
            self.inner.shutdown_entry(&key, entry);
        }
    }

    pub fn state(&self, key: &SubscriptionKey) -> Option<PollingState> {
        self.inner.entries().get(key).map(|entry| entry.state)
    }

    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        self.inner.entries().keys().cloned().collect()
    }

    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        self.inner.entries().contains_key(key)
    }
}

impl PollerInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, PollEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shutdown_entry(&self, key: &SubscriptionKey, mut entry: PollEntry) {
        entry.state.is_polling = false;
        if let Some(task) = entry.task.take() {
            task.abort();
        }
        self.deps.cancellations.cancel(key.as_str());
        tracing::debug!(key = %key, "polling stopped");
    }

    async fn run(self: Arc<Self>, key: SubscriptionKey, epoch: u64, wake: Arc<Notify>) {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = wake.notified() => {
                    // 被立即轮询取代；下一轮的 begin() 会取消旧令牌
                    tracing::debug!(key = %key, "in-flight poll superseded");
                    continue;
                }
                outcome = self.poll_once(&key) => outcome,
            };

            let Some(delay) = self.settle(&key, epoch, outcome) else {
                break;
            };

            tokio::select! {
                _ = wake.notified() => {}
                _ = sleep(delay) => {}
            }
        }
    }

    async fn poll_once(&self, key: &SubscriptionKey) -> PollOutcome {
        let operation = self.deps.cancellations.begin(key.as_str());
        self.deps.rate_limiter.rate_limit(key.as_str()).await;
        if operation.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        let result = match key {
            SubscriptionKey::Session(session_id) => self
                .deps
                .transport
                .get_messages(session_id, operation.token())
                .await
                .map(Snapshot::Messages),
            SubscriptionKey::AdminSessions => self
                .deps
                .transport
                .get_admin_sessions(operation.token())
                .await
                .map(Snapshot::Sessions),
        };
        self.deps.cancellations.release(key.as_str(), &operation);

        match result {
            // 令牌已取消时到达的结果一律视为过期
            _ if operation.is_cancelled() => PollOutcome::Cancelled,
            Ok(snapshot) => PollOutcome::Success(snapshot),
            Err(err) if err.is_cancelled() => PollOutcome::Cancelled,
            Err(err) => PollOutcome::Failed(err),
        }
    }

    /// 根据本轮结果更新状态，返回下一次轮询前的等待时间；
    /// 轮询已被停止或替换时返回 None
    fn settle(&self, key: &SubscriptionKey, epoch: u64, outcome: PollOutcome) -> Option<Duration> {
        let config = &self.deps.config;
        let (delay, snapshot) = {
            let mut entries = self.entries();
            let entry = match entries.get_mut(key) {
                Some(entry) if entry.epoch == epoch && entry.state.is_polling => entry,
                _ => return None,
            };

            match outcome {
                PollOutcome::Success(snapshot) => {
                    entry.state.record_success(config);
                    (entry.state.interval, Some(snapshot))
                }
                PollOutcome::Cancelled => {
                    tracing::debug!(key = %key, "poll cancelled");
                    (entry.state.interval, None)
                }
                PollOutcome::Failed(err) => {
                    entry.state.record_failure(config);
                    tracing::warn!(
                        key = %key,
                        error = %err,
                        error_count = entry.state.error_count,
                        interval_ms = entry.state.interval.as_millis() as u64,
                        "poll failed, backing off"
                    );
                    (entry.state.interval, None)
                }
            }
        };

        if let Some(snapshot) = snapshot {
            self.publish(key, snapshot);
        }
        Some(delay)
    }

    fn publish(&self, key: &SubscriptionKey, snapshot: Snapshot) {
        let delivered = match snapshot {
            Snapshot::Messages(messages) => {
                self.deps.session_listeners.publish(key.as_str(), &messages)
            }
            Snapshot::Sessions(sessions) => {
                self.deps.admin_listeners.publish(key.as_str(), &sessions)
            }
        };
        tracing::trace!(key = %key, delivered, "poll result published");
    }
}
