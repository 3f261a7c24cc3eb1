use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// 按键的请求间隔限流器
/// 同一个键的两次调用之间至少间隔 `min_spacing`，不同键互不影响
#[derive(Debug)]
pub struct RateLimiter {
    /// 同键调用之间的最小间隔
    min_spacing: Duration,
    /// 每个键最近一次放行的时间
    ledger: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// 等待直到该键允许发起下一次调用
    ///
    /// 只有真正放行的调用才写入账本，中途被丢弃的等待者不占用名额。
    /// 同时醒来的并发调用者在锁内重新检查，未抢到的继续等待下一个间隔。
    pub async fn rate_limit(&self, key: &str) {
        while let Err(ready_at) = self.try_issue(key) {
            tracing::trace!(key, "rate limit: delaying call");
            sleep_until(ready_at).await;
        }
    }

    /// 间隔已满足时记录放行并返回 Ok，否则返回最早可放行的时间
    fn try_issue(&self, key: &str) -> Result<(), Instant> {
        let now = Instant::now();
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(&last) = ledger.get(key) {
            let ready_at = last + self.min_spacing;
            if ready_at > now {
                return Err(ready_at);
            }
        }
        ledger.insert(key.to_owned(), now);
        Ok(())
    }

    /// 最近一次放行时间（未使用过的键返回 None）
    pub fn last_issued_at(&self, key: &str) -> Option<Instant> {
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        ledger.get(key).copied()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_000))
    }
}
