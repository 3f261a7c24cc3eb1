use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

/// 一次操作的取消令牌
///
/// `id` 在同一个注册表内单调递增，用来判断"当前登记的是不是我"。
#[derive(Debug, Clone)]
pub struct OperationToken {
    id: u64,
    token: CancellationToken,
}

impl OperationToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// 每个操作键最多一个存活令牌的取消注册表
///
/// 对同一个键发起新操作时，旧操作会先被取消再被替换。
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    next_id: AtomicU64,
    live: Mutex<HashMap<String, OperationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为 `key` 登记一个新令牌，取消并丢弃之前的令牌
    pub fn begin(&self, key: &str) -> OperationToken {
        let operation = OperationToken {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        };

        let previous = self
            .lock()
            .insert(key.to_owned(), operation.clone());

        if let Some(previous) = previous {
            tracing::debug!(key, superseded = previous.id, "cancelling superseded operation");
            previous.token.cancel();
        }
        operation
    }

    /// 取消并移除 `key` 的令牌，不存在时什么也不做
    pub fn cancel(&self, key: &str) {
        let removed = self.lock().remove(key);
        if let Some(operation) = removed {
            operation.token.cancel();
        }
    }

    /// 仅当登记的仍是 `operation` 时移除，避免迟到的完成覆盖更新的登记
    pub fn release(&self, key: &str, operation: &OperationToken) -> bool {
        let mut live = self.lock();
        match live.get(key) {
            Some(current) if current.id == operation.id => {
                live.remove(key);
                true
            }
            _ => false,
        }
    }

    /// 取消所有存活的令牌
    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (key, operation) in drained {
            tracing::debug!(key = %key, "cancelling operation on teardown");
            operation.token.cancel();
        }
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, OperationToken>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
