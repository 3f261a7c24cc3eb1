use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

/// 监听器回调，身份即其 `Arc` 指针
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// 订阅键 -> 监听器集合
pub struct SubscriptionRegistry<T: ?Sized> {
    listeners: Mutex<HashMap<String, Vec<Listener<T>>>>,
}

impl<T: ?Sized> SubscriptionRegistry<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// 添加监听器，返回它是否是该键的第一个监听器（需要启动轮询）
    ///
    /// 同一个 `Arc` 重复添加不会产生第二份。
    pub fn subscribe(&self, key: &str, listener: Listener<T>) -> bool {
        let mut listeners = self.lock();
        let set = listeners.entry(key.to_owned()).or_default();
        let first = set.is_empty();
        if !set.iter().any(|existing| same_listener(existing, &listener)) {
            set.push(listener);
        }
        first
    }

    /// 移除监听器，返回该键的集合是否已空（需要停止轮询）
    pub fn unsubscribe(&self, key: &str, listener: &Listener<T>) -> bool {
        let mut listeners = self.lock();
        let Some(set) = listeners.get_mut(key) else {
            return false;
        };

        let before = set.len();
        set.retain(|existing| !same_listener(existing, listener));
        if set.len() == before {
            return false;
        }

        if set.is_empty() {
            listeners.remove(key);
            true
        } else {
            false
        }
    }

    /// 把 `payload` 分发给该键当前的所有监听器，返回成功调用的数量
    ///
    /// 回调在锁外执行，因此回调内部可以安全地订阅或退订。
    /// 单个回调 panic 不会影响其他回调。
    pub fn publish(&self, key: &str, payload: &T) -> usize {
        let snapshot: Vec<Listener<T>> = match self.lock().get(key) {
            Some(set) => set.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::warn!(key, "listener panicked while handling update"),
            }
        }
        delivered
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Listener<T>>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: ?Sized> Default for SubscriptionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 只比较数据指针，忽略 vtable
fn same_listener<T: ?Sized>(a: &Listener<T>, b: &Listener<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
