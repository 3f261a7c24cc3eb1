use std::fmt;

use crate::value_objects::SessionId;

/// 管理后台会话列表的订阅键。
pub const ADMIN_SESSIONS_KEY: &str = "admin-sessions";

/// 逻辑数据流的标识：某个会话的消息流，或管理后台的会话列表。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    Session(SessionId),
    AdminSessions,
}

impl SubscriptionKey {
    pub fn session(id: impl Into<SessionId>) -> Self {
        Self::Session(id.into())
    }

    /// 用作限流、取消与监听器映射的字符串键。
    pub fn as_str(&self) -> &str {
        match self {
            Self::Session(id) => id.as_str(),
            Self::AdminSessions => ADMIN_SESSIONS_KEY,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SessionId> for SubscriptionKey {
    fn from(value: SessionId) -> Self {
        Self::Session(value)
    }
}
