use serde::{Deserialize, Serialize};

use crate::value_objects::{MessageId, SessionId, Timestamp};

/// 会话中的一条聊天消息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "_id")]
    pub id: MessageId,
    pub session_id: SessionId,
    pub content: String,
    pub is_admin: bool,
    pub timestamp: Timestamp,
}

impl Message {
    /// 构造乐观回显：临时 ID + 本地时间，在服务端确认之前返回给 UI。
    pub fn optimistic(
        session_id: SessionId,
        content: impl Into<String>,
        is_admin: bool,
        now: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::temporary(),
            session_id,
            content: content.into(),
            is_admin,
            timestamp: now,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.id.is_temporary()
    }
}

/// 待发送的消息载荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub session_id: SessionId,
    pub content: String,
    pub is_admin: bool,
}

impl OutgoingMessage {
    pub fn new(session_id: SessionId, content: impl Into<String>, is_admin: bool) -> Self {
        Self {
            session_id,
            content: content.into(),
            is_admin,
        }
    }
}
