use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::value_objects::{SessionId, Timestamp};

/// 客服会话摘要，管理后台的会话列表由它组成。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(alias = "_id")]
    pub id: SessionId,
    pub contact_info: String,
    pub is_active: bool,
    #[serde(default)]
    pub last_message_at: Option<Timestamp>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
}

/// 创建会话成功后服务端返回的会话及首条消息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session: Session,
    pub message: Message,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_optional_timestamps_default_to_none() {
        let json = r#"{"id": "s1", "contactInfo": "a@example.com", "isActive": true}"#;
        let session: Session = serde_json::from_str(json).unwrap();

        assert_eq!(session.id, SessionId::from("s1"));
        assert_eq!(session.contact_info, "a@example.com");
        assert!(session.is_active);
        assert!(session.last_message_at.is_none());
        assert!(session.created_at.is_none());
    }
}
