//! 客服聊天组件的领域模型
//!
//! 包含会话、消息以及订阅键等在轮询引擎与传输层之间传递的实体。

pub mod message;
pub mod session;
pub mod subscription;
pub mod value_objects;

pub use message::{Message, OutgoingMessage};
pub use session::{CreatedSession, Session};
pub use subscription::{SubscriptionKey, ADMIN_SESSIONS_KEY};
pub use value_objects::{MessageId, SessionId, Timestamp};
