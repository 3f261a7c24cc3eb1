//! 基础设施层实现。
//!
//! 提供基于 HTTP 的聊天传输适配器，实现应用层定义的 `ChatTransport` 接口。

pub mod error;
pub mod http_transport;

pub use error::InfrastructureError;
pub use http_transport::HttpChatTransport;
