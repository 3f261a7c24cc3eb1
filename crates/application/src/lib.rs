//! 应用层实现。
//!
//! 聊天组件的可靠消息引擎：按订阅键自适应轮询、带重试的出站队列、
//! 同键请求取消与限流，以及对外的 [`ChatService`] 门面。

pub mod cancellation;
pub mod clock;
pub mod error;
pub mod outbound_queue;
pub mod poller;
pub mod rate_limiter;
pub mod services;
pub mod subscription;
pub mod transport;

pub use cancellation::{CancellationRegistry, OperationToken};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use outbound_queue::{OutboundQueue, OutboundQueueDependencies, QueueStats, QueuedMessage};
pub use poller::{MessageListener, Poller, PollerDependencies, PollingState, SessionListListener};
pub use rate_limiter::RateLimiter;
pub use services::{ChatService, ChatServiceDependencies};
pub use subscription::{Listener, SubscriptionRegistry};
pub use transport::{ChatTransport, TransportError};
