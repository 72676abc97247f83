//! 消息通道（messaging）
//!
//! 定义消息信封与通道协议，不绑定具体代理：
//! - `RequestMessage`/`ReplyMessage`：请求/应答与通知的统一信封；
//! - `RequestReplyChannel`/`NotificationChannel`：发送侧协议；
//! - `RequestHandler`/`NotificationHandler`：消费侧协议；
//! - `InMemoryBroker`：内存实现，用于测试与本地运行。
//!
mod broker_inmemory;
mod channel;
mod message;

pub use broker_inmemory::InMemoryBroker;
pub use channel::{NotificationChannel, NotificationHandler, RequestHandler, RequestReplyChannel};
pub use message::{ReplyMessage, RequestMessage};
