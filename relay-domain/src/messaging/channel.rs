//! 消息通道协议
//!
//! - `RequestReplyChannel`：发送请求并等待应答（超时由调用方控制）；
//! - `NotificationChannel`：单向发送与订阅，发送方不等待下游处理；
//! - `RequestHandler`/`NotificationHandler`：通道另一端的消费者。
//!
use super::message::{ReplyMessage, RequestMessage};
use crate::error::DomainResult;
use async_trait::async_trait;
use futures_core::stream::BoxStream;

#[async_trait]
pub trait RequestReplyChannel: Send + Sync {
    async fn request(&self, channel: &str, message: &RequestMessage) -> DomainResult<ReplyMessage>;
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, channel: &str, message: &RequestMessage) -> DomainResult<()>;

    /// 返回一个 'static 生命周期的消息流，便于在 tokio::spawn 中使用
    async fn subscribe(&self, channel: &str) -> BoxStream<'static, DomainResult<RequestMessage>>;
}

/// 请求/应答的响应方
#[async_trait]
pub trait RequestHandler: Send + Sync {
    fn handler_name(&self) -> &str;

    /// 业务失败以 `success = false` 的应答表达，而不是错误
    async fn handle(&self, message: RequestMessage) -> ReplyMessage;
}

/// 单向通知的消费方
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    fn handler_name(&self) -> &str;

    /// 订阅的通道名
    fn channel(&self) -> &str;

    async fn handle(&self, message: &RequestMessage) -> DomainResult<()>;
}
