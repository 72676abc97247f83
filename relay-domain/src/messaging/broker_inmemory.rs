//! 内存版消息代理（InMemoryBroker）
//!
//! 同时满足 `RequestReplyChannel` 与 `NotificationChannel`：
//! - 请求/应答：按通道名路由到已绑定的 `RequestHandler`，在独立任务中执行；
//! - 通知：每个通道一个 `tokio::sync::broadcast`，订阅返回 'static 消息流；
//! - 典型用途：测试环境、示例与本地开发。
//!
//! 注意：无订阅者时通知会被丢弃，与真实代理的“至少一次”语义不同。

use super::channel::{NotificationChannel, RequestHandler, RequestReplyChannel};
use super::message::{ReplyMessage, RequestMessage};
use crate::error::{DomainError, DomainResult};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Clone)]
pub struct InMemoryBroker {
    responders: Arc<DashMap<String, Arc<dyn RequestHandler>>>,
    topics: Arc<DashMap<String, broadcast::Sender<RequestMessage>>>,
    capacity: usize,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(256)
    }
}

impl InMemoryBroker {
    /// `capacity` 为每个通知通道的广播缓冲区容量
    pub fn new(capacity: usize) -> Self {
        Self {
            responders: Arc::new(DashMap::new()),
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// 为通道绑定响应方，重复绑定时后者覆盖前者
    pub fn bind(&self, channel: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.responders.insert(channel.into(), handler);
    }

    pub fn unbind(&self, channel: &str) {
        self.responders.remove(channel);
    }

    fn topic(&self, channel: &str) -> broadcast::Sender<RequestMessage> {
        self.topics
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[async_trait]
impl RequestReplyChannel for InMemoryBroker {
    async fn request(&self, channel: &str, message: &RequestMessage) -> DomainResult<ReplyMessage> {
        // 先取出 Arc，避免跨 await 持有 DashMap 的分片锁
        let handler = self
            .responders
            .get(channel)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                DomainError::transient_delivery(format!("no responder bound to {channel}"))
            })?;

        let message = message.clone();
        tokio::spawn(async move { handler.handle(message).await })
            .await
            .map_err(|e| DomainError::transient_delivery(format!("responder aborted: {e}")))
    }
}

#[async_trait]
impl NotificationChannel for InMemoryBroker {
    async fn send(&self, channel: &str, message: &RequestMessage) -> DomainResult<()> {
        // 若当前无订阅者，broadcast 的 send 会返回错误，这里视为非致命并忽略
        let _ = self.topic(channel).send(message.clone());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> BoxStream<'static, DomainResult<RequestMessage>> {
        let rx = self.topic(channel).subscribe();
        let stream = BroadcastStream::new(rx)
            .map(|r| r.map_err(|e| DomainError::transient_delivery(e.to_string())));
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        fn handler_name(&self) -> &str {
            "echo"
        }

        async fn handle(&self, message: RequestMessage) -> ReplyMessage {
            ReplyMessage::ok("echo", Some(message.payload().clone()))
        }
    }

    #[tokio::test]
    async fn request_routes_to_bound_responder() {
        let broker = InMemoryBroker::default();
        broker.bind("q", Arc::new(Echo));

        let reply = broker
            .request("q", &RequestMessage::new("t", json!({ "x": 1 })))
            .await
            .unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.payload(), Some(&json!({ "x": 1 })));
    }

    #[tokio::test]
    async fn request_without_responder_is_transient() {
        let broker = InMemoryBroker::default();
        let err = broker
            .request("missing", &RequestMessage::new("t", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::TransientDelivery { .. }));
    }

    #[tokio::test]
    async fn notifications_reach_subscribers_of_the_same_channel() {
        let broker = InMemoryBroker::default();
        let mut a = broker.subscribe("a").await;
        let mut b = broker.subscribe("b").await;

        broker
            .send("a", &RequestMessage::new("t", json!({ "n": 1 })))
            .await
            .unwrap();

        let got = a.next().await.unwrap().unwrap();
        assert_eq!(got.payload(), &json!({ "n": 1 }));

        let nothing = tokio::time::timeout(std::time::Duration::from_millis(50), b.next()).await;
        assert!(nothing.is_err());
    }
}
