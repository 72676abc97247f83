//! 事件处理器（OutboxEventHandler）
//!
//! 描述某一事件类型的投递细节：目标通道、外发消息体的映射，
//! 以及投递成功后需与 outbox 终结同事务落库的业务副作用。
//!
use super::invalidation::InvalidationNotice;
use crate::error::DomainResult;
use crate::outbox::OutboxRecord;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait OutboxEventHandler<Tx: Send>: Send + Sync {
    /// 负责的事件类型
    fn event_type(&self) -> &str;

    /// 请求/应答通道名
    fn channel(&self) -> &str;

    /// 将 outbox 快照映射为外发消息体；映射失败属于永久错误
    fn to_message_payload(&self, record: &OutboxRecord) -> DomainResult<Value>;

    /// 应用业务副作用（与 outbox 终结处于同一事务）
    ///
    /// 返回需要广播的缓存失效通知（若有）。
    async fn apply_side_effect(
        &self,
        tx: &mut Tx,
        record: &OutboxRecord,
    ) -> DomainResult<Option<InvalidationNotice>>;
}
