//! 缓存失效通知（InvalidationPublisher）
//!
//! 投递成功后以“发后即忘”的方式广播聚合的最新状态，供共享缓存刷新：
//! - 不等待下游缓存更新完成；
//! - 失败只记录日志并写入独立的错误通道，从不影响调用方；
//! - 调用方不会 join 该后台任务。
//!
use super::detached::spawn_detached;
use crate::error::DomainError;
use crate::messaging::{NotificationChannel, RequestMessage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationNotice {
    #[serde(rename = "identifier")]
    pub aggregate_id: String,
    pub status: String,
    pub trace_id: String,
}

impl InvalidationNotice {
    pub fn new(
        aggregate_id: impl Into<String>,
        status: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            status: status.into(),
            trace_id: trace_id.into(),
        }
    }
}

/// 后台发送失败的记录
#[derive(Debug)]
pub struct InvalidationFailure {
    pub notice: InvalidationNotice,
    pub error: DomainError,
}

impl fmt::Display for InvalidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalidation of {} (trace {}) failed: {}",
            self.notice.aggregate_id, self.notice.trace_id, self.error
        )
    }
}

#[derive(Clone)]
pub struct InvalidationPublisher {
    channel: Arc<dyn NotificationChannel>,
    channel_name: String,
    errors: mpsc::UnboundedSender<InvalidationFailure>,
}

impl InvalidationPublisher {
    /// 返回发布器与其错误接收端；丢弃接收端后失败仅记录日志
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        channel_name: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<InvalidationFailure>) {
        let (errors, rx) = mpsc::unbounded_channel();
        let publisher = Self {
            channel,
            channel_name: channel_name.into(),
            errors,
        };
        (publisher, rx)
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// 在后台发送失效通知，立即返回
    pub fn notify(&self, notice: InvalidationNotice) {
        let channel = self.channel.clone();
        let channel_name = self.channel_name.clone();

        spawn_detached("cache-invalidation", self.errors.clone(), async move {
            let payload = match serde_json::to_value(&notice) {
                Ok(payload) => payload,
                Err(err) => {
                    return Err(InvalidationFailure {
                        notice,
                        error: err.into(),
                    });
                }
            };
            let message = RequestMessage::new(notice.trace_id.clone(), payload);
            match channel.send(&channel_name, &message).await {
                Ok(()) => {
                    tracing::debug!(
                        aggregate_id = %notice.aggregate_id,
                        trace_id = %notice.trace_id,
                        "invalidation notice sent"
                    );
                    Ok(())
                }
                Err(error) => Err(InvalidationFailure { notice, error }),
            }
        });
    }
}
