//! Outbox 仓储协议
//!
//! 存储后端需提供：事务的开始/提交/回滚、带版本校验的写入，
//! 以及“选取 N 条匹配记录并跳过已被锁定行”的认领原语。
//!
use super::record::OutboxRecord;
use super::worker_id::WorkerId;
use crate::error::DomainResult;
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// 工作单元：业务写入与 outbox 写入共享同一事务类型
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> DomainResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> DomainResult<()>;

    async fn rollback(&self, tx: Self::Tx) -> DomainResult<()>;
}

/// 认领请求
#[derive(Debug, Clone, Builder)]
pub struct ClaimRequest {
    event_type: String,
    worker_id: WorkerId,
    #[builder(default = 12)]
    limit: usize,
    #[builder(default = Utc::now())]
    now: DateTime<Utc>,
    /// Processing 锁超过该时长视为持有者已失联
    #[builder(default = Duration::from_secs(300))]
    lock_timeout: Duration,
}

impl ClaimRequest {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }
}

/// Outbox 仓储
#[async_trait]
pub trait OutboxRepository: UnitOfWork {
    /// 在业务事务中追加一条记录
    async fn add(&self, tx: &mut Self::Tx, record: &OutboxRecord) -> DomainResult<OutboxRecord>;

    /// 原子地选取并锁定至多 `limit` 条可认领记录，并置为 Processing
    ///
    /// 已被其他事务锁定的行直接跳过，因此并发调用者拿到的集合互不相交。
    async fn claim(
        &self,
        tx: &mut Self::Tx,
        request: &ClaimRequest,
    ) -> DomainResult<Vec<OutboxRecord>>;

    /// 带版本校验地持久化记录，返回存储层递增版本后的记录
    async fn save(&self, tx: &mut Self::Tx, record: &OutboxRecord) -> DomainResult<OutboxRecord>;

    async fn find(&self, tx: &mut Self::Tx, identifier: &str)
    -> DomainResult<Option<OutboxRecord>>;
}
