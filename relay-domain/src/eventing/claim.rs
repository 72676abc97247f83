//! 认领服务（ClaimService）
//!
//! 在一个短事务中选取并锁定一批可投递的 outbox 记录：
//! - 选取与加锁由存储层原子完成（跳过已被锁定的行），并发调用者拿到的集合互不相交；
//! - 无可认领记录时返回空列表而不是错误；
//! - 事务失败时回滚，不留下任何部分加锁。
//!
use crate::error::{DomainError, DomainResult};
use crate::outbox::{ClaimRequest, OutboxRecord, OutboxRepository, WorkerId};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

pub struct ClaimService<R: OutboxRepository> {
    repo: Arc<R>,
}

impl<R: OutboxRepository> Clone for ClaimService<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
        }
    }
}

impl<R: OutboxRepository> ClaimService<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// 以当前时间认领至多 `limit` 条记录
    pub async fn claim(
        &self,
        event_type: &str,
        worker: &WorkerId,
        limit: usize,
        lock_timeout: Duration,
    ) -> DomainResult<Vec<OutboxRecord>> {
        let request = ClaimRequest::builder()
            .event_type(event_type.to_string())
            .worker_id(worker.clone())
            .limit(limit)
            .now(Utc::now())
            .lock_timeout(lock_timeout)
            .build();
        self.claim_with(&request).await
    }

    pub async fn claim_with(&self, request: &ClaimRequest) -> DomainResult<Vec<OutboxRecord>> {
        if request.event_type().trim().is_empty() {
            return Err(DomainError::validation("event type must not be empty"));
        }
        if request.limit() == 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.repo.begin().await?;
        match self.repo.claim(&mut tx, request).await {
            Ok(claimed) => {
                self.repo.commit(tx).await?;
                Ok(claimed)
            }
            Err(err) => {
                if let Err(rollback_err) = self.repo.rollback(tx).await {
                    tracing::warn!(error = %rollback_err, "claim rollback failed");
                }
                Err(err)
            }
        }
    }
}
