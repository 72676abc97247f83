//! 单条投递与补偿（OutboxPublisher）
//!
//! 对一条已认领的记录：
//! - 映射外发消息体，以调用方分配的 correlation id 经请求/应答通道发送并在超时内等待应答；
//! - 发送失败（错误、拒绝应答、超时）时回退记录并返回 `TransientDelivery`；
//! - 发送成功后在同一事务内应用业务副作用并将记录置为 Completed，
//!   副作用失败时同样回退并返回 `TransientSideEffect`；
//! - 全部成功后以“发后即忘”的方式广播缓存失效通知。
//!
//! 映射失败属于永久错误，记录直接置为 Failed。
//!
use super::handler::OutboxEventHandler;
use super::invalidation::{InvalidationNotice, InvalidationPublisher};
use crate::error::{DomainError, DomainResult};
use crate::messaging::{RequestMessage, RequestReplyChannel};
use crate::outbox::{OutboxRecord, OutboxRepository, RetryPolicy, Reversal, WorkerId};
use async_trait::async_trait;
use bon::Builder;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// 投递成功的回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub record_id: String,
    pub correlation_id: String,
    pub trace_id: String,
}

/// 单条记录的投递入口，供批量调度使用
///
/// `correlation_id` 由调用方分配，失败时同样可用于日志关联。
#[async_trait]
pub trait RecordPublisher: Send + Sync {
    async fn publish(&self, record: OutboxRecord, correlation_id: &str) -> DomainResult<Delivery>;
}

#[derive(Debug, Clone, Copy, Builder)]
pub struct PublisherConfig {
    /// 等待应答的超时
    #[builder(default = Duration::from_secs(30))]
    pub reply_timeout: Duration,
    #[builder(default)]
    pub retry: RetryPolicy,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig::builder().build()
    }
}

#[derive(Builder)]
pub struct OutboxPublisher<R: OutboxRepository> {
    repo: Arc<R>,
    channel: Arc<dyn RequestReplyChannel>,
    handler: Arc<dyn OutboxEventHandler<R::Tx>>,
    worker: WorkerId,
    invalidation: Option<InvalidationPublisher>,
    #[builder(default)]
    config: PublisherConfig,
}

impl<R: OutboxRepository> OutboxPublisher<R> {
    pub fn event_type(&self) -> &str {
        self.handler.event_type()
    }

    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    async fn deliver(&self, record: OutboxRecord, correlation_id: &str) -> DomainResult<Delivery> {
        if !record.is_held_by(&self.worker) {
            return Err(DomainError::validation(format!(
                "outbox {} is not held by {}",
                record.identifier(),
                self.worker
            )));
        }
        if record.event_type() != self.handler.event_type() {
            return Err(DomainError::validation(format!(
                "outbox {} has event type {}, expected {}",
                record.identifier(),
                record.event_type(),
                self.handler.event_type()
            )));
        }

        let payload = match self.handler.to_message_payload(&record) {
            Ok(payload) => payload,
            Err(err) => {
                let reason = format!("payload cannot be mapped: {err}");
                self.mark_failed(record, &reason).await?;
                return Err(DomainError::permanent(reason));
            }
        };

        let message = RequestMessage::correlated(correlation_id, record.trace_id(), payload);

        let sent = tokio::time::timeout(
            self.config.reply_timeout,
            self.channel.request(self.handler.channel(), &message),
        )
        .await;
        let failure = match sent {
            Ok(Ok(reply)) if reply.is_success() => None,
            Ok(Ok(reply)) => Some(format!(
                "request rejected with status {}: {}",
                reply.status_code(),
                reply.message()
            )),
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some(format!(
                "no reply within {}ms",
                self.config.reply_timeout.as_millis()
            )),
        };
        if let Some(reason) = failure {
            return Err(self
                .reverse(record, reason, DomainError::transient_delivery)
                .await);
        }

        let notice = match self.finalize(&record).await {
            Ok(notice) => notice,
            // outbox 行本身已被其他 worker 改写，回退同样会冲突
            Err(err @ DomainError::VersionConflict { .. })
                if conflicts_on(&err, record.identifier()) =>
            {
                tracing::warn!(
                    record_id = %record.identifier(),
                    trace_id = %record.trace_id(),
                    error = %err,
                    "outbox record changed concurrently; leaving it to its new owner"
                );
                return Err(err);
            }
            Err(err) => {
                return Err(self
                    .reverse(record, err.to_string(), DomainError::transient_side_effect)
                    .await);
            }
        };

        if let (Some(notice), Some(invalidation)) = (notice, &self.invalidation) {
            invalidation.notify(notice);
        }

        Ok(Delivery {
            record_id: record.identifier().to_string(),
            correlation_id: correlation_id.to_string(),
            trace_id: record.trace_id().to_string(),
        })
    }

    /// 副作用与 Completed 同事务提交
    async fn finalize(&self, record: &OutboxRecord) -> DomainResult<Option<InvalidationNotice>> {
        let mut tx = self.repo.begin().await?;
        let outcome = async {
            let notice = self.handler.apply_side_effect(&mut tx, record).await?;
            let mut completed = record.clone();
            completed.complete(Utc::now())?;
            self.repo.save(&mut tx, &completed).await?;
            Ok::<_, DomainError>(notice)
        }
        .await;

        match outcome {
            Ok(notice) => {
                self.repo.commit(tx).await?;
                Ok(notice)
            }
            Err(err) => {
                if let Err(rollback_err) = self.repo.rollback(tx).await {
                    tracing::warn!(
                        record_id = %record.identifier(),
                        error = %rollback_err,
                        "side effect rollback failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// 回退认领，返回以 `kind` 包装的失败原因
    async fn reverse(
        &self,
        mut record: OutboxRecord,
        reason: String,
        kind: fn(String) -> DomainError,
    ) -> DomainError {
        let reversal = record.revert(&reason, &self.config.retry, Utc::now());
        if let Err(err) = self.persist(&record).await {
            tracing::warn!(
                record_id = %record.identifier(),
                trace_id = %record.trace_id(),
                error = %err,
                "failed to persist reversal; the lock expires after the lock timeout"
            );
            return kind(reason);
        }

        match reversal {
            Reversal::Requeued { next_attempt_at } => tracing::warn!(
                record_id = %record.identifier(),
                trace_id = %record.trace_id(),
                attempts = record.attempts(),
                %next_attempt_at,
                reason = %reason,
                "outbox record reverted to pending"
            ),
            Reversal::Exhausted => tracing::warn!(
                record_id = %record.identifier(),
                trace_id = %record.trace_id(),
                attempts = record.attempts(),
                reason = %reason,
                "retry ceiling reached; outbox record marked failed"
            ),
        }
        kind(reason)
    }

    async fn mark_failed(&self, mut record: OutboxRecord, reason: &str) -> DomainResult<()> {
        record.fail(reason, Utc::now());
        self.persist(&record).await?;
        tracing::warn!(
            record_id = %record.identifier(),
            trace_id = %record.trace_id(),
            reason,
            "outbox record marked failed"
        );
        Ok(())
    }

    async fn persist(&self, record: &OutboxRecord) -> DomainResult<OutboxRecord> {
        let mut tx = self.repo.begin().await?;
        match self.repo.save(&mut tx, record).await {
            Ok(saved) => {
                self.repo.commit(tx).await?;
                Ok(saved)
            }
            Err(err) => {
                if let Err(rollback_err) = self.repo.rollback(tx).await {
                    tracing::warn!(
                        record_id = %record.identifier(),
                        error = %rollback_err,
                        "outbox record rollback failed"
                    );
                }
                Err(err)
            }
        }
    }
}

fn conflicts_on(err: &DomainError, identifier: &str) -> bool {
    matches!(err, DomainError::VersionConflict { key, .. } if key == identifier)
}

#[async_trait]
impl<R: OutboxRepository + 'static> RecordPublisher for OutboxPublisher<R> {
    async fn publish(&self, record: OutboxRecord, correlation_id: &str) -> DomainResult<Delivery> {
        self.deliver(record, correlation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{InMemoryBroker, ReplyMessage, RequestHandler};
    use crate::outbox::{JobStatus, UnitOfWork};
    use crate::persist::{InMemoryOutboxRepository, InMemoryTx};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Welcome {
        fail_side_effect: AtomicBool,
        stale_user_row: AtomicBool,
        side_effects: AtomicUsize,
    }

    impl Welcome {
        fn new() -> Self {
            Self {
                fail_side_effect: AtomicBool::new(false),
                stale_user_row: AtomicBool::new(false),
                side_effects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OutboxEventHandler<InMemoryTx> for Welcome {
        fn event_type(&self) -> &str {
            "welcome"
        }

        fn channel(&self) -> &str {
            "welcome-queue"
        }

        fn to_message_payload(&self, record: &OutboxRecord) -> DomainResult<Value> {
            record
                .payload()
                .get("email")
                .cloned()
                .map(|email| json!({ "email": email }))
                .ok_or_else(|| DomainError::validation("missing email"))
        }

        async fn apply_side_effect(
            &self,
            _tx: &mut InMemoryTx,
            record: &OutboxRecord,
        ) -> DomainResult<Option<InvalidationNotice>> {
            if self.fail_side_effect.load(Ordering::SeqCst) {
                return Err(DomainError::database("settings write failed"));
            }
            if self.stale_user_row.load(Ordering::SeqCst) {
                return Err(DomainError::VersionConflict {
                    key: "u-1".to_string(),
                    expected: 1,
                    actual: 2,
                });
            }
            self.side_effects.fetch_add(1, Ordering::SeqCst);
            Ok(Some(InvalidationNotice::new("u-1", "ACTIVE", record.trace_id())))
        }
    }

    struct Responder {
        status: u16,
    }

    #[async_trait]
    impl RequestHandler for Responder {
        fn handler_name(&self) -> &str {
            "responder"
        }

        async fn handle(&self, _message: RequestMessage) -> ReplyMessage {
            if self.status == 200 {
                ReplyMessage::ok("sent", None)
            } else {
                ReplyMessage::failure(self.status, "nope")
            }
        }
    }

    struct Fixture {
        repo: Arc<InMemoryOutboxRepository>,
        broker: InMemoryBroker,
        handler: Arc<Welcome>,
        publisher: OutboxPublisher<InMemoryOutboxRepository>,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryOutboxRepository::default());
        let broker = InMemoryBroker::default();
        let handler = Arc::new(Welcome::new());
        let publisher = OutboxPublisher::builder()
            .repo(repo.clone())
            .channel(Arc::new(broker.clone()))
            .handler(handler.clone())
            .worker(WorkerId::new("w-1").unwrap())
            .config(
                PublisherConfig::builder()
                    .reply_timeout(Duration::from_millis(200))
                    .retry(RetryPolicy::immediate(3))
                    .build(),
            )
            .build();
        Fixture {
            repo,
            broker,
            handler,
            publisher,
        }
    }

    async fn claimed(repo: &InMemoryOutboxRepository, payload: Value) -> OutboxRecord {
        let mut tx = repo.begin().await.unwrap();
        repo.add(&mut tx, &OutboxRecord::new("welcome", payload, "trace-1"))
            .await
            .unwrap();
        repo.commit(tx).await.unwrap();

        let request = crate::outbox::ClaimRequest::builder()
            .event_type("welcome".to_string())
            .worker_id(WorkerId::new("w-1").unwrap())
            .build();
        let mut tx = repo.begin().await.unwrap();
        let mut records = repo.claim(&mut tx, &request).await.unwrap();
        repo.commit(tx).await.unwrap();
        records.remove(0)
    }

    #[tokio::test]
    async fn success_completes_record_and_applies_side_effect() {
        let f = fixture();
        f.broker.bind("welcome-queue", Arc::new(Responder { status: 200 }));
        let record = claimed(&f.repo, json!({ "email": "a@b.c" })).await;

        let delivery = f.publisher.publish(record.clone(), "corr-1").await.unwrap();
        assert_eq!(delivery.record_id, record.identifier());
        assert_eq!(delivery.trace_id, "trace-1");
        assert_eq!(delivery.correlation_id, "corr-1");

        let stored = f.repo.record(record.identifier()).unwrap().unwrap();
        assert_eq!(stored.job_status(), JobStatus::Completed);
        assert!(stored.is_published());
        assert_eq!(f.handler.side_effects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_reply_reverts_to_pending() {
        let f = fixture();
        f.broker.bind("welcome-queue", Arc::new(Responder { status: 400 }));
        let record = claimed(&f.repo, json!({ "email": "a@b.c" })).await;

        let err = f.publisher.publish(record.clone(), "corr-1").await.unwrap_err();
        assert!(matches!(err, DomainError::TransientDelivery { .. }));

        let stored = f.repo.record(record.identifier()).unwrap().unwrap();
        assert_eq!(stored.job_status(), JobStatus::Pending);
        assert!(!stored.is_published());
        assert!(stored.locked_by().is_none());
        assert_eq!(stored.attempts(), 1);
        assert_eq!(f.handler.side_effects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn side_effect_failure_reverts_and_rolls_back() {
        let f = fixture();
        f.broker.bind("welcome-queue", Arc::new(Responder { status: 200 }));
        f.handler.fail_side_effect.store(true, Ordering::SeqCst);
        let record = claimed(&f.repo, json!({ "email": "a@b.c" })).await;

        let err = f.publisher.publish(record.clone(), "corr-1").await.unwrap_err();
        assert!(matches!(err, DomainError::TransientSideEffect { .. }));

        let stored = f.repo.record(record.identifier()).unwrap().unwrap();
        assert_eq!(stored.job_status(), JobStatus::Pending);
        assert!(stored.locked_by().is_none());
        assert_eq!(f.repo.database().held_locks().unwrap(), 0);
    }

    #[tokio::test]
    async fn side_effect_version_conflict_still_reverts() {
        let f = fixture();
        f.broker.bind("welcome-queue", Arc::new(Responder { status: 200 }));
        f.handler.stale_user_row.store(true, Ordering::SeqCst);
        let record = claimed(&f.repo, json!({ "email": "a@b.c" })).await;

        let err = f.publisher.publish(record.clone(), "corr-1").await.unwrap_err();
        assert!(matches!(err, DomainError::TransientSideEffect { .. }));

        let stored = f.repo.record(record.identifier()).unwrap().unwrap();
        assert_eq!(stored.job_status(), JobStatus::Pending);
        assert!(stored.locked_by().is_none());
        assert_eq!(stored.attempts(), 1);
        assert_eq!(f.repo.database().held_locks().unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrently_changed_record_is_left_alone() {
        let f = fixture();
        f.broker.bind("welcome-queue", Arc::new(Responder { status: 200 }));
        let record = claimed(&f.repo, json!({ "email": "a@b.c" })).await;

        // 另一方抢先改写了 outbox 行
        let mut tx = f.repo.begin().await.unwrap();
        let bumped = f.repo.save(&mut tx, &record).await.unwrap();
        f.repo.commit(tx).await.unwrap();

        let err = f.publisher.publish(record.clone(), "corr-1").await.unwrap_err();
        assert!(matches!(err, DomainError::VersionConflict { .. }));

        let stored = f.repo.record(record.identifier()).unwrap().unwrap();
        assert_eq!(stored.version(), bumped.version());
        assert_eq!(stored.job_status(), JobStatus::Processing);
        assert_eq!(stored.attempts(), 0);
    }

    #[tokio::test]
    async fn reversal_of_changed_record_keeps_delivery_error() {
        let f = fixture();
        f.broker.bind("welcome-queue", Arc::new(Responder { status: 503 }));
        let record = claimed(&f.repo, json!({ "email": "a@b.c" })).await;

        let mut tx = f.repo.begin().await.unwrap();
        let bumped = f.repo.save(&mut tx, &record).await.unwrap();
        f.repo.commit(tx).await.unwrap();

        // 回退写入冲突后回滚，仍返回原始投递错误
        let err = f.publisher.publish(record.clone(), "corr-1").await.unwrap_err();
        assert!(matches!(err, DomainError::TransientDelivery { .. }));

        let stored = f.repo.record(record.identifier()).unwrap().unwrap();
        assert_eq!(stored, bumped);
        assert_eq!(f.repo.database().held_locks().unwrap(), 0);
    }

    #[tokio::test]
    async fn unmappable_payload_is_permanent() {
        let f = fixture();
        f.broker.bind("welcome-queue", Arc::new(Responder { status: 200 }));
        let record = claimed(&f.repo, json!({ "name": "no email" })).await;

        let err = f.publisher.publish(record.clone(), "corr-1").await.unwrap_err();
        assert!(matches!(err, DomainError::Permanent { .. }));

        let stored = f.repo.record(record.identifier()).unwrap().unwrap();
        assert_eq!(stored.job_status(), JobStatus::Failed);
        assert!(stored.last_error().is_some());
    }

    #[tokio::test]
    async fn record_held_by_another_worker_is_rejected_untouched() {
        let f = fixture();
        let record = claimed(&f.repo, json!({ "email": "a@b.c" })).await;
        let other = OutboxPublisher::builder()
            .repo(f.repo.clone())
            .channel(Arc::new(f.broker.clone()))
            .handler(f.handler.clone())
            .worker(WorkerId::new("w-2").unwrap())
            .build();

        let err = other.publish(record.clone(), "corr-1").await.unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
        let stored = f.repo.record(record.identifier()).unwrap().unwrap();
        assert_eq!(stored, record);
    }
}
