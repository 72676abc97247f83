use super::{InMemoryDatabase, InMemoryTx, Row};
use crate::error::DomainResult;
use crate::outbox::{ClaimRequest, OutboxRecord, OutboxRepository, UnitOfWork};
use async_trait::async_trait;

impl Row for OutboxRecord {
    const TABLE: &'static str = "outbox";

    fn key(&self) -> String {
        self.identifier().to_string()
    }

    fn version(&self) -> i64 {
        OutboxRecord::version(self)
    }

    fn set_version(&mut self, version: i64) {
        OutboxRecord::set_version(self, version);
    }
}

/// 内存版 outbox 仓储
///
/// 与业务仓储共享同一个 `InMemoryDatabase` 时，业务写入与 outbox 写入可在同一事务中提交。
#[derive(Clone, Default)]
pub struct InMemoryOutboxRepository {
    db: InMemoryDatabase,
}

impl InMemoryOutboxRepository {
    pub fn new(db: InMemoryDatabase) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &InMemoryDatabase {
        &self.db
    }

    /// 已提交记录的快照（按写入顺序）
    pub fn records(&self) -> DomainResult<Vec<OutboxRecord>> {
        self.db.all::<OutboxRecord>()
    }

    pub fn record(&self, identifier: &str) -> DomainResult<Option<OutboxRecord>> {
        self.db.get::<OutboxRecord>(identifier)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryOutboxRepository {
    type Tx = InMemoryTx;

    async fn begin(&self) -> DomainResult<InMemoryTx> {
        self.db.begin()
    }

    async fn commit(&self, tx: InMemoryTx) -> DomainResult<()> {
        tx.commit()
    }

    async fn rollback(&self, tx: InMemoryTx) -> DomainResult<()> {
        tx.rollback()
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn add(&self, tx: &mut InMemoryTx, record: &OutboxRecord) -> DomainResult<OutboxRecord> {
        record.check_invariants()?;
        tx.insert(record)
    }

    async fn claim(
        &self,
        tx: &mut InMemoryTx,
        request: &ClaimRequest,
    ) -> DomainResult<Vec<OutboxRecord>> {
        let candidates = tx.select_for_update_skip_locked::<OutboxRecord, _>(
            request.limit(),
            |record| {
                record.is_claimable(request.event_type(), request.now(), request.lock_timeout())
            },
        )?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for mut record in candidates {
            record.claim(request.worker_id(), request.now())?;
            claimed.push(tx.update(&record)?);
        }
        Ok(claimed)
    }

    async fn save(&self, tx: &mut InMemoryTx, record: &OutboxRecord) -> DomainResult<OutboxRecord> {
        record.check_invariants()?;
        tx.update(record)
    }

    async fn find(
        &self,
        tx: &mut InMemoryTx,
        identifier: &str,
    ) -> DomainResult<Option<OutboxRecord>> {
        tx.get::<OutboxRecord>(identifier)
    }
}
