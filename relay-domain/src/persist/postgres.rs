//! Postgres 版 outbox 仓储（`postgres` feature）
//!
//! 表结构见 `migrations/0001_outbox.sql`。认领使用 CTE + `FOR UPDATE SKIP LOCKED`
//! 在单条语句内完成选取与加锁，并发 worker 拿到的集合互不相交。
//!
use crate::error::{DomainError, DomainResult};
use crate::outbox::{ClaimRequest, OutboxRecord, OutboxRepository, UnitOfWork};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row as _, Transaction};

pub type PgTx = Transaction<'static, Postgres>;

const COLUMNS: &str = "identifier, event_type, payload, status, is_published, job_status, \
     locked_by, locked_at, trace_id, attempts, next_attempt_at, last_error, \
     created_at, modified_at, version";

#[derive(Clone)]
pub struct PgOutboxRepository {
    pool: PgPool,
}

impl PgOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn record_from_row(row: &PgRow) -> DomainResult<OutboxRecord> {
    let attempts: i32 = row.try_get("attempts")?;
    let status: String = row.try_get("status")?;
    let job_status: String = row.try_get("job_status")?;

    Ok(OutboxRecord::builder()
        .identifier(row.try_get("identifier")?)
        .event_type(row.try_get("event_type")?)
        .payload(row.try_get("payload")?)
        .status(status.parse()?)
        .is_published(row.try_get("is_published")?)
        .job_status(job_status.parse()?)
        .maybe_locked_by(row.try_get("locked_by")?)
        .maybe_locked_at(row.try_get("locked_at")?)
        .trace_id(row.try_get("trace_id")?)
        .attempts(u32::try_from(attempts).unwrap_or_default())
        .maybe_next_attempt_at(row.try_get("next_attempt_at")?)
        .maybe_last_error(row.try_get("last_error")?)
        .created_at(row.try_get("created_at")?)
        .modified_at(row.try_get("modified_at")?)
        .version(row.try_get("version")?)
        .build())
}

#[async_trait]
impl UnitOfWork for PgOutboxRepository {
    type Tx = PgTx;

    async fn begin(&self) -> DomainResult<PgTx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: PgTx) -> DomainResult<()> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: PgTx) -> DomainResult<()> {
        Ok(tx.rollback().await?)
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn add(&self, tx: &mut PgTx, record: &OutboxRecord) -> DomainResult<OutboxRecord> {
        record.check_invariants()?;

        let sql = format!(
            "INSERT INTO outboxp.outbox ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 1) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(record.identifier())
            .bind(record.event_type())
            .bind(record.payload())
            .bind(record.status().as_str())
            .bind(record.is_published())
            .bind(record.job_status().as_str())
            .bind(record.locked_by())
            .bind(record.locked_at())
            .bind(record.trace_id())
            .bind(i32::try_from(record.attempts()).unwrap_or(i32::MAX))
            .bind(record.next_attempt_at())
            .bind(record.last_error())
            .bind(record.created_at())
            .bind(record.modified_at())
            .fetch_one(&mut **tx)
            .await?;

        record_from_row(&row)
    }

    async fn claim(&self, tx: &mut PgTx, request: &ClaimRequest) -> DomainResult<Vec<OutboxRecord>> {
        let lock_timeout_ms = i64::try_from(request.lock_timeout().as_millis()).unwrap_or(i64::MAX);

        let sql = format!(
            r#"
            WITH claimable AS (
                SELECT identifier
                FROM outboxp.outbox
                WHERE status = 'ACTIVE'
                  AND is_published = FALSE
                  AND event_type = $1
                  AND (
                        (job_status = 'PENDING'
                         AND (next_attempt_at IS NULL OR next_attempt_at <= $3))
                     OR (job_status = 'PROCESSING'
                         AND (locked_at IS NULL
                              OR locked_at + make_interval(secs => $4::double precision / 1000) < $3))
                  )
                ORDER BY created_at, identifier
                LIMIT $5
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outboxp.outbox o
            SET job_status = 'PROCESSING',
                locked_by = $2,
                locked_at = $3,
                modified_at = $3,
                version = o.version + 1
            FROM claimable c
            WHERE o.identifier = c.identifier
            RETURNING {}
            "#,
            COLUMNS
                .split(", ")
                .map(|c| format!("o.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let rows = sqlx::query(&sql)
            .bind(request.event_type())
            .bind(request.worker_id().as_str())
            .bind(request.now())
            .bind(lock_timeout_ms)
            .bind(i64::try_from(request.limit()).unwrap_or(i64::MAX))
            .fetch_all(&mut **tx)
            .await?;

        let mut claimed = rows
            .iter()
            .map(record_from_row)
            .collect::<DomainResult<Vec<_>>>()?;
        claimed.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.identifier().cmp(b.identifier()))
        });
        Ok(claimed)
    }

    async fn save(&self, tx: &mut PgTx, record: &OutboxRecord) -> DomainResult<OutboxRecord> {
        record.check_invariants()?;

        let sql = format!(
            "UPDATE outboxp.outbox \
             SET status = $3, is_published = $4, job_status = $5, locked_by = $6, locked_at = $7, \
                 attempts = $8, next_attempt_at = $9, last_error = $10, modified_at = $11, \
                 payload = $12, version = version + 1 \
             WHERE identifier = $1 AND version = $2 \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(record.identifier())
            .bind(record.version())
            .bind(record.status().as_str())
            .bind(record.is_published())
            .bind(record.job_status().as_str())
            .bind(record.locked_by())
            .bind(record.locked_at())
            .bind(i32::try_from(record.attempts()).unwrap_or(i32::MAX))
            .bind(record.next_attempt_at())
            .bind(record.last_error())
            .bind(record.modified_at())
            .bind(record.payload())
            .fetch_optional(&mut **tx)
            .await?;

        if let Some(row) = row {
            return record_from_row(&row);
        }

        let actual: Option<i64> =
            sqlx::query_scalar("SELECT version FROM outboxp.outbox WHERE identifier = $1")
                .bind(record.identifier())
                .fetch_optional(&mut **tx)
                .await?;
        match actual {
            Some(actual) => Err(DomainError::VersionConflict {
                key: record.identifier().to_string(),
                expected: record.version(),
                actual,
            }),
            None => Err(DomainError::not_found(format!(
                "outbox {}",
                record.identifier()
            ))),
        }
    }

    async fn find(&self, tx: &mut PgTx, identifier: &str) -> DomainResult<Option<OutboxRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM outboxp.outbox WHERE identifier = $1");
        let row = sqlx::query(&sql)
            .bind(identifier)
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }
}
