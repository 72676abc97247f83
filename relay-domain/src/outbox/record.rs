//! Outbox 记录（OutboxRecord）
//!
//! 与业务写入处于同一事务中落库的待投递事件。记录一旦创建即归投递流水线所有，
//! 状态迁移全部通过本类型的方法完成，以保证：
//! - `is_published = true` ⇒ `job_status = Completed`；
//! - `job_status = Processing` ⇒ `locked_by`/`locked_at` 非空；
//! - `Completed`/`Failed` 为终态，不会再被认领。
//!
use super::retry::RetryPolicy;
use super::worker_id::WorkerId;
use crate::error::{DomainError, DomainResult};
use bon::Builder;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// 投递作业状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(DomainError::invalid_state(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// 软删除标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordStatus {
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "ACTIVE",
            RecordStatus::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(RecordStatus::Active),
            "INACTIVE" => Ok(RecordStatus::Inactive),
            other => Err(DomainError::invalid_state(format!(
                "unknown record status: {other}"
            ))),
        }
    }
}

/// 回退结果：重新排队或达到上限转为失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reversal {
    Requeued { next_attempt_at: DateTime<Utc> },
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// 记录唯一标识
    identifier: String,
    /// 事件类型（同时作为认领时的筛选条件）
    event_type: String,
    /// 写入时聚合的序列化快照
    payload: Value,
    /// 软删除标记
    #[builder(default = RecordStatus::Active)]
    status: RecordStatus,
    #[builder(default)]
    is_published: bool,
    #[builder(default = JobStatus::Pending)]
    job_status: JobStatus,
    /// 持有锁的 worker
    locked_by: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    /// 跨系统链路追踪 ID
    trace_id: String,
    /// 已失败的投递次数
    #[builder(default)]
    attempts: u32,
    /// 回退后允许再次认领的最早时间
    next_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    /// 乐观锁版本，由存储层在每次更新时递增
    #[builder(default)]
    version: i64,
}

impl OutboxRecord {
    /// 创建一条待投递记录（Pending、未加锁）
    pub fn new(event_type: impl Into<String>, payload: Value, trace_id: impl Into<String>) -> Self {
        let now = Utc::now();
        OutboxRecord::builder()
            .identifier(Uuid::new_v4().to_string())
            .event_type(event_type.into())
            .payload(payload)
            .trace_id(trace_id.into())
            .created_at(now)
            .modified_at(now)
            .build()
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn is_published(&self) -> bool {
        self.is_published
    }

    pub fn job_status(&self) -> JobStatus {
        self.job_status
    }

    pub fn locked_by(&self) -> Option<&str> {
        self.locked_by.as_deref()
    }

    pub fn locked_at(&self) -> Option<DateTime<Utc>> {
        self.locked_at
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.next_attempt_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// 由存储层回填版本号
    pub fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    /// 该记录当前是否可被指定事件类型的认领选中
    ///
    /// 与 Postgres 实现中的 SQL 条件保持一致。
    pub fn is_claimable(&self, event_type: &str, now: DateTime<Utc>, lock_timeout: Duration) -> bool {
        if self.status != RecordStatus::Active || self.is_published || self.event_type != event_type
        {
            return false;
        }

        match self.job_status {
            JobStatus::Pending => self.next_attempt_at.is_none_or(|at| at <= now),
            JobStatus::Processing => self.is_lock_expired(now, lock_timeout),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }

    /// Processing 记录的锁是否已超时（持有者视为已崩溃）
    pub fn is_lock_expired(&self, now: DateTime<Utc>, lock_timeout: Duration) -> bool {
        let timeout = ChronoDuration::from_std(lock_timeout).unwrap_or(ChronoDuration::MAX);
        match self.locked_at {
            Some(at) => at
                .checked_add_signed(timeout)
                .is_some_and(|deadline| deadline < now),
            None => true,
        }
    }

    /// 是否由指定 worker 持锁处理中
    pub fn is_held_by(&self, worker: &WorkerId) -> bool {
        self.job_status == JobStatus::Processing && self.locked_by.as_deref() == Some(worker.as_str())
    }

    /// Pending（或锁已超时的 Processing）→ Processing
    pub fn claim(&mut self, worker: &WorkerId, now: DateTime<Utc>) -> DomainResult<()> {
        if self.job_status.is_terminal() || self.is_published {
            return Err(DomainError::invalid_state(format!(
                "outbox {} is {} and cannot be claimed",
                self.identifier, self.job_status
            )));
        }

        self.job_status = JobStatus::Processing;
        self.locked_by = Some(worker.to_string());
        self.locked_at = Some(now);
        self.modified_at = now;
        Ok(())
    }

    /// Processing → Completed
    pub fn complete(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.job_status != JobStatus::Processing {
            return Err(DomainError::invalid_state(format!(
                "outbox {} is {} and cannot be completed",
                self.identifier, self.job_status
            )));
        }

        self.is_published = true;
        self.job_status = JobStatus::Completed;
        self.next_attempt_at = None;
        self.last_error = None;
        self.modified_at = now;
        Ok(())
    }

    /// 回退认领：清锁、记录失败原因；达到重试上限时转为 Failed
    pub fn revert(&mut self, reason: &str, policy: &RetryPolicy, now: DateTime<Utc>) -> Reversal {
        self.attempts = self.attempts.saturating_add(1);
        self.is_published = false;
        self.locked_by = None;
        self.locked_at = None;
        self.last_error = Some(reason.to_string());
        self.modified_at = now;

        if policy.is_exhausted(self.attempts) {
            self.job_status = JobStatus::Failed;
            self.next_attempt_at = None;
            return Reversal::Exhausted;
        }

        let next_attempt_at = now + policy.backoff_for(self.attempts);
        self.job_status = JobStatus::Pending;
        self.next_attempt_at = Some(next_attempt_at);
        Reversal::Requeued { next_attempt_at }
    }

    /// 不可重试的失败，需人工介入
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.is_published = false;
        self.job_status = JobStatus::Failed;
        self.locked_by = None;
        self.locked_at = None;
        self.next_attempt_at = None;
        self.last_error = Some(reason.to_string());
        self.modified_at = now;
    }

    /// 校验记录级不变式，存储层在每次写入前调用
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.is_published && self.job_status != JobStatus::Completed {
            return Err(DomainError::invalid_state(format!(
                "outbox {} is published but {}",
                self.identifier, self.job_status
            )));
        }
        if self.job_status == JobStatus::Processing
            && (self.locked_by.is_none() || self.locked_at.is_none())
        {
            return Err(DomainError::invalid_state(format!(
                "outbox {} is processing without a lock",
                self.identifier
            )));
        }
        Ok(())
    }
}
