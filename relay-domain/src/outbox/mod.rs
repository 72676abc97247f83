//! Outbox 模型与仓储协议（outbox）
//!
//! - `OutboxRecord`：与业务写入同事务落库的待投递事件及其状态机；
//! - `RetryPolicy`：回退时的指数退避与重试上限；
//! - `WorkerId`：持锁 worker 的进程级唯一身份；
//! - `UnitOfWork`/`OutboxRepository`：存储后端需实现的事务与认领协议。
//!
mod record;
mod repository;
mod retry;
mod worker_id;

pub use record::{JobStatus, OutboxRecord, RecordStatus, Reversal};
pub use repository::{ClaimRequest, OutboxRepository, UnitOfWork};
pub use retry::RetryPolicy;
pub use worker_id::WorkerId;
