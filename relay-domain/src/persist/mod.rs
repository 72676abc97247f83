//! 持久化（persist）
//!
//! 提供存储后端的具体实现：
//! - `InMemoryDatabase`/`InMemoryTx`：带行锁、版本校验与原子提交的内存事务存储；
//! - `InMemoryOutboxRepository`：基于内存存储的 `OutboxRepository` 实现；
//! - `PgOutboxRepository`（`postgres` feature）：基于 sqlx 的 Postgres 实现。
//!
//! 协议本身定义在 `outbox` 模块，业务仓储（如用户表）在应用层复用 `Row` 与内存事务。
//!
mod inmemory;
mod inmemory_outbox;
#[cfg(feature = "postgres")]
mod postgres;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use inmemory::{InMemoryDatabase, InMemoryTx};
pub use inmemory_outbox::InMemoryOutboxRepository;
#[cfg(feature = "postgres")]
pub use postgres::{PgOutboxRepository, PgTx};

/// 可由内存存储保存的行
///
/// `version` 由存储层维护：插入时为 1，每次更新加 1，调用方写入的值仅用于校验。
pub trait Row: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: &'static str;

    fn key(&self) -> String;

    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);
}
