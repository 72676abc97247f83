//! Outbox 中继领域层（relay-domain）
//!
//! 将业务写入可靠地传播到下游消费者与读优化缓存，既不丢事件，也不返回过期读：
//! - Outbox 记录模型、状态机与重试策略（`outbox`）
//! - 存储实现：内存事务存储与可选的 Postgres 实现（`persist`）
//! - 消息信封与请求/应答、通知通道协议（`messaging`）
//! - 认领、批量投递、补偿回退与调度引擎（`eventing`）
//! - 基于行版本校验的旁路缓存（`cache`）
//!
//! 本 crate 只定义协议与状态机，不实现消息代理、关系数据库或分布式缓存本身；
//! 内存实现仅用于测试与本地运行。
//!
//! 典型用法：
//! 1. 在业务事务中通过 `OutboxRepository::add` 写入 outbox 记录；
//! 2. 为事件类型实现 `OutboxEventHandler`（消息映射与副作用）；
//! 3. 用 `OutboxPublisher`、`BatchDispatcher` 与 `ClaimService` 组装 `DispatchJob`；
//! 4. 交给 `DispatchEngine` 周期执行，读路径经由 `CacheCoherencyService`。
//!
pub mod cache;
pub mod error;
pub mod eventing;
pub mod messaging;
pub mod outbox;
pub mod persist;
