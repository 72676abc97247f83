//! 投递子系统（eventing）
//!
//! 提供 outbox 投递流水线的各个环节与运行时：
//! - `ClaimService`：原子地认领一批可投递记录；
//! - `BatchDispatcher`：有界并发地投递一批记录，单条失败相互隔离；
//! - `OutboxPublisher`：单条投递、副作用落库与失败回退；
//! - `OutboxEventHandler`：事件类型级别的映射与副作用；
//! - `InvalidationPublisher`：发后即忘的缓存失效通知；
//! - `DispatchEngine`：周期调度各事件类型的投递，并分发订阅到的通知。
//!
//! 该模块仅定义协议与引擎，不绑定具体存储与消息系统。
//!
mod claim;
mod detached;
mod dispatcher;
mod engine;
mod handler;
mod invalidation;
mod publisher;

pub use claim::ClaimService;
pub use detached::spawn_detached;
pub use dispatcher::{BatchDispatcher, BatchReport, DispatchConfig, DispatchItem};
pub use engine::{DispatchCycle, DispatchEngine, DispatchEngineConfig, DispatchJob, EngineHandle};
pub use handler::OutboxEventHandler;
pub use invalidation::{InvalidationFailure, InvalidationNotice, InvalidationPublisher};
pub use publisher::{Delivery, OutboxPublisher, PublisherConfig, RecordPublisher};
