//! 应用层（relay-application）
//!
//! - 命令/查询总线：`CommandBus`/`QueryBus` 及按 `TypeId` 路由的内存实现；
//! - 用户功能（`users`）：创建用户（业务写入与 outbox 同事务）、按标识读取（经缓存一致性服务）、
//!   欢迎邮件事件处理器与共享缓存刷新；
//! - 通知功能（`notifications`）：欢迎邮件的请求/应答消费者。
//!
pub mod command;
pub mod command_bus;
pub mod command_handler;
pub mod context;
pub mod dto;
pub mod error;
pub mod inmemory_command_bus;
pub mod inmemory_query_bus;
pub mod notifications;
pub mod query;
pub mod query_bus;
pub mod query_handler;
pub mod users;
mod validate;

pub use inmemory_command_bus::InMemoryCommandBus;
pub use inmemory_query_bus::InMemoryQueryBus;
