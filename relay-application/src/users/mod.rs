//! 用户功能
//!
//! - `CreateUser`：用户、设置与欢迎邮件 outbox 记录同事务写入；
//! - `GetUserByIdentifier`：经缓存一致性服务读取；
//! - `WelcomeEmailHandler`：欢迎邮件事件的消息映射与副作用；
//! - `UserCacheRefresher`：消费失效通知，重写共享用户缓存。
//!
mod cache_refresher;
mod create_user;
mod get_user;
mod model;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;
mod welcome_email;

pub use cache_refresher::UserCacheRefresher;
pub use create_user::{CreateUser, CreateUserHandler, CreatedUser};
pub use get_user::{GetUserByIdentifier, GetUserByIdentifierHandler};
pub use model::{
    UserAggregate, UserDetails, UserDto, UserRecord, UserSettingsRecord, UserStatus,
    WelcomeUserEvent,
};
#[cfg(feature = "postgres")]
pub use postgres::PgUserRepository;
pub use repository::{InMemoryUserRepository, UserRepository};
pub use welcome_email::{WelcomeEmailHandler, WelcomeEmailRequest};

/// 欢迎邮件事件类型（outbox `event_type`）
pub const WELCOME_USER_EVENT: &str = "send-welcome-user-integration-event";
/// 欢迎邮件请求/应答通道
pub const WELCOME_USER_QUEUE: &str = "send-welcome-user-integration-event-queue";
/// 共享用户缓存失效通知通道
pub const USER_CACHE_QUEUE: &str = "user-shared-cache-event-queue";

pub(crate) const USER_CACHE_AGGREGATE: &str = "user";
pub(crate) const USER_CLIENT_CACHE_AGGREGATE: &str = "user-client";
