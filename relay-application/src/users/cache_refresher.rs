//! 共享用户缓存刷新
//!
//! 消费失效通知，按当前已提交的用户聚合重写两个缓存条目：
//! `{env}:user-{identifier}` 与 `{env}:user-client-{clientId}`，条目携带当前行版本。
//! 通知晚到或重复都无害：读路径总会再做一次版本校验。
//!
use super::model::UserDto;
use super::repository::UserRepository;
use super::{USER_CACHE_AGGREGATE, USER_CACHE_QUEUE, USER_CLIENT_CACHE_AGGREGATE};
use async_trait::async_trait;
use relay_domain::cache::CacheCoherencyService;
use relay_domain::error::DomainResult;
use relay_domain::eventing::InvalidationNotice;
use relay_domain::messaging::{NotificationHandler, RequestMessage};
use std::sync::Arc;

pub struct UserCacheRefresher<U> {
    users: Arc<U>,
    cache: CacheCoherencyService,
}

impl<U: UserRepository> UserCacheRefresher<U> {
    pub fn new(users: Arc<U>, cache: CacheCoherencyService) -> Self {
        Self { users, cache }
    }

    /// 按通知刷新缓存；用户不存在时返回 `false`
    pub async fn refresh(&self, notice: &InvalidationNotice) -> DomainResult<bool> {
        let Some(aggregate) = self.users.load(&notice.aggregate_id).await? else {
            tracing::debug!(user_id = %notice.aggregate_id, "user vanished; nothing to refresh");
            return Ok(false);
        };

        let dto = UserDto::from(&aggregate);
        let version = aggregate.version();
        let by_id = self.cache.key(USER_CACHE_AGGREGATE, &aggregate.user.identifier);
        let by_client = self
            .cache
            .key(USER_CLIENT_CACHE_AGGREGATE, &aggregate.user.client_id);

        self.cache.write(&by_id, &dto, version).await?;
        self.cache.write(&by_client, &dto, version).await?;

        tracing::debug!(
            user_id = %aggregate.user.identifier,
            version,
            trace_id = %notice.trace_id,
            "shared user cache refreshed"
        );
        Ok(true)
    }
}

#[async_trait]
impl<U: UserRepository + 'static> NotificationHandler for UserCacheRefresher<U> {
    fn handler_name(&self) -> &str {
        "user-cache-refresher"
    }

    fn channel(&self) -> &str {
        USER_CACHE_QUEUE
    }

    async fn handle(&self, message: &RequestMessage) -> DomainResult<()> {
        let notice: InvalidationNotice = message.decode()?;
        self.refresh(&notice).await.map(|_| ())
    }
}
