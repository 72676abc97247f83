//! 按标识读取用户（GetUserByIdentifier）
//!
//! 读路径经由 `CacheCoherencyService`：缓存值仅在行版本一致时返回；
//! 缓存降级时返回仅含 `identifier` 与 `status` 的最小投影。
//!
use super::model::{UserDto, UserStatus};
use super::repository::UserRepository;
use super::USER_CACHE_AGGREGATE;
use crate::context::AppContext;
use crate::error::AppError;
use crate::query::Query;
use crate::query_handler::QueryHandler;
use crate::validate::is_blank;
use async_trait::async_trait;
use relay_domain::cache::{CacheCoherencyService, CacheRead, Versioned, VersionedSource};
use relay_domain::error::{DomainError, DomainResult};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct GetUserByIdentifier {
    pub identifier: String,
    pub status: UserStatus,
}

impl Query for GetUserByIdentifier {
    const NAME: &'static str = "users.get_by_identifier";
    type Dto = UserDto;
}

/// 以用户仓储为权威数据源；状态不匹配视同不存在
struct UserSource<'a, U> {
    users: &'a U,
    identifier: &'a str,
    status: UserStatus,
}

#[async_trait]
impl<U: UserRepository> VersionedSource<UserDto> for UserSource<'_, U> {
    async fn current_version(&self) -> DomainResult<Option<i64>> {
        self.users.row_version(self.identifier).await
    }

    async fn load(&self) -> DomainResult<Versioned<UserDto>> {
        let aggregate = self
            .users
            .load(self.identifier)
            .await?
            .filter(|a| a.user.status == self.status)
            .ok_or_else(|| DomainError::not_found(format!("user {}", self.identifier)))?;
        Ok(Versioned {
            version: aggregate.version(),
            value: UserDto::from(&aggregate),
        })
    }

    fn fallback(&self) -> UserDto {
        UserDto::minimal(self.identifier, self.status)
    }
}

pub struct GetUserByIdentifierHandler<U> {
    users: Arc<U>,
    cache: CacheCoherencyService,
}

impl<U: UserRepository> GetUserByIdentifierHandler<U> {
    pub fn new(users: Arc<U>, cache: CacheCoherencyService) -> Self {
        Self { users, cache }
    }
}

#[async_trait]
impl<U: UserRepository + 'static> QueryHandler<GetUserByIdentifier> for GetUserByIdentifierHandler<U> {
    async fn handle(&self, ctx: &AppContext, q: GetUserByIdentifier) -> Result<UserDto, AppError> {
        if is_blank(&q.identifier) {
            return Err(AppError::validation("identifier is required"));
        }

        let key = self.cache.key(USER_CACHE_AGGREGATE, &q.identifier);
        let source = UserSource {
            users: self.users.as_ref(),
            identifier: &q.identifier,
            status: q.status,
        };

        match self.cache.read(&key, &source).await {
            // 缓存条目不区分查询状态，命中后仍按状态过滤
            Ok(CacheRead::Cached(dto)) if dto.status != q.status => {
                Err(AppError::not_found(format!("user {}", q.identifier)))
            }
            Ok(read) => {
                if read.is_fallback() {
                    tracing::debug!(key = %key, trace_id = %ctx.trace_id, "serving minimal user projection");
                }
                if let CacheRead::Refreshed(dto) = &read {
                    tracing::debug!(key = %key, identifier = %dto.identifier, "user cache refreshed");
                }
                Ok(read.into_inner())
            }
            Err(DomainError::NotFound { .. }) => {
                Err(AppError::not_found(format!("user {}", q.identifier)))
            }
            Err(err) => Err(err.into()),
        }
    }
}
