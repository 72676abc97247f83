//! 用户仓储
//!
//! 事务内的读写与 outbox 仓储共用同一种事务类型，使“创建用户”与“写入 outbox 记录”、
//! “欢迎邮件副作用”与“outbox 终结”都能在一次提交中完成。
//! 事务外的 `row_version`/`load` 供缓存一致性读路径使用。
//!
use super::model::{UserAggregate, UserRecord, UserSettingsRecord};
use async_trait::async_trait;
use relay_domain::error::DomainResult;
use relay_domain::outbox::UnitOfWork;
use relay_domain::persist::{InMemoryDatabase, InMemoryTx};

#[async_trait]
pub trait UserRepository: UnitOfWork {
    async fn insert_user(&self, tx: &mut Self::Tx, user: &UserRecord) -> DomainResult<UserRecord>;

    async fn insert_settings(
        &self,
        tx: &mut Self::Tx,
        settings: &UserSettingsRecord,
    ) -> DomainResult<UserSettingsRecord>;

    async fn find_user(&self, tx: &mut Self::Tx, identifier: &str)
    -> DomainResult<Option<UserRecord>>;

    async fn find_settings(
        &self,
        tx: &mut Self::Tx,
        user_id: &str,
    ) -> DomainResult<Option<UserSettingsRecord>>;

    /// 带版本校验的更新，返回递增版本后的行
    async fn update_user(&self, tx: &mut Self::Tx, user: &UserRecord) -> DomainResult<UserRecord>;

    async fn update_settings(
        &self,
        tx: &mut Self::Tx,
        settings: &UserSettingsRecord,
    ) -> DomainResult<UserSettingsRecord>;

    /// 已提交的用户行版本；不存在时返回 `None`
    async fn row_version(&self, identifier: &str) -> DomainResult<Option<i64>>;

    /// 已提交的用户聚合
    async fn load(&self, identifier: &str) -> DomainResult<Option<UserAggregate>>;
}

/// 内存版用户仓储；与 `InMemoryOutboxRepository` 共享同一个数据库
#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    db: InMemoryDatabase,
}

impl InMemoryUserRepository {
    pub fn new(db: InMemoryDatabase) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &InMemoryDatabase {
        &self.db
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUserRepository {
    type Tx = InMemoryTx;

    async fn begin(&self) -> DomainResult<InMemoryTx> {
        self.db.begin()
    }

    async fn commit(&self, tx: InMemoryTx) -> DomainResult<()> {
        tx.commit()
    }

    async fn rollback(&self, tx: InMemoryTx) -> DomainResult<()> {
        tx.rollback()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn insert_user(&self, tx: &mut InMemoryTx, user: &UserRecord) -> DomainResult<UserRecord> {
        tx.insert(user)
    }

    async fn insert_settings(
        &self,
        tx: &mut InMemoryTx,
        settings: &UserSettingsRecord,
    ) -> DomainResult<UserSettingsRecord> {
        tx.insert(settings)
    }

    async fn find_user(
        &self,
        tx: &mut InMemoryTx,
        identifier: &str,
    ) -> DomainResult<Option<UserRecord>> {
        tx.get::<UserRecord>(identifier)
    }

    async fn find_settings(
        &self,
        tx: &mut InMemoryTx,
        user_id: &str,
    ) -> DomainResult<Option<UserSettingsRecord>> {
        tx.get::<UserSettingsRecord>(user_id)
    }

    async fn update_user(&self, tx: &mut InMemoryTx, user: &UserRecord) -> DomainResult<UserRecord> {
        tx.update(user)
    }

    async fn update_settings(
        &self,
        tx: &mut InMemoryTx,
        settings: &UserSettingsRecord,
    ) -> DomainResult<UserSettingsRecord> {
        tx.update(settings)
    }

    async fn row_version(&self, identifier: &str) -> DomainResult<Option<i64>> {
        Ok(self.db.get::<UserRecord>(identifier)?.map(|u| u.version))
    }

    async fn load(&self, identifier: &str) -> DomainResult<Option<UserAggregate>> {
        let Some(user) = self.db.get::<UserRecord>(identifier)? else {
            return Ok(None);
        };
        let Some(settings) = self.db.get::<UserSettingsRecord>(identifier)? else {
            return Ok(None);
        };
        Ok(Some(UserAggregate { user, settings }))
    }
}
