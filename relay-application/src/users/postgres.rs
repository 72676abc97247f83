//! Postgres 版用户仓储（`postgres` feature）
//!
//! 表结构见 `migrations/0001_users.sql`；更新语句以 `WHERE version = $n` 做乐观校验，
//! 并由数据库执行 `version = version + 1`。
//!
use super::model::{UserAggregate, UserRecord, UserSettingsRecord};
use super::repository::UserRepository;
use async_trait::async_trait;
use relay_domain::error::{DomainError, DomainResult};
use relay_domain::outbox::UnitOfWork;
use relay_domain::persist::PgTx;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row as _};

const USER_COLUMNS: &str =
    "identifier, client_id, first_name, last_name, email, status, created_at, modified_at, version";

const SETTINGS_COLUMNS: &str = "user_id, email_verification_token, \
     email_verification_token_expires_at, is_email_verified, is_welcome_email_sent, \
     modified_at, version";

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> DomainResult<UserRecord> {
    let status: String = row.try_get("status")?;
    Ok(UserRecord {
        identifier: row.try_get("identifier")?,
        client_id: row.try_get("client_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        modified_at: row.try_get("modified_at")?,
        version: row.try_get("version")?,
    })
}

fn settings_from_row(row: &PgRow) -> DomainResult<UserSettingsRecord> {
    Ok(UserSettingsRecord {
        user_id: row.try_get("user_id")?,
        email_verification_token: row.try_get("email_verification_token")?,
        email_verification_token_expires_at: row.try_get("email_verification_token_expires_at")?,
        is_email_verified: row.try_get("is_email_verified")?,
        is_welcome_email_sent: row.try_get("is_welcome_email_sent")?,
        modified_at: row.try_get("modified_at")?,
        version: row.try_get("version")?,
    })
}

/// 更新未命中时区分“版本冲突”与“不存在”
async fn conflict_or_missing(
    tx: &mut PgTx,
    table: &str,
    key_column: &str,
    key: &str,
    expected: i64,
) -> DomainError {
    let sql = format!("SELECT version FROM {table} WHERE {key_column} = $1");
    match sqlx::query_scalar::<_, i64>(&sql)
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
    {
        Ok(Some(actual)) => DomainError::VersionConflict {
            key: key.to_string(),
            expected,
            actual,
        },
        Ok(None) => DomainError::not_found(format!("{table} {key}")),
        Err(err) => err.into(),
    }
}

#[async_trait]
impl UnitOfWork for PgUserRepository {
    type Tx = PgTx;

    async fn begin(&self) -> DomainResult<PgTx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: PgTx) -> DomainResult<()> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: PgTx) -> DomainResult<()> {
        Ok(tx.rollback().await?)
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn insert_user(&self, tx: &mut PgTx, user: &UserRecord) -> DomainResult<UserRecord> {
        let sql = format!(
            "INSERT INTO usersp.users ({USER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&user.identifier)
            .bind(&user.client_id)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(user.status.as_str())
            .bind(user.created_at)
            .bind(user.modified_at)
            .fetch_one(&mut **tx)
            .await?;
        user_from_row(&row)
    }

    async fn insert_settings(
        &self,
        tx: &mut PgTx,
        settings: &UserSettingsRecord,
    ) -> DomainResult<UserSettingsRecord> {
        let sql = format!(
            "INSERT INTO usersp.user_settings ({SETTINGS_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, 1) RETURNING {SETTINGS_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&settings.user_id)
            .bind(&settings.email_verification_token)
            .bind(settings.email_verification_token_expires_at)
            .bind(settings.is_email_verified)
            .bind(settings.is_welcome_email_sent)
            .bind(settings.modified_at)
            .fetch_one(&mut **tx)
            .await?;
        settings_from_row(&row)
    }

    async fn find_user(&self, tx: &mut PgTx, identifier: &str) -> DomainResult<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM usersp.users WHERE identifier = $1");
        let row = sqlx::query(&sql)
            .bind(identifier)
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_settings(
        &self,
        tx: &mut PgTx,
        user_id: &str,
    ) -> DomainResult<Option<UserSettingsRecord>> {
        let sql = format!("SELECT {SETTINGS_COLUMNS} FROM usersp.user_settings WHERE user_id = $1");
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(settings_from_row).transpose()
    }

    async fn update_user(&self, tx: &mut PgTx, user: &UserRecord) -> DomainResult<UserRecord> {
        let sql = format!(
            "UPDATE usersp.users SET first_name = $3, last_name = $4, email = $5, status = $6, \
             modified_at = $7, version = version + 1 \
             WHERE identifier = $1 AND version = $2 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&user.identifier)
            .bind(user.version)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(user.status.as_str())
            .bind(user.modified_at)
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => user_from_row(&row),
            None => Err(conflict_or_missing(
                tx,
                "usersp.users",
                "identifier",
                &user.identifier,
                user.version,
            )
            .await),
        }
    }

    async fn update_settings(
        &self,
        tx: &mut PgTx,
        settings: &UserSettingsRecord,
    ) -> DomainResult<UserSettingsRecord> {
        let sql = format!(
            "UPDATE usersp.user_settings SET email_verification_token = $3, \
             email_verification_token_expires_at = $4, is_email_verified = $5, \
             is_welcome_email_sent = $6, modified_at = $7, version = version + 1 \
             WHERE user_id = $1 AND version = $2 RETURNING {SETTINGS_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&settings.user_id)
            .bind(settings.version)
            .bind(&settings.email_verification_token)
            .bind(settings.email_verification_token_expires_at)
            .bind(settings.is_email_verified)
            .bind(settings.is_welcome_email_sent)
            .bind(settings.modified_at)
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => settings_from_row(&row),
            None => Err(conflict_or_missing(
                tx,
                "usersp.user_settings",
                "user_id",
                &settings.user_id,
                settings.version,
            )
            .await),
        }
    }

    async fn row_version(&self, identifier: &str) -> DomainResult<Option<i64>> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT version FROM usersp.users WHERE identifier = $1")
                .bind(identifier)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn load(&self, identifier: &str) -> DomainResult<Option<UserAggregate>> {
        // 同一快照内读取两张表
        let mut tx = self.pool.begin().await?;
        let user = self.find_user(&mut tx, identifier).await?;
        let settings = self.find_settings(&mut tx, identifier).await?;
        tx.commit().await?;
        Ok(user.zip(settings).map(|(user, settings)| UserAggregate { user, settings }))
    }
}
