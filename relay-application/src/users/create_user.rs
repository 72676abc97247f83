//! 创建用户（CreateUser）
//!
//! 在同一事务中写入用户行、设置行与欢迎邮件 outbox 记录：要么三者都提交，要么都不存在。
//! outbox 记录的 `trace_id` 取自调用上下文，贯穿后续投递与缓存刷新。
//!
use super::model::{UserRecord, UserSettingsRecord, UserStatus, WelcomeUserEvent};
use super::repository::UserRepository;
use super::WELCOME_USER_EVENT;
use crate::command::Command;
use crate::command_handler::CommandHandler;
use crate::context::AppContext;
use crate::error::AppError;
use crate::validate::{is_blank, is_email};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use relay_domain::error::{DomainError, DomainResult};
use relay_domain::outbox::{OutboxRecord, OutboxRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const EMAIL_VERIFICATION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl Command for CreateUser {
    const NAME: &'static str = "users.create";
    type Output = CreatedUser;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedUser {
    pub identifier: String,
    pub client_id: String,
    pub outbox_id: String,
}

impl CreateUser {
    fn validate(&self) -> Result<(), AppError> {
        if is_blank(&self.first_name) {
            return Err(AppError::validation("firstName is required"));
        }
        if is_blank(&self.last_name) {
            return Err(AppError::validation("lastName is required"));
        }
        if !is_email(&self.email) {
            return Err(AppError::validation(format!("invalid email: {}", self.email)));
        }
        Ok(())
    }
}

pub struct CreateUserHandler<U, O> {
    users: Arc<U>,
    outbox: Arc<O>,
}

impl<U, O> CreateUserHandler<U, O>
where
    U: UserRepository,
    O: OutboxRepository<Tx = U::Tx>,
{
    pub fn new(users: Arc<U>, outbox: Arc<O>) -> Self {
        Self { users, outbox }
    }

    async fn write_all(
        &self,
        tx: &mut U::Tx,
        user: &UserRecord,
        settings: &UserSettingsRecord,
        record: &OutboxRecord,
    ) -> DomainResult<()> {
        self.users.insert_user(tx, user).await?;
        self.users.insert_settings(tx, settings).await?;
        self.outbox.add(tx, record).await?;
        Ok(())
    }
}

#[async_trait]
impl<U, O> CommandHandler<CreateUser> for CreateUserHandler<U, O>
where
    U: UserRepository + 'static,
    O: OutboxRepository<Tx = U::Tx> + 'static,
{
    async fn handle(&self, ctx: &AppContext, cmd: CreateUser) -> Result<CreatedUser, AppError> {
        cmd.validate()?;

        let now = Utc::now();
        let user = UserRecord {
            identifier: Uuid::new_v4().to_string(),
            client_id: Uuid::new_v4().to_string(),
            first_name: cmd.first_name.trim().to_string(),
            last_name: cmd.last_name.trim().to_string(),
            email: cmd.email,
            status: UserStatus::Active,
            created_at: now,
            modified_at: now,
            version: 0,
        };
        let settings = UserSettingsRecord {
            user_id: user.identifier.clone(),
            email_verification_token: Uuid::new_v4().to_string(),
            email_verification_token_expires_at: now + Duration::hours(EMAIL_VERIFICATION_TTL_HOURS),
            is_email_verified: false,
            is_welcome_email_sent: false,
            modified_at: now,
            version: 0,
        };
        let payload = serde_json::to_value(WelcomeUserEvent::snapshot(&user, &settings))
            .map_err(DomainError::from)?;
        let record = OutboxRecord::new(WELCOME_USER_EVENT, payload, ctx.trace_id.clone());

        let mut tx = self.users.begin().await?;
        if let Err(err) = self.write_all(&mut tx, &user, &settings, &record).await {
            if let Err(rollback_err) = self.users.rollback(tx).await {
                tracing::warn!(error = %rollback_err, "rollback after failed user creation failed");
            }
            return Err(err.into());
        }
        self.users.commit(tx).await?;

        tracing::info!(
            user_id = %user.identifier,
            outbox_id = %record.identifier(),
            trace_id = %ctx.trace_id,
            "user created"
        );

        Ok(CreatedUser {
            identifier: user.identifier,
            client_id: user.client_id,
            outbox_id: record.identifier().to_string(),
        })
    }
}
