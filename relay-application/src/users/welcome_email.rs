//! 欢迎邮件事件处理器
//!
//! - 外发消息体：`{ email, fullName, emailVerificationToken }`，发往欢迎邮件请求队列；
//! - 副作用：在 outbox 终结的同一事务中标记 `is_welcome_email_sent`，
//!   并更新用户行使其版本递增，令旧的缓存条目失效；
//! - 产出一条失效通知，供共享缓存刷新。
//!
use super::model::WelcomeUserEvent;
use super::repository::UserRepository;
use super::{WELCOME_USER_EVENT, WELCOME_USER_QUEUE};
use async_trait::async_trait;
use chrono::Utc;
use relay_domain::error::{DomainError, DomainResult};
use relay_domain::eventing::{InvalidationNotice, OutboxEventHandler};
use relay_domain::outbox::OutboxRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// 欢迎邮件请求体（同时是通知模块消费者的输入）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeEmailRequest {
    pub email: String,
    pub full_name: String,
    pub email_verification_token: String,
}

pub struct WelcomeEmailHandler<U> {
    users: Arc<U>,
}

impl<U: UserRepository> WelcomeEmailHandler<U> {
    pub fn new(users: Arc<U>) -> Self {
        Self { users }
    }
}

fn decode_event(record: &OutboxRecord) -> DomainResult<WelcomeUserEvent> {
    serde_json::from_value(record.payload().clone()).map_err(|err| {
        DomainError::permanent(format!(
            "outbox {} carries no welcome event: {err}",
            record.identifier()
        ))
    })
}

#[async_trait]
impl<U: UserRepository> OutboxEventHandler<U::Tx> for WelcomeEmailHandler<U> {
    fn event_type(&self) -> &str {
        WELCOME_USER_EVENT
    }

    fn channel(&self) -> &str {
        WELCOME_USER_QUEUE
    }

    fn to_message_payload(&self, record: &OutboxRecord) -> DomainResult<Value> {
        let event = decode_event(record)?;
        let request = WelcomeEmailRequest {
            full_name: event.full_name(),
            email: event.email,
            email_verification_token: event.email_verification_token,
        };
        Ok(serde_json::to_value(request)?)
    }

    async fn apply_side_effect(
        &self,
        tx: &mut U::Tx,
        record: &OutboxRecord,
    ) -> DomainResult<Option<InvalidationNotice>> {
        let event = decode_event(record)?;
        let now = Utc::now();

        let mut settings = self
            .users
            .find_settings(tx, &event.identifier)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("settings of user {}", event.identifier)))?;
        settings.is_welcome_email_sent = true;
        settings.modified_at = now;
        self.users.update_settings(tx, &settings).await?;

        let mut user = self
            .users
            .find_user(tx, &event.identifier)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("user {}", event.identifier)))?;
        user.modified_at = now;
        let user = self.users.update_user(tx, &user).await?;

        tracing::debug!(
            user_id = %user.identifier,
            version = user.version,
            "welcome email flagged as sent"
        );

        Ok(Some(InvalidationNotice::new(
            user.identifier,
            user.status.as_str(),
            record.trace_id(),
        )))
    }
}
