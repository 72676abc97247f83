//! 用户存储行与读模型
//!
//! `UserRecord` 的 `version` 即缓存校验所用的行版本：任何影响用户读模型的写入
//! （包括设置表的变更）都必须同时更新用户行，使版本递增。
//!
use crate::dto::Dto;
use chrono::{DateTime, Utc};
use relay_domain::error::DomainError;
use relay_domain::persist::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(UserStatus::Active),
            "INACTIVE" => Ok(UserStatus::Inactive),
            other => Err(DomainError::validation(format!("unknown user status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub identifier: String,
    pub client_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub version: i64,
}

impl UserRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl Row for UserRecord {
    const TABLE: &'static str = "users";

    fn key(&self) -> String {
        self.identifier.clone()
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

/// 用户设置，以 `user_id` 为键与用户一对一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettingsRecord {
    pub user_id: String,
    pub email_verification_token: String,
    pub email_verification_token_expires_at: DateTime<Utc>,
    pub is_email_verified: bool,
    pub is_welcome_email_sent: bool,
    pub modified_at: DateTime<Utc>,
    pub version: i64,
}

impl Row for UserSettingsRecord {
    const TABLE: &'static str = "user_settings";

    fn key(&self) -> String {
        self.user_id.clone()
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

/// 用户聚合：用户行加设置行
#[derive(Debug, Clone, PartialEq)]
pub struct UserAggregate {
    pub user: UserRecord,
    pub settings: UserSettingsRecord,
}

impl UserAggregate {
    pub fn version(&self) -> i64 {
        self.user.version
    }
}

/// 用户读模型；缓存中保存的就是它
///
/// 缓存降级时只返回 `identifier` 与 `status`，`details` 为空。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub identifier: String,
    pub status: UserStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<UserDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetails {
    pub client_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub is_email_verified: bool,
    pub is_welcome_email_sent: bool,
    pub version: i64,
}

impl Dto for UserDto {}

impl UserDto {
    pub fn minimal(identifier: impl Into<String>, status: UserStatus) -> Self {
        Self {
            identifier: identifier.into(),
            status,
            details: None,
        }
    }
}

impl From<&UserAggregate> for UserDto {
    fn from(aggregate: &UserAggregate) -> Self {
        let UserAggregate { user, settings } = aggregate;
        Self {
            identifier: user.identifier.clone(),
            status: user.status,
            details: Some(UserDetails {
                client_id: user.client_id.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                email: user.email.clone(),
                is_email_verified: settings.is_email_verified,
                is_welcome_email_sent: settings.is_welcome_email_sent,
                version: user.version,
            }),
        }
    }
}

/// 写入 outbox 的欢迎事件快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeUserEvent {
    pub identifier: String,
    pub client_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub status: UserStatus,
    pub email_verification_token: String,
}

impl WelcomeUserEvent {
    pub fn snapshot(user: &UserRecord, settings: &UserSettingsRecord) -> Self {
        Self {
            identifier: user.identifier.clone(),
            client_id: user.client_id.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            status: user.status,
            email_verification_token: settings.email_verification_token.clone(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
