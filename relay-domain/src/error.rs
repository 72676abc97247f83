//! 领域层统一错误定义
//!
//! 按投递链路的失败语义划分：输入校验、瞬时投递失败、瞬时副作用失败、
//! 永久失败、缓存降级与缓存致命错误，外加存储/序列化等基础设施错误，
//! 便于在各实现层统一转换为 `DomainError`。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 输入校验 ---
    #[error("validation error: {reason}")]
    Validation { reason: String },

    // --- 投递链路 ---
    #[error("transient delivery error: {reason}")]
    TransientDelivery { reason: String },
    #[error("transient side effect error: {reason}")]
    TransientSideEffect { reason: String },
    #[error("permanent error: {reason}")]
    Permanent { reason: String },

    // --- 缓存 ---
    #[error("cache degraded: {reason}")]
    CacheDegraded { reason: String },
    #[error("cache fatal: {reason}")]
    CacheFatal { reason: String },

    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    // --- 仓储/持久化 ---
    #[error("database error: {reason}")]
    Database { reason: String },
    #[error("version conflict: key={key}, expected={expected}, actual={actual}")]
    VersionConflict {
        key: String,
        expected: i64,
        actual: i64,
    },
    #[error("not found: {reason}")]
    NotFound { reason: String },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
}

impl DomainError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn transient_delivery(reason: impl Into<String>) -> Self {
        Self::TransientDelivery {
            reason: reason.into(),
        }
    }

    pub fn transient_side_effect(reason: impl Into<String>) -> Self {
        Self::TransientSideEffect {
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent {
            reason: reason.into(),
        }
    }

    pub fn cache_degraded(reason: impl Into<String>) -> Self {
        Self::CacheDegraded {
            reason: reason.into(),
        }
    }

    pub fn cache_fatal(reason: impl Into<String>) -> Self {
        Self::CacheFatal {
            reason: reason.into(),
        }
    }

    pub fn database(reason: impl Into<String>) -> Self {
        Self::Database {
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// 是否为可重试的瞬时错误（由下一轮轮询自然重试）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientDelivery { .. }
                | Self::TransientSideEffect { .. }
                | Self::Database { .. }
                | Self::VersionConflict { .. }
        )
    }

    /// 是否为缓存子系统显式标记的可恢复错误
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::CacheDegraded { .. })
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

// 允许在基础设施层直接使用 `?` 将 sqlx 错误转换为 DomainError
#[cfg(feature = "postgres")]
impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound {
                reason: "row not found".to_string(),
            },
            other => DomainError::Database {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(DomainError::transient_delivery("timeout").is_transient());
        assert!(DomainError::transient_side_effect("write").is_transient());
        assert!(!DomainError::permanent("bad payload").is_transient());
        assert!(!DomainError::validation("empty").is_transient());

        assert!(DomainError::cache_degraded("redis down").is_recoverable());
        assert!(!DomainError::cache_fatal("auth").is_recoverable());
    }

    #[test]
    fn serde_errors_convert() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: DomainError = err.into();
        assert!(matches!(err, DomainError::Serde { .. }));
    }
}
