//! 版本校验的旁路缓存（CacheCoherencyService）
//!
//! 读路径：
//! - 命中时用一次廉价的版本读取与缓存中的 `row_version` 比较，相等才返回缓存值；
//! - 不相等、版本读取失败或缓存值无法反序列化，一律视为未命中；
//! - 未命中时从主存储加载完整聚合，连同加载时读到的版本写回缓存后返回；
//! - 缓存子系统的可降级故障返回兜底投影（`CacheRead::Fallback`），不可降级故障向上传播。
//!
//! 调用方不会看到版本落后于权威行的缓存值，但刚变更的行在缓存写回前可能短暂不可见。
//!
use super::store::{CacheEntry, CacheKey, CacheStore};
use crate::error::DomainResult;
use async_trait::async_trait;
use bon::Builder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

/// 带版本的聚合
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

/// 权威数据源
#[async_trait]
pub trait VersionedSource<T>: Send + Sync {
    /// 权威行的当前版本；行不存在时返回 `None`
    async fn current_version(&self) -> DomainResult<Option<i64>>;

    /// 加载完整聚合及加载时的版本
    async fn load(&self) -> DomainResult<Versioned<T>>;

    /// 缓存降级时返回的最小安全投影
    fn fallback(&self) -> T;
}

/// 读结果：区分“缓存命中”“已刷新”与“降级兜底”
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRead<T> {
    Cached(T),
    Refreshed(T),
    Fallback(T),
}

impl<T> CacheRead<T> {
    pub fn value(&self) -> &T {
        match self {
            CacheRead::Cached(v) | CacheRead::Refreshed(v) | CacheRead::Fallback(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            CacheRead::Cached(v) | CacheRead::Refreshed(v) | CacheRead::Fallback(v) => v,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, CacheRead::Fallback(_))
    }
}

#[derive(Debug, Clone, Builder)]
pub struct CacheConfig {
    /// 部署环境，作为缓存键的命名空间
    #[builder(into, default = "development".to_string())]
    pub environment: String,
    /// 写入时的过期时间；过期不替代版本校验
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::builder().build()
    }
}

#[derive(Clone)]
pub struct CacheCoherencyService {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl CacheCoherencyService {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn key(&self, aggregate_type: &str, identifier: &str) -> CacheKey {
        CacheKey::new(&self.config.environment, aggregate_type, identifier)
    }

    pub async fn read<T, S>(&self, key: &CacheKey, source: &S) -> DomainResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        S: VersionedSource<T> + ?Sized,
    {
        let cached = match self.store.get(key).await {
            Ok(cached) => cached,
            Err(err) if err.is_recoverable() => {
                tracing::warn!(key = %key, error = %err, "cache degraded; serving fallback");
                return Ok(CacheRead::Fallback(source.fallback()));
            }
            Err(err) => return Err(err),
        };

        if let Some(entry) = cached {
            match source.current_version().await {
                Ok(Some(version)) if version == entry.row_version => {
                    match serde_json::from_value::<T>(entry.payload) {
                        Ok(value) => return Ok(CacheRead::Cached(value)),
                        Err(err) => {
                            tracing::debug!(key = %key, error = %err, "cached payload undecodable")
                        }
                    }
                }
                Ok(version) => tracing::debug!(
                    key = %key,
                    cached = entry.row_version,
                    current = ?version,
                    "cached entry is stale"
                ),
                Err(err) => {
                    tracing::debug!(key = %key, error = %err, "version check failed")
                }
            }
        }

        let fresh = source.load().await?;
        let entry = CacheEntry {
            payload: serde_json::to_value(&fresh.value)?,
            row_version: fresh.version,
        };
        match self.store.set(key, entry, self.config.ttl).await {
            Ok(()) => {}
            Err(err) if err.is_recoverable() => {
                tracing::warn!(key = %key, error = %err, "cache write-back degraded");
            }
            Err(err) => return Err(err),
        }

        Ok(CacheRead::Refreshed(fresh.value))
    }

    /// 直接写入（由失效通知的消费者使用）
    pub async fn write<T: Serialize + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        row_version: i64,
    ) -> DomainResult<()> {
        let entry = CacheEntry {
            payload: serde_json::to_value(value)?,
            row_version,
        };
        self.store.set(key, entry, self.config.ttl).await
    }
}
