use crate::error::DomainResult;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// 缓存键：`{environment}:{aggregate_type}-{identifier}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(environment: &str, aggregate_type: &str, identifier: &str) -> Self {
        Self(format!("{environment}:{aggregate_type}-{identifier}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 缓存条目：聚合快照及写入时权威行的版本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub payload: Value,
    pub row_version: i64,
}

/// 分布式缓存协议
///
/// 实现方以 `CacheDegraded` 表示可降级的故障（如连接中断），
/// 以 `CacheFatal` 表示不可降级的故障（如鉴权失败）。
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> DomainResult<Option<CacheEntry>>;

    async fn set(&self, key: &CacheKey, entry: CacheEntry, ttl: Option<Duration>) -> DomainResult<()>;
}

/// 内存版缓存，过期时间基于 tokio 时钟
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<DashMap<CacheKey, (CacheEntry, Option<Instant>)>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &CacheKey) -> DomainResult<Option<CacheEntry>> {
        let now = Instant::now();
        let hit = self.entries.get(key).and_then(|e| {
            let (entry, expires_at) = e.value();
            match expires_at {
                Some(at) if *at <= now => None,
                _ => Some(entry.clone()),
            }
        });
        if hit.is_none() {
            self.entries.remove_if(key, |_, (_, at)| at.is_some_and(|at| at <= now));
        }
        Ok(hit)
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry, ttl: Option<Duration>) -> DomainResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.clone(), (entry, expires_at));
        Ok(())
    }
}
