//! worker 配置
//!
//! 全部来自环境变量（存在 `.env` 时先行加载），未设置的项使用默认值；
//! 批量大小、并发度、轮询间隔与重试上限必须为正。
//!
use anyhow::{Context, Result, ensure};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// 中继 worker 的运行配置
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub environment: String,
    pub worker_id: Option<String>,
    pub poll_interval: Duration,
    pub claim_batch_size: usize,
    pub dispatch_batch_size: usize,
    pub dispatch_concurrency: usize,
    pub reply_timeout: Duration,
    pub max_attempts: u32,
    pub cache_ttl: Option<Duration>,
    /// 内存存储模式下启动时预置的演示用户数
    pub seed_users: usize,
    pub database_url: Option<String>,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a valid number, got {raw:?}")),
        None => Ok(default),
    }
}

impl WorkerConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// 以任意查找函数读取配置，便于测试注入
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            environment: lookup("RELAY_ENV").unwrap_or_else(|| "development".to_string()),
            worker_id: lookup("RELAY_WORKER_ID").filter(|id| !id.trim().is_empty()),
            poll_interval: Duration::from_secs(parse_or(&lookup, "RELAY_POLL_INTERVAL_SECS", 20)?),
            claim_batch_size: parse_or(&lookup, "RELAY_CLAIM_BATCH_SIZE", 12)?,
            dispatch_batch_size: parse_or(&lookup, "RELAY_DISPATCH_BATCH_SIZE", 3)?,
            dispatch_concurrency: parse_or(&lookup, "RELAY_DISPATCH_CONCURRENCY", 3)?,
            reply_timeout: Duration::from_secs(parse_or(&lookup, "RELAY_REPLY_TIMEOUT_SECS", 30)?),
            max_attempts: parse_or(&lookup, "RELAY_MAX_ATTEMPTS", 5)?,
            cache_ttl: lookup("RELAY_CACHE_TTL_SECS")
                .map(|raw| {
                    raw.trim()
                        .parse()
                        .map(Duration::from_secs)
                        .with_context(|| format!("RELAY_CACHE_TTL_SECS must be a valid number, got {raw:?}"))
                })
                .transpose()?,
            seed_users: parse_or(&lookup, "RELAY_SEED_USERS", 3)?,
            database_url: lookup("DATABASE_URL"),
        };

        ensure!(!config.poll_interval.is_zero(), "RELAY_POLL_INTERVAL_SECS must be positive");
        ensure!(config.claim_batch_size > 0, "RELAY_CLAIM_BATCH_SIZE must be positive");
        ensure!(config.dispatch_batch_size > 0, "RELAY_DISPATCH_BATCH_SIZE must be positive");
        ensure!(config.dispatch_concurrency > 0, "RELAY_DISPATCH_CONCURRENCY must be positive");
        ensure!(config.max_attempts > 0, "RELAY_MAX_ATTEMPTS must be positive");
        Ok(config)
    }
}
