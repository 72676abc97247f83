use bon::Builder;
use chrono::Duration as ChronoDuration;
use std::time::Duration;

/// 回退重试策略：指数退避 + 最大尝试次数
///
/// 第 n 次失败后的等待时间为 `min(initial_backoff * 2^(n-1), max_backoff)`；
/// 失败次数达到 `max_attempts` 时记录转为 `Failed`，不再自动认领。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct RetryPolicy {
    #[builder(default = 5)]
    max_attempts: u32,
    #[builder(default = Duration::from_secs(20))]
    initial_backoff: Duration,
    #[builder(default = Duration::from_secs(600))]
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::builder().build()
    }
}

impl RetryPolicy {
    /// 无退避：回退后立即可被下一轮认领
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    pub fn backoff_for(&self, attempts: u32) -> ChronoDuration {
        let exponent = attempts.saturating_sub(1).min(31);
        let backoff = self
            .initial_backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);
        ChronoDuration::from_std(backoff).unwrap_or(ChronoDuration::zero())
    }
}
