use super::TransferError;
use std::time::Duration;

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// 指数退避
///
/// 第 N 次重试前等待 `base_delay * 2^N`，不超过 `max_delay`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoff {
    #[inline]
    pub const fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self { base_delay, max_delay }
    }

    #[inline]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[inline]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// 计算第 `retried` 次重试前的等待时长
    pub fn delay(&self, retried: usize) -> Duration {
        let factor = u32::try_from(retried)
            .ok()
            .and_then(|retried| 2u32.checked_pow(retried))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for ExponentialBackoff {
    #[inline]
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

/// 受限的分片重试器
///
/// 仅对可重试的网络错误进行重试，每个分片最多重试 `retries` 次。
/// 默认不重试，是否重试以及重试多少次由调用方决定。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimitedRetrier {
    retries: usize,
    backoff: ExponentialBackoff,
}

impl LimitedRetrier {
    #[inline]
    pub fn new(retries: usize, backoff: ExponentialBackoff) -> Self {
        Self { retries, backoff }
    }

    /// 创建不重试的重试器
    #[inline]
    pub fn never() -> Self {
        Default::default()
    }

    #[inline]
    pub fn retries(&self) -> usize {
        self.retries
    }

    #[inline]
    pub fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }

    /// 判断在已经重试 `retried` 次之后是否还应该重试
    #[inline]
    pub fn should_retry(&self, error: &TransferError, retried: usize) -> bool {
        error.is_retryable() && retried < self.retries
    }

    #[inline]
    pub fn delay(&self, retried: usize) -> Duration {
        self.backoff.delay(retried)
    }
}
