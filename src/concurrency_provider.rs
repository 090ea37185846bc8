use super::TransferError;
use auto_impl::auto_impl;
use std::{
    fmt::{self, Debug, Display},
    num::{NonZeroU64, NonZeroUsize},
    time::Duration,
};

/// 并发数提供者接口
///
/// 会话开始时读取一次，得到的并发数 K 即该会话同时处于上传中的分片数上限。
/// 会话结束后，如果本次确实上传了数据，会收到一次反馈。
#[auto_impl(&, Box, Arc)]
pub trait ConcurrencyProvider: Debug + Sync + Send {
    /// 获取分片上传并发数
    fn concurrency(&self) -> Concurrency;

    /// 接收会话结束后的反馈
    fn feedback(&self, feedback: ConcurrencyProviderFeedback<'_>);
}

/// 分片上传并发数
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Concurrency(NonZeroUsize);

impl Concurrency {
    /// 创建并发数，传入 0 时返回 [`None`]
    #[inline]
    pub fn new(concurrency: usize) -> Option<Self> {
        NonZeroUsize::new(concurrency).map(Self)
    }

    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0.get()
    }

    #[inline]
    pub fn as_non_zero_usize(&self) -> NonZeroUsize {
        self.0
    }

    /// 按分片数收紧并发数
    ///
    /// 启动比分片数更多的工作线程没有意义，因此实际并发数为两者中较小的一个，且至少为 1。
    pub fn limit_to_parts(self, part_count: usize) -> Self {
        NonZeroUsize::new(part_count).map_or(Self(NonZeroUsize::MIN), |parts| Self(self.0.min(parts)))
    }
}

impl Default for Concurrency {
    #[inline]
    fn default() -> Self {
        Self(NonZeroUsize::MIN)
    }
}

impl From<NonZeroUsize> for Concurrency {
    #[inline]
    fn from(concurrency: NonZeroUsize) -> Self {
        Self(concurrency)
    }
}

impl Display for Concurrency {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// 并发数提供者反馈
///
/// 只描述本次会话实际上传的数据，从断点记录恢复的分片不计入。
#[derive(Debug)]
pub struct ConcurrencyProviderFeedback<'f> {
    concurrency: Concurrency,
    uploaded_size: NonZeroU64,
    elapsed: Duration,
    error: Option<&'f TransferError>,
}

impl<'f> ConcurrencyProviderFeedback<'f> {
    pub(crate) fn new(
        concurrency: Concurrency,
        uploaded_size: NonZeroU64,
        elapsed: Duration,
        error: Option<&'f TransferError>,
    ) -> Self {
        Self {
            concurrency,
            uploaded_size,
            elapsed,
            error,
        }
    }

    /// 会话实际使用的并发数
    #[inline]
    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// 本次会话上传的字节数
    #[inline]
    pub fn uploaded_size(&self) -> NonZeroU64 {
        self.uploaded_size
    }

    /// 从开始到结束的耗时
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// 会话失败的原因，成功时为 [`None`]
    #[inline]
    pub fn error(&self) -> Option<&'f TransferError> {
        self.error
    }

    /// 按耗时估算的吞吐量，单位为字节每秒
    pub fn throughput(&self) -> Option<u64> {
        let millis = self.elapsed.as_millis();
        if millis == 0 {
            return None;
        }
        u64::try_from(u128::from(self.uploaded_size.get()) * 1000 / millis).ok()
    }
}

/// 固定并发数提供者
///
/// 总是返回同一个并发数，忽略所有反馈。
#[derive(Debug, Clone, Copy)]
pub struct FixedConcurrencyProvider(Concurrency);

impl FixedConcurrencyProvider {
    /// 创建固定并发数提供者，传入 0 时返回 [`None`]
    #[inline]
    pub fn new(concurrency: usize) -> Option<Self> {
        Concurrency::new(concurrency).map(Self)
    }

    #[inline]
    pub fn new_with_non_zero_concurrency(concurrency: NonZeroUsize) -> Self {
        Self(concurrency.into())
    }
}

impl ConcurrencyProvider for FixedConcurrencyProvider {
    #[inline]
    fn concurrency(&self) -> Concurrency {
        self.0
    }

    #[inline]
    fn feedback(&self, _feedback: ConcurrencyProviderFeedback<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_limited_by_part_count() {
        let concurrency = Concurrency::new(4).unwrap();
        assert_eq!(concurrency.limit_to_parts(10).as_usize(), 4);
        assert_eq!(concurrency.limit_to_parts(3).as_usize(), 3);
        assert_eq!(concurrency.limit_to_parts(0).as_usize(), 1);
        assert!(Concurrency::new(0).is_none());
        assert!(FixedConcurrencyProvider::new(0).is_none());
        assert_eq!(FixedConcurrencyProvider::new(8).unwrap().concurrency().to_string(), "8");
    }

    #[test]
    fn test_feedback_throughput() {
        let feedback = ConcurrencyProviderFeedback::new(
            Concurrency::default(),
            NonZeroU64::new(4 << 20).unwrap(),
            Duration::from_secs(2),
            None,
        );
        assert_eq!(feedback.throughput(), Some(2 << 20));

        let feedback = ConcurrencyProviderFeedback::new(
            Concurrency::default(),
            NonZeroU64::new(1).unwrap(),
            Duration::ZERO,
            None,
        );
        assert_eq!(feedback.throughput(), None);
    }
}
