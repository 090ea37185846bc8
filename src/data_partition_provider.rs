use super::{part_planner::non_zero_u64, PartLimits, TransferError};
use auto_impl::auto_impl;
use std::{
    fmt::{self, Debug, Display},
    num::NonZeroU64,
    time::Duration,
};

/// 分片大小提供者接口
///
/// 创建会话时读取一次目标分片大小，分片规划器会在此基础上按文件大小和最大分片数调整。
#[auto_impl(&, Box, Arc)]
pub trait DataPartitionProvider: Debug + Sync + Send {
    /// 获取目标分片大小
    fn part_size(&self) -> PartSize;

    /// 接收会话结束后的反馈
    fn feedback(&self, feedback: DataPartitionProviderFeedback<'_>);
}

/// 分片大小
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartSize(NonZeroU64);

const DEFAULT_PART_SIZE: NonZeroU64 = non_zero_u64(8 << 20);

impl PartSize {
    /// 创建分片大小，传入 0 时返回 [`None`]
    #[inline]
    pub fn new(part_size: u64) -> Option<Self> {
        NonZeroU64::new(part_size).map(Self)
    }

    #[inline]
    pub fn as_non_zero_u64(&self) -> NonZeroU64 {
        self.0
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }

    fn clamp_within(self, limits: &PartLimits) -> Self {
        Self(self.0.clamp(limits.min_part_size(), limits.max_part_size()))
    }
}

impl Default for PartSize {
    #[inline]
    fn default() -> Self {
        Self(DEFAULT_PART_SIZE)
    }
}

impl From<NonZeroU64> for PartSize {
    #[inline]
    fn from(part_size: NonZeroU64) -> Self {
        Self(part_size)
    }
}

impl Display for PartSize {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// 分片大小提供者反馈
#[derive(Debug)]
pub struct DataPartitionProviderFeedback<'f> {
    part_size: NonZeroU64,
    elapsed: Duration,
    error: Option<&'f TransferError>,
}

impl<'f> DataPartitionProviderFeedback<'f> {
    pub(crate) fn new(part_size: NonZeroU64, elapsed: Duration, error: Option<&'f TransferError>) -> Self {
        Self {
            part_size,
            elapsed,
            error,
        }
    }

    /// 分片规划最终采用的分片大小，可能大于提供者给出的目标值
    #[inline]
    pub fn part_size(&self) -> NonZeroU64 {
        self.part_size
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[inline]
    pub fn error(&self) -> Option<&'f TransferError> {
        self.error
    }
}

/// 固定分片大小提供者
///
/// 默认为 8 MiB。
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDataPartitionProvider(PartSize);

impl FixedDataPartitionProvider {
    /// 创建固定分片大小提供者，传入 0 时返回 [`None`]
    #[inline]
    pub fn new(part_size: u64) -> Option<Self> {
        PartSize::new(part_size).map(Self)
    }
}

impl DataPartitionProvider for FixedDataPartitionProvider {
    #[inline]
    fn part_size(&self) -> PartSize {
        self.0
    }

    #[inline]
    fn feedback(&self, _feedback: DataPartitionProviderFeedback<'_>) {}
}

/// 受远端分片约束限制的分片大小提供者
///
/// 内部提供者给出的目标分片大小超出 [`PartLimits`] 的分片大小区间时，取区间边界值，
/// 保证分片规划不会因目标值不合法而失败。反馈原样转交给内部提供者。
#[derive(Debug, Clone, Copy)]
pub struct LimitedDataPartitionProvider<P> {
    inner: P,
    limits: PartLimits,
}

impl<P: DataPartitionProvider> LimitedDataPartitionProvider<P> {
    #[inline]
    pub fn new_with_limits(inner: P, limits: &PartLimits) -> Self {
        Self {
            inner,
            limits: *limits,
        }
    }

    #[inline]
    pub fn limits(&self) -> &PartLimits {
        &self.limits
    }
}

impl<P: DataPartitionProvider> DataPartitionProvider for LimitedDataPartitionProvider<P> {
    #[inline]
    fn part_size(&self) -> PartSize {
        self.inner.part_size().clamp_within(&self.limits)
    }

    #[inline]
    fn feedback(&self, feedback: DataPartitionProviderFeedback<'_>) {
        self.inner.feedback(feedback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingProvider(Mutex<Vec<u64>>);

    impl DataPartitionProvider for RecordingProvider {
        fn part_size(&self) -> PartSize {
            PartSize::new(1 << 10).unwrap()
        }

        fn feedback(&self, feedback: DataPartitionProviderFeedback<'_>) {
            self.0.lock().unwrap().push(feedback.part_size().get());
        }
    }

    #[test]
    fn test_limited_provider_clamps_target() {
        let limits = PartLimits::new(1 << 20, 1 << 30, 10_000).unwrap();
        let clamp = |part_size: u64| {
            LimitedDataPartitionProvider::new_with_limits(FixedDataPartitionProvider::new(part_size).unwrap(), &limits)
                .part_size()
                .as_u64()
        };
        assert_eq!(clamp(1 << 10), 1 << 20);
        assert_eq!(clamp(1 << 24), 1 << 24);
        assert_eq!(clamp(1 << 40), 1 << 30);
        assert_eq!(FixedDataPartitionProvider::default().part_size().as_u64(), 8 << 20);
        assert!(FixedDataPartitionProvider::new(0).is_none());
    }

    #[test]
    fn test_limited_provider_forwards_feedback() {
        let limits = PartLimits::new(1 << 20, 1 << 30, 10_000).unwrap();
        let inner = RecordingProvider::default();
        let provider = LimitedDataPartitionProvider::new_with_limits(&inner, &limits);
        assert_eq!(provider.part_size().to_string(), (1u64 << 20).to_string());
        provider.feedback(DataPartitionProviderFeedback::new(
            NonZeroU64::new(3 << 20).unwrap(),
            Duration::from_millis(5),
            None,
        ));
        assert_eq!(*inner.0.lock().unwrap(), vec![3 << 20]);
    }
}
