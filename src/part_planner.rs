use super::{TransferError, TransferErrorKind, TransferResult};
use std::{
    convert::TryFrom,
    num::{NonZeroU64, NonZeroUsize},
    ops::Range,
    slice::Iter,
};

pub(crate) const fn non_zero_u64(value: u64) -> NonZeroU64 {
    match NonZeroU64::new(value) {
        Some(value) => value,
        None => panic!("value must be greater than zero"),
    }
}

pub(crate) const fn non_zero_usize(value: usize) -> NonZeroUsize {
    match NonZeroUsize::new(value) {
        Some(value) => value,
        None => panic!("value must be greater than zero"),
    }
}

const DEFAULT_MIN_PART_SIZE: NonZeroU64 = non_zero_u64(5 << 20);
const DEFAULT_MAX_PART_SIZE: NonZeroU64 = non_zero_u64(5 << 30);
const DEFAULT_MAX_PARTS: NonZeroUsize = non_zero_usize(10_000);

/// 远端服务的分片约束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLimits {
    min_part_size: NonZeroU64,
    max_part_size: NonZeroU64,
    max_parts: NonZeroUsize,
}

impl PartLimits {
    /// 创建分片约束
    ///
    /// 任何一项为 0，或最小分片大小大于最大分片大小时返回 [`None`]。
    #[inline]
    pub fn new(min_part_size: u64, max_part_size: u64, max_parts: usize) -> Option<Self> {
        match (
            NonZeroU64::new(min_part_size),
            NonZeroU64::new(max_part_size),
            NonZeroUsize::new(max_parts),
        ) {
            (Some(min_part_size), Some(max_part_size), Some(max_parts)) if min_part_size <= max_part_size => {
                Some(Self {
                    min_part_size,
                    max_part_size,
                    max_parts,
                })
            }
            _ => None,
        }
    }

    #[inline]
    pub fn min_part_size(&self) -> NonZeroU64 {
        self.min_part_size
    }

    #[inline]
    pub fn max_part_size(&self) -> NonZeroU64 {
        self.max_part_size
    }

    #[inline]
    pub fn max_parts(&self) -> NonZeroUsize {
        self.max_parts
    }
}

impl Default for PartLimits {
    /// 5 MiB 最小分片，5 GiB 最大分片，最多 10000 个分片
    #[inline]
    fn default() -> Self {
        Self {
            min_part_size: DEFAULT_MIN_PART_SIZE,
            max_part_size: DEFAULT_MAX_PART_SIZE,
            max_parts: DEFAULT_MAX_PARTS,
        }
    }
}

/// 分片
///
/// 源文件的一段连续字节区间，分片号从 1 开始。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Part {
    part_number: NonZeroUsize,
    offset: u64,
    size: NonZeroU64,
}

impl Part {
    #[inline]
    pub fn part_number(&self) -> NonZeroUsize {
        self.part_number
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> NonZeroU64 {
        self.size
    }

    /// 分片对应的字节区间
    #[inline]
    pub fn range(&self) -> Range<u64> {
        self.offset..self.offset + self.size.get()
    }
}

/// 分片规划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    file_size: NonZeroU64,
    part_size: NonZeroU64,
    parts: Vec<Part>,
}

impl PartPlan {
    #[inline]
    pub fn file_size(&self) -> NonZeroU64 {
        self.file_size
    }

    /// 实际使用的分片大小，最后一个分片可能小于该值
    #[inline]
    pub fn part_size(&self) -> NonZeroU64 {
        self.part_size
    }

    #[inline]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// 根据分片号获取分片
    #[inline]
    pub fn part(&self, part_number: NonZeroUsize) -> Option<&Part> {
        self.parts.get(part_number.get() - 1)
    }

    #[inline]
    pub fn iter(&self) -> Iter<'_, Part> {
        self.parts.iter()
    }
}

impl<'a> IntoIterator for &'a PartPlan {
    type Item = &'a Part;
    type IntoIter = Iter<'a, Part>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// 分片规划器
///
/// 根据文件大小和目标分片大小计算分片序列，计算过程无副作用，相同输入总是得到相同输出。
#[derive(Debug, Clone, Copy, Default)]
pub struct PartPlanner {
    limits: PartLimits,
}

impl PartPlanner {
    #[inline]
    pub fn new(limits: PartLimits) -> Self {
        Self { limits }
    }

    #[inline]
    pub fn limits(&self) -> &PartLimits {
        &self.limits
    }

    /// 计算分片规划
    ///
    /// 文件大小为 0、目标分片大小小于最小分片大小或大于最大分片大小时返回 [`TransferErrorKind::PlanningError`]。
    /// 如果分片数超过上限，分片大小将被增大到满足上限的最小值；即使使用最大分片大小也无法满足上限时返回错误。
    pub fn plan(&self, file_size: u64, target_part_size: u64) -> TransferResult<PartPlan> {
        let file_size =
            NonZeroU64::new(file_size).ok_or_else(|| planning_error("file size must be greater than zero"))?;
        if target_part_size < self.limits.min_part_size.get() {
            return Err(planning_error(format!(
                "target part size {} is less than the minimum part size {}",
                target_part_size, self.limits.min_part_size
            )));
        }
        if target_part_size > self.limits.max_part_size.get() {
            return Err(planning_error(format!(
                "target part size {} is greater than the maximum part size {}",
                target_part_size, self.limits.max_part_size
            )));
        }

        let max_parts = u64::try_from(self.limits.max_parts.get())
            .map_err(|err| TransferError::new(TransferErrorKind::PlanningError, err))?;
        let mut part_size = target_part_size;
        if div_ceil(file_size.get(), part_size) > max_parts {
            part_size = div_ceil(file_size.get(), max_parts);
            if part_size > self.limits.max_part_size.get() {
                return Err(planning_error(format!(
                    "file of {} bytes cannot be split into at most {} parts of at most {} bytes",
                    file_size, max_parts, self.limits.max_part_size
                )));
            }
        }
        let part_size =
            NonZeroU64::new(part_size).ok_or_else(|| planning_error("part size must be greater than zero"))?;

        let part_count = div_ceil(file_size.get(), part_size.get());
        let mut parts = Vec::with_capacity(usize::try_from(part_count).unwrap_or_default());
        let mut offset = 0u64;
        while offset < file_size.get() {
            let size = part_size.get().min(file_size.get() - offset);
            let size = NonZeroU64::new(size).ok_or_else(|| planning_error("empty part range"))?;
            let part_number =
                NonZeroUsize::new(parts.len() + 1).ok_or_else(|| planning_error("part number overflow"))?;
            parts.push(Part {
                part_number,
                offset,
                size,
            });
            offset += size.get();
        }

        Ok(PartPlan {
            file_size,
            part_size,
            parts,
        })
    }
}

fn div_ceil(dividend: u64, divisor: u64) -> u64 {
    dividend / divisor + u64::from(dividend % divisor != 0)
}

fn planning_error(msg: impl Into<String>) -> TransferError {
    TransferError::new_with_msg(TransferErrorKind::PlanningError, msg.into())
}
