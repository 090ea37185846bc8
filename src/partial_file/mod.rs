use super::{scheduler::CancellationFlag, TransferResult};
use auto_impl::auto_impl;
use std::{
    fmt::Debug,
    fs::File,
    io::Result as IoResult,
    num::NonZeroU64,
    path::{Path, PathBuf},
};
use tempfile::TempPath;

/// 分片临时文件生成器接口
///
/// 将源文件的指定区间复制到一个临时文件中，网络层直接读取该临时文件上传。
/// 生成过程中应定期检查取消标记，被取消时返回 [`crate::TransferErrorKind::UserCanceled`]。
#[auto_impl(&, Box, Arc)]
pub trait PartialFileCarver: Debug + Sync + Send {
    /// 生成分片临时文件
    fn carve(
        &self,
        source: &Path,
        offset: u64,
        length: NonZeroU64,
        cancel: &CancellationFlag,
    ) -> TransferResult<PartialFile>;
}

/// 分片临时文件
///
/// 被释放时临时文件将被删除。
#[derive(Debug)]
pub struct PartialFile {
    path: TempPath,
    offset: u64,
    size: NonZeroU64,
}

impl PartialFile {
    /// 创建分片临时文件
    ///
    /// `path` 指向的文件将由返回值接管，释放时删除。
    #[inline]
    pub fn new(path: TempPath, offset: u64, size: NonZeroU64) -> Self {
        Self { path, offset, size }
    }

    /// 获取临时文件路径
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 获取分片在源文件中的偏移量
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> NonZeroU64 {
        self.size
    }

    /// 以只读方式打开临时文件
    #[inline]
    pub fn open(&self) -> IoResult<File> {
        File::open(self.path())
    }

    /// 保留临时文件，不再自动删除
    #[inline]
    pub fn keep(self) -> IoResult<PathBuf> {
        self.path.keep().map_err(|err| err.error)
    }
}

mod temp;
pub use temp::TempFileCarver;
