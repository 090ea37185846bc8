use super::ObjectParams;
use digest::{Digest, Output};
use os_str_bytes::OsStrBytes;
use sha1::Sha1;
use std::{
    fmt::{self, Debug},
    num::NonZeroU64,
    ops::Deref,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

/// 数据源 KEY
///
/// 由源文件路径、大小、修改时间，目标存储空间和对象名称，以及分片大小计算得出，
/// 用于查找断点恢复记录。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SourceKey(Output<Sha1>);

impl SourceKey {
    /// 创建数据源 KEY
    #[inline]
    pub fn new(array: impl Into<Output<Sha1>>) -> Self {
        Self(array.into())
    }

    pub(crate) fn from_source(
        path: &Path,
        file_size: u64,
        modified: Option<SystemTime>,
        params: &ObjectParams,
        part_size: NonZeroU64,
    ) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(b"file://");
        hasher.update(path.as_os_str().to_raw_bytes());
        hasher.update(b"\0");
        hasher.update(file_size.to_be_bytes());
        if let Some(modified) = modified.and_then(|modified| modified.duration_since(UNIX_EPOCH).ok()) {
            hasher.update(modified.as_nanos().to_be_bytes());
        }
        hasher.update(b"\0");
        hasher.update(params.bucket().as_bytes());
        hasher.update(b"\0");
        hasher.update(params.key().as_bytes());
        hasher.update(b"\0");
        hasher.update(part_size.get().to_be_bytes());
        Self(hasher.finalize())
    }

    /// 以十六进制字符串表示
    #[inline]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_slice())
    }
}

impl Deref for SourceKey {
    type Target = Output<Sha1>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Debug for SourceKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SourceKey").field(&self.to_hex()).finish()
    }
}
