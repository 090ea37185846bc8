use super::SourceKey;
use auto_impl::auto_impl;
use std::{
    env::temp_dir,
    fmt::Debug,
    fs::{remove_file, DirBuilder, File, OpenOptions},
    io::{sink, Error as IoError, ErrorKind as IoErrorKind, Read, Result as IoResult, Write},
    path::{Path, PathBuf},
};

/// 断点恢复记录器
///
/// 以数据源 KEY 为索引保存一份按行追加的记录：首行是远端上传 ID 和分片规划，
/// 之后每行是一个已完成分片的 ETag。记录器只负责存取字节，记录格式由会话决定。
#[auto_impl(&, Box, Arc)]
pub trait ResumableRecorder: Debug + Sync + Send {
    /// 打开已有记录用于读取，记录不存在时返回 [`IoErrorKind::NotFound`]
    fn open_for_read(&self, source_key: &SourceKey) -> IoResult<Box<dyn ReadOnlyResumableRecorderMedium>>;

    /// 打开已有记录用于追加
    fn open_for_append(&self, source_key: &SourceKey) -> IoResult<Box<dyn AppendOnlyResumableRecorderMedium>>;

    /// 创建记录，已有记录会被清空
    fn open_for_create_new(&self, source_key: &SourceKey) -> IoResult<Box<dyn AppendOnlyResumableRecorderMedium>>;

    /// 删除记录，记录不存在不视为错误
    fn delete(&self, source_key: &SourceKey) -> IoResult<()>;
}

/// 只读记录介质
pub trait ReadOnlyResumableRecorderMedium: Read + Debug + Sync + Send {}
impl<T: Read + Debug + Sync + Send> ReadOnlyResumableRecorderMedium for T {}

/// 追加记录介质
pub trait AppendOnlyResumableRecorderMedium: Write + Debug + Sync + Send {}
impl<T: Write + Debug + Sync + Send> AppendOnlyResumableRecorderMedium for T {}

/// 不保存任何记录的记录器
///
/// 读取时总是找不到记录，写入的内容直接丢弃，因此会话既不会恢复也不会留下记录。
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyResumableRecorder;

impl DummyResumableRecorder {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl ResumableRecorder for DummyResumableRecorder {
    fn open_for_read(&self, _source_key: &SourceKey) -> IoResult<Box<dyn ReadOnlyResumableRecorderMedium>> {
        Err(IoError::new(IoErrorKind::NotFound, "resumable record is disabled"))
    }

    fn open_for_append(&self, _source_key: &SourceKey) -> IoResult<Box<dyn AppendOnlyResumableRecorderMedium>> {
        Ok(Box::new(sink()))
    }

    fn open_for_create_new(&self, _source_key: &SourceKey) -> IoResult<Box<dyn AppendOnlyResumableRecorderMedium>> {
        Ok(Box::new(sink()))
    }

    fn delete(&self, _source_key: &SourceKey) -> IoResult<()> {
        Ok(())
    }
}

const RECORD_DIRECTORY_NAME: &str = ".qiniu-multipart-transfer";
const RECORD_EXTENSION: &str = "ndjson";

/// 基于文件系统的断点恢复记录器
///
/// 每个数据源的记录保存为目录下的一个文件，文件名为数据源 KEY 的十六进制表示。
/// 目录在第一次写入时创建。
#[derive(Debug, Clone)]
pub struct FileSystemResumableRecorder {
    directory: PathBuf,
}

impl Default for FileSystemResumableRecorder {
    #[inline]
    fn default() -> Self {
        Self::new(temp_dir().join(RECORD_DIRECTORY_NAME))
    }
}

impl FileSystemResumableRecorder {
    /// 创建记录器，所有记录保存在 `directory` 下
    #[inline]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    #[inline]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// 数据源 KEY 对应的记录文件路径
    pub fn record_path(&self, source_key: &SourceKey) -> PathBuf {
        self.directory
            .join(source_key.to_hex())
            .with_extension(RECORD_EXTENSION)
    }

    fn open_writable(&self, source_key: &SourceKey, truncate: bool) -> IoResult<File> {
        DirBuilder::new().recursive(true).create(&self.directory)?;
        let mut options = OpenOptions::new();
        if truncate {
            options.write(true).create(true).truncate(true);
        } else {
            options.append(true);
        }
        options.open(self.record_path(source_key))
    }
}

impl ResumableRecorder for FileSystemResumableRecorder {
    fn open_for_read(&self, source_key: &SourceKey) -> IoResult<Box<dyn ReadOnlyResumableRecorderMedium>> {
        Ok(Box::new(File::open(self.record_path(source_key))?))
    }

    fn open_for_append(&self, source_key: &SourceKey) -> IoResult<Box<dyn AppendOnlyResumableRecorderMedium>> {
        Ok(Box::new(self.open_writable(source_key, false)?))
    }

    fn open_for_create_new(&self, source_key: &SourceKey) -> IoResult<Box<dyn AppendOnlyResumableRecorderMedium>> {
        Ok(Box::new(self.open_writable(source_key, true)?))
    }

    fn delete(&self, source_key: &SourceKey) -> IoResult<()> {
        match remove_file(self.record_path(source_key)) {
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
            result => result,
        }
    }
}
