use super::{
    super::{scheduler::CancellationFlag, TransferError, TransferErrorKind, TransferResult},
    PartialFile, PartialFileCarver,
};
use log::debug;
use std::{
    env::temp_dir,
    fs::{DirBuilder, File},
    io::{Read, Seek, SeekFrom, Write},
    num::NonZeroU64,
    path::{Path, PathBuf},
};
use tempfile::Builder as TempFileBuilder;

const COPY_CHUNK_SIZE: usize = 1 << 20;
const TEMP_FILE_PREFIX: &str = ".qiniu-part-";

/// 临时文件分片生成器
///
/// 将分片内容按块复制到指定目录下的临时文件中，每复制一块检查一次取消标记。
#[derive(Debug, Clone, Default)]
pub struct TempFileCarver {
    directory: Option<PathBuf>,
}

impl TempFileCarver {
    /// 创建临时文件分片生成器，临时文件存放在系统临时目录中
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// 创建临时文件分片生成器，临时文件存放在指定目录中
    #[inline]
    pub fn new_in(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
        }
    }

    fn directory(&self) -> PathBuf {
        self.directory.to_owned().unwrap_or_else(temp_dir)
    }
}

impl PartialFileCarver for TempFileCarver {
    fn carve(
        &self,
        source: &Path,
        offset: u64,
        length: NonZeroU64,
        cancel: &CancellationFlag,
    ) -> TransferResult<PartialFile> {
        let directory = self.directory();
        DirBuilder::new().recursive(true).create(&directory)?;
        let mut source_file = File::open(source)?;
        source_file.seek(SeekFrom::Start(offset))?;

        let (mut temp_file, temp_path) = TempFileBuilder::new()
            .prefix(TEMP_FILE_PREFIX)
            .tempfile_in(&directory)?
            .into_parts();
        let mut buf = vec![0u8; COPY_CHUNK_SIZE];
        let mut remaining = length.get();
        while remaining > 0 {
            if cancel.is_cancelled() {
                debug!("Carving {:?} at {} was cancelled", source, offset);
                return Err(TransferError::new_with_msg(
                    TransferErrorKind::UserCanceled,
                    "partial file carving was cancelled",
                ));
            }
            let chunk = usize::try_from(remaining).map_or(buf.len(), |remaining| remaining.min(buf.len()));
            source_file.read_exact(&mut buf[..chunk])?;
            temp_file.write_all(&buf[..chunk])?;
            remaining -= chunk as u64;
        }
        temp_file.sync_all()?;
        debug!(
            "Carved {} bytes at {} from {:?} into {:?}",
            length,
            offset,
            source,
            &*temp_path
        );
        Ok(PartialFile::new(temp_path, offset, length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use rand::{thread_rng, RngCore};
    use std::fs::{read, read_dir, write};
    use tempfile::tempdir;

    #[test]
    fn test_temp_file_carver() -> Result<()> {
        let dir = tempdir()?;
        let source_path = dir.path().join("source");
        let mut content = vec![0u8; 3 * COPY_CHUNK_SIZE + 17];
        thread_rng().fill_bytes(&mut content);
        write(&source_path, &content)?;

        let parts_dir = dir.path().join("parts");
        let carver = TempFileCarver::new_in(&parts_dir);
        let cancel = CancellationFlag::default();
        let offset = COPY_CHUNK_SIZE as u64 - 5;
        let length = NonZeroU64::new(2 * COPY_CHUNK_SIZE as u64 + 11).unwrap();
        let partial = carver.carve(&source_path, offset, length, &cancel)?;
        assert_eq!(partial.offset(), offset);
        assert_eq!(partial.size(), length);
        let carved = read(partial.path())?;
        assert_eq!(carved.as_slice(), &content[offset as usize..(offset + length.get()) as usize]);

        let partial_path = partial.path().to_owned();
        drop(partial);
        assert!(!partial_path.exists());
        assert_eq!(read_dir(&parts_dir)?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_temp_file_carver_errors() -> Result<()> {
        let dir = tempdir()?;
        let source_path = dir.path().join("source");
        write(&source_path, [1u8; 100])?;
        let carver = TempFileCarver::new_in(dir.path().join("parts"));

        let err = carver
            .carve(&source_path, 90, NonZeroU64::new(20).unwrap(), &CancellationFlag::default())
            .unwrap_err();
        assert_eq!(err.kind(), TransferErrorKind::FileSystemError);

        let err = carver
            .carve(
                &dir.path().join("missing"),
                0,
                NonZeroU64::new(20).unwrap(),
                &CancellationFlag::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), TransferErrorKind::FileSystemError);

        let cancel = CancellationFlag::default();
        cancel.cancel();
        let err = carver
            .carve(&source_path, 0, NonZeroU64::new(20).unwrap(), &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), TransferErrorKind::UserCanceled);
        assert_eq!(read_dir(dir.path().join("parts"))?.count(), 0);
        Ok(())
    }
}
