use super::super::{
    remote::{CompletedPart, UploadId},
    resumable_recorder::{AppendOnlyResumableRecorderMedium, ResumableRecorder},
    ObjectParams, Part, PartPlan, SourceKey, TransferResult,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io::{BufRead, BufReader},
    num::NonZeroUsize,
};

const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RecordHeader {
    version: u32,
    upload_id: UploadId,
    bucket: String,
    key: String,
    file_size: u64,
    part_size: u64,
    part_count: usize,
}

impl RecordHeader {
    fn new(upload_id: &UploadId, plan: &PartPlan, params: &ObjectParams) -> Self {
        Self {
            version: RECORD_VERSION,
            upload_id: upload_id.to_owned(),
            bucket: params.bucket().to_owned(),
            key: params.key().to_owned(),
            file_size: plan.file_size().get(),
            part_size: plan.part_size().get(),
            part_count: plan.len(),
        }
    }

    fn matches(&self, plan: &PartPlan, params: &ObjectParams) -> bool {
        self.version == RECORD_VERSION
            && self.bucket == params.bucket()
            && self.key == params.key()
            && self.file_size == plan.file_size().get()
            && self.part_size == plan.part_size().get()
            && self.part_count == plan.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PartRecord {
    part_number: NonZeroUsize,
    offset: u64,
    size: u64,
    etag: String,
}

impl PartRecord {
    fn new(part: &Part, etag: &str) -> Self {
        Self {
            part_number: part.part_number(),
            offset: part.offset(),
            size: part.size().get(),
            etag: etag.to_owned(),
        }
    }

    fn matches(&self, plan: &PartPlan) -> bool {
        plan.part(self.part_number).map_or(false, |part| {
            part.offset() == self.offset && part.size().get() == self.size && !self.etag.trim().is_empty()
        })
    }
}

/// 从断点记录中恢复的分片上传
#[derive(Debug)]
pub(super) struct ResumedUpload {
    pub(super) upload_id: UploadId,
    pub(super) parts: Vec<CompletedPart>,
}

/// 会话的断点记录
///
/// 记录的第一行是头部，包含远端上传 ID 和分片规划，之后每行记录一个已完成的分片。
/// 记录器的任何错误都不影响会话本身。
#[derive(Debug)]
pub(super) struct SessionRecorder<'r> {
    recorder: &'r dyn ResumableRecorder,
    source_key: SourceKey,
    medium: Option<Box<dyn AppendOnlyResumableRecorderMedium>>,
}

impl<'r> SessionRecorder<'r> {
    pub(super) fn new(recorder: &'r dyn ResumableRecorder, source_key: SourceKey) -> Self {
        Self {
            recorder,
            source_key,
            medium: None,
        }
    }

    /// 尝试从记录中恢复，成功后后续的分片记录追加到同一个记录中
    pub(super) fn load(&mut self, plan: &PartPlan, params: &ObjectParams) -> Option<ResumedUpload> {
        match self.try_load(plan, params) {
            Ok(Some(resumed)) => match self.recorder.open_for_append(&self.source_key) {
                Ok(medium) => {
                    info!(
                        "Resume multipart upload {} with {} recorded parts",
                        resumed.upload_id,
                        resumed.parts.len()
                    );
                    self.medium = Some(medium);
                    Some(resumed)
                }
                Err(err) => {
                    warn!("Failed to reopen resumable record {:?}: {}", self.source_key, err);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                debug!("No usable resumable record for {:?}: {}", self.source_key, err);
                None
            }
        }
    }

    fn try_load(&self, plan: &PartPlan, params: &ObjectParams) -> TransferResult<Option<ResumedUpload>> {
        let medium = self.recorder.open_for_read(&self.source_key)?;
        let mut lines = BufReader::new(medium).lines();
        let header: RecordHeader = match lines.next() {
            Some(line) => serde_json::from_str(&line?)?,
            None => return Ok(None),
        };
        if !header.matches(plan, params) {
            debug!("Resumable record {:?} does not match the current plan", self.source_key);
            return Ok(None);
        }
        let mut parts = BTreeMap::new();
        for line in lines {
            let line = line?;
            match serde_json::from_str::<PartRecord>(&line) {
                Ok(record) if record.matches(plan) => {
                    parts.insert(
                        record.part_number,
                        CompletedPart::new(record.part_number, record.etag),
                    );
                }
                Ok(record) => debug!("Skip part record {:?} outside of the plan", record),
                Err(err) => debug!("Skip malformed part record: {}", err),
            }
        }
        Ok(Some(ResumedUpload {
            upload_id: header.upload_id,
            parts: parts.into_values().collect(),
        }))
    }

    /// 创建新记录并写入头部
    pub(super) fn start_new(&mut self, upload_id: &UploadId, plan: &PartPlan, params: &ObjectParams) {
        self.medium = match self.recorder.open_for_create_new(&self.source_key) {
            Ok(medium) => Some(medium),
            Err(err) => {
                debug!("Resumable record {:?} is not available: {}", self.source_key, err);
                None
            }
        };
        let header = RecordHeader::new(upload_id, plan, params);
        self.append_line(&header);
    }

    /// 追加已完成分片的记录
    pub(super) fn persist_part(&mut self, part: &Part, etag: &str) {
        self.append_line(&PartRecord::new(part, etag));
    }

    /// 删除记录
    pub(super) fn discard(&mut self) {
        self.medium = None;
        if let Err(err) = self.recorder.delete(&self.source_key) {
            debug!("Failed to delete resumable record {:?}: {}", self.source_key, err);
        }
    }

    fn append_line<T: Serialize>(&mut self, value: &T) {
        if let Some(medium) = self.medium.as_mut() {
            if let Err(err) = write_line(&mut **medium, value) {
                warn!("Failed to write resumable record {:?}: {}", self.source_key, err);
                self.medium = None;
            }
        }
    }
}

fn write_line<T: Serialize>(medium: &mut dyn AppendOnlyResumableRecorderMedium, value: &T) -> TransferResult<()> {
    let mut buf = serde_json::to_vec(value)?;
    buf.extend_from_slice(b"\n");
    medium.write_all(&buf)?;
    medium.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        super::super::{FileSystemResumableRecorder, PartPlanner},
        *,
    };
    use anyhow::Result;
    use std::{fs::OpenOptions, io::Write as _};
    use tempfile::tempdir;

    const MIB: u64 = 1 << 20;

    #[test]
    fn test_session_recorder_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let recorder = FileSystemResumableRecorder::new(dir.path());
        let plan = PartPlanner::default().plan(12 * MIB, 5 * MIB)?;
        let params = ObjectParams::builder("bucket", "key").build();
        let source_key = SourceKey::new([7u8; 20]);
        let upload_id = UploadId::new("upload-1").unwrap();

        {
            let mut session_recorder = SessionRecorder::new(&recorder, source_key.to_owned());
            assert!(session_recorder.load(&plan, &params).is_none());
            session_recorder.start_new(&upload_id, &plan, &params);
            session_recorder.persist_part(&plan.parts()[2], "etag-3");
            session_recorder.persist_part(&plan.parts()[0], "etag-1");
        }
        {
            let mut medium = OpenOptions::new()
                .append(true)
                .open(recorder.record_path(&source_key))?;
            medium.write_all(b"{\"part_number\":2,\"offs")?;
        }

        let mut session_recorder = SessionRecorder::new(&recorder, source_key.to_owned());
        let resumed = session_recorder.load(&plan, &params).unwrap();
        assert_eq!(resumed.upload_id, upload_id);
        assert_eq!(
            resumed.parts,
            vec![
                CompletedPart::new(NonZeroUsize::new(1).unwrap(), "etag-1"),
                CompletedPart::new(NonZeroUsize::new(3).unwrap(), "etag-3"),
            ]
        );

        let other_plan = PartPlanner::default().plan(12 * MIB, 6 * MIB)?;
        assert!(SessionRecorder::new(&recorder, source_key.to_owned())
            .load(&other_plan, &params)
            .is_none());
        let other_params = ObjectParams::builder("bucket", "other").build();
        assert!(SessionRecorder::new(&recorder, source_key.to_owned())
            .load(&plan, &other_params)
            .is_none());

        session_recorder.discard();
        assert!(!recorder.record_path(&source_key).exists());
        Ok(())
    }
}
