use super::{
    super::{
        remote::{CompletedPart, UploadId},
        Part, TransferError,
    },
    RemoteUploadState, SessionOutcome,
};
use anyhow::Result as AnyResult;
use std::fmt::{self, Debug};

/// 传输事件
///
/// 所有事件都在会话自己的线程上按发生顺序通知。
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum TransferEvent<'a> {
    /// 远端分片上传已经创建或从断点记录中恢复
    Created {
        upload_id: &'a UploadId,
        resumed_parts: usize,
    },

    /// 分片开始上传
    PartStarted { part: &'a Part },

    /// 分片上传进度
    PartProgress {
        part: &'a Part,
        uploaded: u64,
        session_uploaded: u64,
        total_size: u64,
    },

    /// 分片上传完成
    PartCompleted { part: &'a Part, etag: &'a str },

    /// 上传成功
    Completed {
        upload_id: &'a UploadId,
        parts: &'a [CompletedPart],
    },

    /// 会话被取消
    Aborted {
        upload_id: &'a UploadId,
        abort_error: Option<&'a TransferError>,
    },

    /// 上传失败
    Failed {
        error: &'a TransferError,
        remote: &'a RemoteUploadState,
    },
}

impl<'a> TransferEvent<'a> {
    /// 是否是终止事件
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Aborted { .. } | Self::Failed { .. })
    }

    pub(super) fn from_outcome(outcome: &'a SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Completed { upload_id, parts } => Self::Completed {
                upload_id,
                parts: parts.as_slice(),
            },
            SessionOutcome::Aborted { upload_id, abort_error } => Self::Aborted {
                upload_id,
                abort_error: abort_error.as_ref(),
            },
            SessionOutcome::Failed { error, remote, .. } => Self::Failed { error, remote },
        }
    }
}

type EventCallback = Box<dyn Fn(&TransferEvent<'_>) -> AnyResult<()> + Send + Sync>;

#[derive(Default)]
pub(super) struct Callbacks {
    event_callbacks: Vec<EventCallback>,
}

impl Callbacks {
    pub(super) fn insert_event_callback(
        &mut self,
        callback: impl Fn(&TransferEvent<'_>) -> AnyResult<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.event_callbacks.push(Box::new(callback));
        self
    }

    pub(super) fn event(&self, event: &TransferEvent<'_>) -> AnyResult<()> {
        for callback in self.event_callbacks.iter() {
            callback(event)?;
        }
        Ok(())
    }
}

impl Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("event_callbacks", &self.event_callbacks.len())
            .finish()
    }
}
