use super::{
    super::{
        remote::{CompletedPart, UploadId},
        TransferError, TransferErrorKind, TransferResult,
    },
    SessionState,
};

/// 远端分片上传的最终状态
///
/// 用于区分“远端什么都没有创建”和“远端存在未被清理的分片上传”。
#[derive(Debug)]
pub enum RemoteUploadState {
    /// 远端分片上传从未创建
    NotCreated,

    /// 远端分片上传已经成功取消
    Aborted { upload_id: UploadId },

    /// 取消远端分片上传失败，远端可能残留未完成的分片上传，需要人工清理
    Orphaned {
        upload_id: UploadId,
        abort_error: TransferError,
    },
}

impl RemoteUploadState {
    #[inline]
    pub fn upload_id(&self) -> Option<&UploadId> {
        match self {
            Self::NotCreated => None,
            Self::Aborted { upload_id } | Self::Orphaned { upload_id, .. } => Some(upload_id),
        }
    }

    /// 远端是否可能残留未清理的分片上传
    #[inline]
    pub fn is_orphaned(&self) -> bool {
        matches!(self, Self::Orphaned { .. })
    }
}

/// 会话的终止结果
#[derive(Debug)]
pub enum SessionOutcome {
    /// 上传成功
    Completed {
        upload_id: UploadId,
        parts: Vec<CompletedPart>,
    },

    /// 会话被取消
    Aborted {
        upload_id: UploadId,
        abort_error: Option<TransferError>,
    },

    /// 上传失败
    ///
    /// `sunk_parts` 为失败前已经被远端确认的分片，它们不会被重试或撤销。
    Failed {
        error: TransferError,
        remote: RemoteUploadState,
        sunk_parts: Vec<CompletedPart>,
    },
}

impl SessionOutcome {
    /// 获取对应的终止状态
    #[inline]
    pub fn state(&self) -> SessionState {
        match self {
            Self::Completed { .. } => SessionState::Completed,
            Self::Aborted { .. } => SessionState::Aborted,
            Self::Failed { .. } => SessionState::Failed,
        }
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// 获取远端分片上传 ID，从未创建时返回 [`None`]
    #[inline]
    pub fn upload_id(&self) -> Option<&UploadId> {
        match self {
            Self::Completed { upload_id, .. } | Self::Aborted { upload_id, .. } => Some(upload_id),
            Self::Failed { remote, .. } => remote.upload_id(),
        }
    }

    /// 获取导致会话失败的错误
    #[inline]
    pub fn error(&self) -> Option<&TransferError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// 转换为结果，成功时返回按分片号排序的已完成分片
    pub fn into_result(self) -> TransferResult<Vec<CompletedPart>> {
        match self {
            Self::Completed { parts, .. } => Ok(parts),
            Self::Aborted { upload_id, .. } => Err(TransferError::new_with_msg(
                TransferErrorKind::UserCanceled,
                format!("multipart upload {} was aborted", upload_id),
            )),
            Self::Failed { error, .. } => Err(error),
        }
    }
}
