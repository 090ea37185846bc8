use anyhow::Error as AnyError;
use serde_json::Error as JsonError;
use std::{
    error::Error as StdError,
    fmt::{self, Debug, Display},
    io::Error as IoError,
};

/// 传输错误类型
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 分片规划失败，文件大小或分片约束非法
    PlanningError,

    /// 本地文件系统错误，例如源文件不可读或磁盘空间不足
    FileSystemError,

    /// 无法获得可用的预签名 URL
    SigningError,

    /// 网络传输失败
    NetworkError,

    /// 远端响应格式错误或不符合预期
    RemoteProtocolError,

    /// 在非法的状态下执行操作
    StateError,

    /// 系统调用失败
    SystemCallError,

    /// 用户取消
    UserCanceled,
}

/// 传输错误
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    error: AnyError,
    retryable: bool,
}

impl Error {
    /// 创建传输错误
    #[inline]
    pub fn new(kind: ErrorKind, err: impl Into<AnyError>) -> Self {
        Self {
            kind,
            error: err.into(),
            retryable: false,
        }
    }

    /// 创建传输错误
    #[inline]
    pub fn new_with_msg(kind: ErrorKind, msg: impl Display + Debug + Send + Sync + 'static) -> Self {
        Self {
            kind,
            error: AnyError::msg(msg),
            retryable: false,
        }
    }

    /// 设置该错误是否可以重试
    ///
    /// 仅对 [`ErrorKind::NetworkError`] 生效，由远端服务适配器负责设置。
    #[inline]
    #[must_use]
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// 获取传输错误类型
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 是否可以重试
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.retryable && self.kind == ErrorKind::NetworkError
    }

    #[inline]
    pub fn into_inner(self) -> AnyError {
        self.error
    }
}

impl Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.error)
    }
}

impl StdError for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.error)
    }
}

impl From<IoError> for Error {
    #[inline]
    fn from(err: IoError) -> Self {
        Self::new(ErrorKind::FileSystemError, err)
    }
}

impl From<JsonError> for Error {
    #[inline]
    fn from(err: JsonError) -> Self {
        Self::new(ErrorKind::RemoteProtocolError, err)
    }
}

/// 传输结果
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind as IoErrorKind;

    #[test]
    fn test_retryable_only_applies_to_network_errors() {
        let err = Error::new_with_msg(ErrorKind::NetworkError, "connection reset").retryable(true);
        assert!(err.is_retryable());

        let err = Error::new_with_msg(ErrorKind::SigningError, "expired credential").retryable(true);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_io_errors_are_file_system_errors() {
        let err = Error::from(IoError::new(IoErrorKind::NotFound, "no such file"));
        assert_eq!(err.kind(), ErrorKind::FileSystemError);
        assert!(err.to_string().contains("no such file"));
        assert!(err.source().is_some());
    }
}
