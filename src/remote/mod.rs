use super::{ObjectParams, PartialFile, TransferResult};
use auto_impl::auto_impl;
use http::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Debug, Display},
    num::NonZeroUsize,
};
use url::Url;

/// 远端分片上传 ID
///
/// 由远端服务在创建分片上传时分配，后续所有分片上传、完成、取消请求都需要携带。
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl UploadId {
    /// 创建远端分片上传 ID，空白 ID 将返回 [`None`]
    #[inline]
    pub fn new(upload_id: impl Into<String>) -> Option<Self> {
        let upload_id = upload_id.into();
        if upload_id.trim().is_empty() {
            None
        } else {
            Some(Self(upload_id))
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UploadId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for UploadId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl AsRef<str> for UploadId {
    #[inline]
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// 已完成的分片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    part_number: NonZeroUsize,
    etag: String,
}

impl CompletedPart {
    #[inline]
    pub fn new(part_number: NonZeroUsize, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }

    #[inline]
    pub fn part_number(&self) -> NonZeroUsize {
        self.part_number
    }

    #[inline]
    pub fn etag(&self) -> &str {
        &self.etag
    }
}

/// 创建分片上传请求
#[derive(Debug, Clone, Copy)]
pub struct CreateUploadRequest<'r> {
    params: &'r ObjectParams,
}

impl<'r> CreateUploadRequest<'r> {
    #[inline]
    pub(crate) fn new(params: &'r ObjectParams) -> Self {
        Self { params }
    }

    /// 获取对象上传参数，其中的 HTTP 头已经过滤掉服务端保留的 HTTP 头
    #[inline]
    pub fn params(&self) -> &'r ObjectParams {
        self.params
    }

    /// 创建请求应当携带的 HTTP 头，包括 `Content-Type` 和自定义元信息
    #[inline]
    pub fn headers(&self) -> HeaderMap {
        self.params.create_request_headers()
    }
}

/// 创建分片上传的响应
///
/// 远端服务适配器将各种响应格式统一转换为该结构体。
#[derive(Debug, Clone, Default)]
pub struct CreatedUpload {
    upload_id: String,
}

impl CreatedUpload {
    #[inline]
    pub fn new(upload_id: impl Into<String>) -> Self {
        Self {
            upload_id: upload_id.into(),
        }
    }

    /// 获取响应中的上传 ID，可能为空
    #[inline]
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    #[inline]
    pub(crate) fn into_upload_id(self) -> Option<UploadId> {
        UploadId::new(self.upload_id)
    }
}

/// 上传分片请求
#[derive(Debug, Clone, Copy)]
pub struct UploadPartRequest<'r> {
    params: &'r ObjectParams,
    upload_id: &'r UploadId,
    part_number: NonZeroUsize,
    url: &'r Url,
    file: &'r PartialFile,
}

impl<'r> UploadPartRequest<'r> {
    #[inline]
    pub(crate) fn new(
        params: &'r ObjectParams,
        upload_id: &'r UploadId,
        part_number: NonZeroUsize,
        url: &'r Url,
        file: &'r PartialFile,
    ) -> Self {
        Self {
            params,
            upload_id,
            part_number,
            url,
            file,
        }
    }

    #[inline]
    pub fn params(&self) -> &'r ObjectParams {
        self.params
    }

    #[inline]
    pub fn upload_id(&self) -> &'r UploadId {
        self.upload_id
    }

    #[inline]
    pub fn part_number(&self) -> NonZeroUsize {
        self.part_number
    }

    /// 获取预签名 URL
    #[inline]
    pub fn url(&self) -> &'r Url {
        self.url
    }

    /// 获取分片对应的临时文件
    #[inline]
    pub fn file(&self) -> &'r PartialFile {
        self.file
    }
}

/// 上传分片的响应
#[derive(Debug, Clone, Default)]
pub struct UploadedPartResponse {
    etag: String,
}

impl UploadedPartResponse {
    #[inline]
    pub fn new(etag: impl Into<String>) -> Self {
        Self { etag: etag.into() }
    }

    #[inline]
    pub fn etag(&self) -> &str {
        &self.etag
    }

    #[inline]
    pub(crate) fn into_etag(self) -> String {
        self.etag
    }
}

/// 完成分片上传请求
#[derive(Debug, Clone, Copy)]
pub struct CompleteUploadRequest<'r> {
    params: &'r ObjectParams,
    upload_id: &'r UploadId,
    parts: &'r [CompletedPart],
}

impl<'r> CompleteUploadRequest<'r> {
    #[inline]
    pub(crate) fn new(params: &'r ObjectParams, upload_id: &'r UploadId, parts: &'r [CompletedPart]) -> Self {
        Self {
            params,
            upload_id,
            parts,
        }
    }

    #[inline]
    pub fn params(&self) -> &'r ObjectParams {
        self.params
    }

    #[inline]
    pub fn upload_id(&self) -> &'r UploadId {
        self.upload_id
    }

    /// 获取已完成的分片列表，按分片号升序排列
    #[inline]
    pub fn parts(&self) -> &'r [CompletedPart] {
        self.parts
    }
}

/// 取消分片上传请求
#[derive(Debug, Clone, Copy)]
pub struct AbortUploadRequest<'r> {
    params: &'r ObjectParams,
    upload_id: &'r UploadId,
}

impl<'r> AbortUploadRequest<'r> {
    #[inline]
    pub(crate) fn new(params: &'r ObjectParams, upload_id: &'r UploadId) -> Self {
        Self { params, upload_id }
    }

    #[inline]
    pub fn params(&self) -> &'r ObjectParams {
        self.params
    }

    #[inline]
    pub fn upload_id(&self) -> &'r UploadId {
        self.upload_id
    }
}

/// 远端服务代理接口
///
/// 同一个代理实例会被所有会话的所有分片共享，实现时不应在调用过程中修改共享配置。
/// 传输层失败应返回 [`crate::TransferErrorKind::NetworkError`]，可重试的失败通过 [`crate::TransferError::retryable`] 标记。
#[auto_impl(&, Box, Arc)]
pub trait RemoteServiceProxy: Debug + Sync + Send {
    /// 创建分片上传
    fn create_upload(&self, request: &CreateUploadRequest<'_>) -> TransferResult<CreatedUpload>;

    /// 上传分片
    ///
    /// `progress` 回调接受当前分片已经上传的字节数。
    /// 重试时可能对同一个分片再调用一次。
    fn upload_part(
        &self,
        request: &UploadPartRequest<'_>,
        progress: &dyn Fn(u64),
    ) -> TransferResult<UploadedPartResponse>;

    /// 完成分片上传
    fn complete_upload(&self, request: &CompleteUploadRequest<'_>) -> TransferResult<()>;

    /// 取消分片上传
    fn abort_upload(&self, request: &AbortUploadRequest<'_>) -> TransferResult<()>;
}

mod signer;
pub use signer::PartUrlSigner;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_id_rejects_blank() {
        assert!(UploadId::new("").is_none());
        assert!(UploadId::new("  \t").is_none());
        assert_eq!(UploadId::new("abc").unwrap().as_str(), "abc");
        assert!(CreatedUpload::new("").into_upload_id().is_none());
        assert_eq!(
            CreatedUpload::new("upload-1").into_upload_id(),
            UploadId::new("upload-1")
        );
    }
}
