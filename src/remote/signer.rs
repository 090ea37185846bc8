use super::{super::ObjectParams, UploadId};
use crate::TransferResult;
use auto_impl::auto_impl;
use std::{fmt::Debug, num::NonZeroUsize};
use url::Url;

/// 分片上传 URL 签名器接口
///
/// 为指定分片生成有时效的预签名 URL，无法签名时应返回 [`crate::TransferErrorKind::SigningError`]。
#[auto_impl(&, Box, Arc)]
pub trait PartUrlSigner: Debug + Sync + Send {
    /// 签发分片上传 URL
    fn sign_upload_part(
        &self,
        params: &ObjectParams,
        upload_id: &UploadId,
        part_number: NonZeroUsize,
    ) -> TransferResult<Url>;
}
