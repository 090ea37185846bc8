use super::reserved_headers::filter_reserved_headers;
use assert_impl::assert_impl;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use log::warn;
use mime::Mime;
use std::collections::BTreeMap;

const METADATA_HEADER_PREFIX: &str = "x-amz-meta-";

/// 对象上传参数
///
/// 描述上传目标和随创建请求一同发送的对象属性。调用方传入的 HTTP 头在构建时已经去掉了服务端保留的部分，
/// 自定义元信息只能通过 [`ObjectParamsBuilder::insert_metadata`] 设置。
#[derive(Debug, Clone)]
pub struct ObjectParams {
    bucket: String,
    key: String,
    content_type: Option<Mime>,
    headers: HeaderMap,
    metadata: BTreeMap<String, String>,
}

impl ObjectParams {
    #[inline]
    pub fn builder(bucket: impl Into<String>, key: impl Into<String>) -> ObjectParamsBuilder {
        ObjectParamsBuilder::new(bucket, key)
    }

    /// 目标存储空间
    #[inline]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// 目标对象名称
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    /// 调用方传入的 HTTP 头，不含任何保留 HTTP 头
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 自定义元信息，名称统一为小写
    #[inline]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// 创建远端分片上传时应当发送的全部 HTTP 头
    ///
    /// 在调用方 HTTP 头的基础上加入 `Content-Type` 和以 `x-amz-meta-` 为前缀的元信息头。
    /// 无法表示为 HTTP 头的元信息会被跳过。
    pub fn create_request_headers(&self) -> HeaderMap {
        let mut headers = self.headers.to_owned();
        if let Some(content_type) = &self.content_type {
            if let Ok(value) = HeaderValue::from_str(content_type.as_ref()) {
                headers.insert(CONTENT_TYPE, value);
            }
        }
        for (name, value) in self.metadata.iter() {
            let header_name = HeaderName::from_bytes(format!("{METADATA_HEADER_PREFIX}{name}").as_bytes());
            match (header_name, HeaderValue::from_str(value)) {
                (Ok(header_name), Ok(header_value)) => {
                    headers.insert(header_name, header_value);
                }
                _ => warn!("Skip metadata {:?} which is not a valid HTTP header", name),
            }
        }
        headers
    }

    #[allow(dead_code)]
    fn assert() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

/// 对象上传参数构建器
#[derive(Debug, Clone)]
pub struct ObjectParamsBuilder {
    bucket: String,
    key: String,
    content_type: Option<Mime>,
    headers: HeaderMap,
    metadata: BTreeMap<String, String>,
}

impl ObjectParamsBuilder {
    #[inline]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            content_type: None,
            headers: HeaderMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn content_type(&mut self, content_type: Mime) -> &mut Self {
        self.content_type = Some(content_type);
        self
    }

    /// 替换全部调用方 HTTP 头
    #[inline]
    pub fn headers(&mut self, headers: HeaderMap) -> &mut Self {
        self.headers = headers;
        self
    }

    #[inline]
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.headers.append(name, value);
        self
    }

    /// 添加自定义元信息，同名元信息以最后一次设置为准
    #[inline]
    pub fn insert_metadata(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> &mut Self {
        self.metadata
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// 构建对象上传参数，保留的 HTTP 头在此时被去掉
    pub fn build(&self) -> ObjectParams {
        ObjectParams {
            bucket: self.bucket.to_owned(),
            key: self.key.to_owned(),
            content_type: self.content_type.to_owned(),
            headers: filter_reserved_headers(&self.headers),
            metadata: self.metadata.to_owned(),
        }
    }

    #[allow(dead_code)]
    fn assert() {
        assert_impl!(Send: Self);
        assert_impl!(Sync: Self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CACHE_CONTROL;

    #[test]
    fn test_object_params_strips_reserved_headers() {
        let params = ObjectParams::builder("fakebucket", "fakeobject")
            .content_type(mime::APPLICATION_OCTET_STREAM)
            .append_header(HeaderName::from_static("x-amz-acl"), HeaderValue::from_static("private"))
            .append_header(HeaderName::from_static("x-amz-meta-foo"), HeaderValue::from_static("bar"))
            .append_header(CACHE_CONTROL, HeaderValue::from_static("max-age=60"))
            .build();
        assert_eq!(params.bucket(), "fakebucket");
        assert_eq!(params.key(), "fakeobject");
        assert_eq!(params.headers().len(), 1);
        assert_eq!(
            params.headers().get(CACHE_CONTROL),
            Some(&HeaderValue::from_static("max-age=60"))
        );
    }

    #[test]
    fn test_create_request_headers() {
        let params = ObjectParams::builder("fakebucket", "fakeobject")
            .content_type(mime::TEXT_PLAIN)
            .append_header(HeaderName::from_static("x-amz-meta-owner"), HeaderValue::from_static("mallory"))
            .append_header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .insert_metadata("Owner", "alice")
            .insert_metadata("bad name", "ignored")
            .build();
        assert_eq!(params.metadata().get("owner").map(String::as_str), Some("alice"));

        let headers = params.create_request_headers();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get(CONTENT_TYPE), Some(&HeaderValue::from_static("text/plain")));
        assert_eq!(headers.get("x-amz-meta-owner"), Some(&HeaderValue::from_static("alice")));
        assert_eq!(headers.get(CACHE_CONTROL), Some(&HeaderValue::from_static("no-cache")));
    }
}
