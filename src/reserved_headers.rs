use http::header::{HeaderMap, HeaderName};
use log::debug;
use once_cell::sync::Lazy;
use std::collections::HashSet;

const RESERVED_HEADER_PREFIXES: &[&str] = &["x-amz-meta-", "x-amz-grant-"];

static RESERVED_HEADER_NAMES: Lazy<HashSet<HeaderName>> = Lazy::new(|| {
    [
        "x-amz-acl",
        "x-amz-tagging",
        "x-amz-storage-class",
        "x-amz-server-side-encryption",
        "x-amz-server-side-encryption-aws-kms-key-id",
        "x-amz-server-side-encryption-context",
        "x-amz-server-side-encryption-bucket-key-enabled",
        "x-amz-server-side-encryption-customer-algorithm",
        "x-amz-server-side-encryption-customer-key",
        "x-amz-server-side-encryption-customer-key-md5",
    ]
    .into_iter()
    .map(HeaderName::from_static)
    .collect()
});

/// 判断 HTTP 头是否由服务端保留
///
/// 保留的 HTTP 头控制对象元信息、授权、标签、存储类型和加密方式，不允许调用方直接传入。
#[inline]
pub fn is_reserved_header(name: &HeaderName) -> bool {
    let name_str = name.as_str();
    RESERVED_HEADER_PREFIXES
        .iter()
        .any(|prefix| name_str.starts_with(prefix))
        || RESERVED_HEADER_NAMES.contains(name)
}

/// 过滤调用方传入的 HTTP 头，去掉所有保留的 HTTP 头，其他 HTTP 头原样保留
pub fn filter_reserved_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_reserved_header(name) {
            debug!("strip reserved header {} from request headers", name);
        } else {
            filtered.append(name.to_owned(), value.to_owned());
        }
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use http::header::{HeaderValue, CACHE_CONTROL, CONTENT_DISPOSITION};

    #[test]
    fn test_filter_reserved_headers() -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert("x-amz-acl", HeaderValue::from_static("public-read"));
        headers.insert("x-amz-meta-foo", HeaderValue::from_static("bar"));
        headers.insert("x-amz-grant-read", HeaderValue::from_static("id=123"));
        headers.insert("x-amz-storage-class", HeaderValue::from_static("GLACIER"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.append(CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
        headers.append(CONTENT_DISPOSITION, HeaderValue::from_static("attachment"));
        headers.insert("x-custom", HeaderValue::from_static("kept"));

        let filtered = filter_reserved_headers(&headers);
        assert_eq!(filtered.len(), 4);
        assert!(filtered.get("x-amz-acl").is_none());
        assert!(filtered.get("x-amz-meta-foo").is_none());
        assert!(filtered.get("x-amz-grant-read").is_none());
        assert!(filtered.get("x-amz-storage-class").is_none());
        assert_eq!(filtered.get(CACHE_CONTROL), Some(&HeaderValue::from_static("no-cache")));
        assert_eq!(
            filtered.get_all(CONTENT_DISPOSITION).iter().collect::<Vec<_>>(),
            vec!["inline", "attachment"]
        );
        assert_eq!(filtered.get("x-custom"), Some(&HeaderValue::from_static("kept")));
        Ok(())
    }

    #[test]
    fn test_is_reserved_header() {
        assert!(is_reserved_header(&HeaderName::from_static("x-amz-tagging")));
        assert!(is_reserved_header(&HeaderName::from_static(
            "x-amz-server-side-encryption-customer-key"
        )));
        assert!(!is_reserved_header(&HeaderName::from_static("x-amz-request-payer")));
        assert!(!is_reserved_header(&HeaderName::from_static("content-type")));
    }
}
