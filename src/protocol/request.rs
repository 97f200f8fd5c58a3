// 上传协议请求参数
//
// 所有请求都是构造后不可变的值对象，只负责输出各自的字段列表，
// apikey 与安全参数由 UploadProtocolClient 统一附加

use crate::protocol::UploadTarget;
use crate::storage::StorageOptions;

/// start 请求
#[derive(Debug, Clone)]
pub struct StartUploadRequest<'a> {
    size: u64,
    intelligent: bool,
    storage: &'a StorageOptions,
}

impl<'a> StartUploadRequest<'a> {
    pub fn new(size: u64, intelligent: bool, storage: &'a StorageOptions) -> Self {
        Self {
            size,
            intelligent,
            storage,
        }
    }

    pub fn fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("size".to_string(), self.size.to_string()),
            ("filename".to_string(), self.storage.filename().to_string()),
            ("mimetype".to_string(), self.storage.mimetype().to_string()),
        ];
        fields.extend(self.storage.store_fields());
        if self.intelligent {
            fields.push(("multipart".to_string(), "true".to_string()));
        }
        fields
    }
}

/// upload 请求（获取单个分片的上传参数，或代理上传分片）
#[derive(Debug, Clone)]
pub struct UploadPartRequest<'a> {
    target: &'a UploadTarget,
    part: u32,
    size: u64,
    md5: &'a str,
    /// 智能模式下分片内偏移
    offset: Option<u64>,
    /// 代理上传时随请求发送的分片数据
    data: Option<&'a [u8]>,
}

impl<'a> UploadPartRequest<'a> {
    /// 普通模式分片
    pub fn regular(target: &'a UploadTarget, part: u32, size: u64, md5: &'a str) -> Self {
        Self {
            target,
            part,
            size,
            md5,
            offset: None,
            data: None,
        }
    }

    /// 智能模式分片（携带分片内偏移）
    pub fn intelligent(
        target: &'a UploadTarget,
        part: u32,
        size: u64,
        md5: &'a str,
        offset: u64,
    ) -> Self {
        Self {
            target,
            part,
            size,
            md5,
            offset: Some(offset),
            data: None,
        }
    }

    /// 附带分片数据，由服务端代理写入存储
    pub fn with_inline_data(mut self, data: &'a [u8]) -> Self {
        self.data = Some(data);
        self
    }

    pub fn part(&self) -> u32 {
        self.part
    }

    pub fn inline_data(&self) -> Option<&'a [u8]> {
        self.data
    }

    pub fn fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("part".to_string(), self.part.to_string()),
            ("size".to_string(), self.size.to_string()),
            ("md5".to_string(), self.md5.to_string()),
        ];
        fields.extend(self.target.fields());
        if let Some(offset) = self.offset {
            fields.push(("multipart".to_string(), "true".to_string()));
            fields.push(("offset".to_string(), offset.to_string()));
        }
        fields
    }
}

/// commit 请求（仅普通模式）
#[derive(Debug, Clone)]
pub struct CommitUploadRequest<'a> {
    target: &'a UploadTarget,
    size: u64,
    part: u32,
    store_location: &'a str,
}

impl<'a> CommitUploadRequest<'a> {
    /// # 参数
    /// * `size` - 文件总大小
    /// * `part` - 分片序号（从 1 开始）
    pub fn new(target: &'a UploadTarget, size: u64, part: u32, store_location: &'a str) -> Self {
        Self {
            target,
            size,
            part,
            store_location,
        }
    }

    pub fn fields(&self) -> Vec<(String, String)> {
        let mut fields = self.target.fields();
        fields.push(("size".to_string(), self.size.to_string()));
        fields.push(("part".to_string(), self.part.to_string()));
        fields.push(("store_location".to_string(), self.store_location.to_string()));
        fields
    }
}

/// complete 请求
#[derive(Debug, Clone)]
pub struct CompleteUploadRequest<'a> {
    target: &'a UploadTarget,
    size: u64,
    storage: &'a StorageOptions,
    /// 普通模式的 ETag 列表，格式 `1:etag;2:etag`
    parts: Option<String>,
}

impl<'a> CompleteUploadRequest<'a> {
    pub fn regular(
        target: &'a UploadTarget,
        size: u64,
        storage: &'a StorageOptions,
        parts: String,
    ) -> Self {
        Self {
            target,
            size,
            storage,
            parts: Some(parts),
        }
    }

    pub fn intelligent(target: &'a UploadTarget, size: u64, storage: &'a StorageOptions) -> Self {
        Self {
            target,
            size,
            storage,
            parts: None,
        }
    }

    pub fn fields(&self) -> Vec<(String, String)> {
        let mut fields = self.target.fields();
        fields.push(("filename".to_string(), self.storage.filename().to_string()));
        fields.push(("size".to_string(), self.size.to_string()));
        fields.push(("mimetype".to_string(), self.storage.mimetype().to_string()));
        fields.extend(self.storage.store_fields());
        if let Some(parts) = &self.parts {
            fields.push(("parts".to_string(), parts.clone()));
        }
        fields
    }
}

/// 预签名直传请求
#[derive(Debug, Clone)]
pub struct StorageWriteRequest<'a> {
    pub part: u32,
    pub url: &'a str,
    /// 远端指定的请求头，原样透传
    pub headers: &'a [(String, String)],
    pub content_type: &'a str,
    pub data: &'a [u8],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> UploadTarget {
        UploadTarget {
            uri: "/bucket/key".to_string(),
            region: "us-east-1".to_string(),
            upload_id: "up-1".to_string(),
        }
    }

    fn value<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
        fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_start_fields_multipart_flag() {
        let storage = StorageOptions::builder().filename("a.bin").build();

        let regular = StartUploadRequest::new(100, false, &storage).fields();
        assert_eq!(value(&regular, "size"), Some("100"));
        assert_eq!(value(&regular, "filename"), Some("a.bin"));
        assert_eq!(value(&regular, "store_location"), Some("s3"));
        assert!(value(&regular, "multipart").is_none());

        let intelligent = StartUploadRequest::new(100, true, &storage).fields();
        assert_eq!(value(&intelligent, "multipart"), Some("true"));
    }

    #[test]
    fn test_upload_fields_offset_only_in_intelligent() {
        let target = target();
        let regular = UploadPartRequest::regular(&target, 2, 1024, "bWQ1").fields();
        assert_eq!(value(&regular, "part"), Some("2"));
        assert_eq!(value(&regular, "upload_id"), Some("up-1"));
        assert!(value(&regular, "offset").is_none());
        assert!(value(&regular, "multipart").is_none());

        let intelligent = UploadPartRequest::intelligent(&target, 2, 512, "bWQ1", 512).fields();
        assert_eq!(value(&intelligent, "offset"), Some("512"));
        assert_eq!(value(&intelligent, "multipart"), Some("true"));
    }

    #[test]
    fn test_commit_fields() {
        let target = target();
        let fields = CommitUploadRequest::new(&target, 9000, 3, "s3").fields();
        assert_eq!(value(&fields, "size"), Some("9000"));
        assert_eq!(value(&fields, "part"), Some("3"));
        assert_eq!(value(&fields, "store_location"), Some("s3"));
        assert_eq!(value(&fields, "region"), Some("us-east-1"));
    }

    #[test]
    fn test_complete_fields() {
        let target = target();
        let storage = StorageOptions::builder()
            .filename("a.bin")
            .mimetype("text/plain")
            .build();

        let regular =
            CompleteUploadRequest::regular(&target, 10, &storage, "1:e1;2:e2".to_string()).fields();
        assert_eq!(value(&regular, "parts"), Some("1:e1;2:e2"));
        assert_eq!(value(&regular, "mimetype"), Some("text/plain"));

        let intelligent = CompleteUploadRequest::intelligent(&target, 10, &storage).fields();
        assert!(value(&intelligent, "parts").is_none());
        assert!(value(&intelligent, "store_path").is_none());
        assert!(value(&intelligent, "store_access").is_none());
        assert!(value(&intelligent, "multipart").is_none());
    }
}
