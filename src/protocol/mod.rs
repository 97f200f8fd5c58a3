// 上传协议客户端
//
// 四个协议调用（start / upload / commit / complete）与预签名直传的请求构建和响应解析，
// 不保存任何跨调用状态

pub mod request;
pub mod types;

pub use request::{
    CommitUploadRequest, CompleteUploadRequest, StartUploadRequest, StorageWriteRequest,
    UploadPartRequest,
};
pub use types::{FileHandle, StartResponse, UploadPartResponse, UploadTarget};

use crate::config::SecurityConfig;
use crate::error::UploadError;
use crate::transport::{HttpRequest, HttpResponse, Method, RequestBody, Transport};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 代理上传时分片数据所在的表单字段
const INLINE_PART_FIELD: &str = "fileUpload";

/// 错误消息截断长度
const MAX_ERROR_MESSAGE_LEN: usize = 256;

/// 上传协议客户端
#[derive(Clone)]
pub struct UploadProtocolClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    api_key: String,
    security: Option<SecurityConfig>,
}

impl UploadProtocolClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        security: Option<SecurityConfig>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            security,
        }
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/multipart/{}", self.base_url, name)
    }

    /// apikey 放在首位，其余字段按请求自身顺序
    fn with_api_key(&self, fields: Vec<(String, String)>) -> Vec<(String, String)> {
        let mut all = Vec::with_capacity(fields.len() + 3);
        all.push(("apikey".to_string(), self.api_key.clone()));
        all.extend(fields);
        all
    }

    // =====================================================
    // 请求构建
    // =====================================================

    pub fn build_start_request(&self, request: &StartUploadRequest<'_>) -> HttpRequest {
        let mut fields = self.with_api_key(request.fields());
        if let Some(security) = &self.security {
            fields.push(("policy".to_string(), security.policy.clone()));
            fields.push(("signature".to_string(), security.signature.clone()));
        }
        HttpRequest::form(self.endpoint("start"), fields)
    }

    pub fn build_upload_request(&self, request: &UploadPartRequest<'_>) -> HttpRequest {
        let fields = self.with_api_key(request.fields());
        match request.inline_data() {
            Some(data) => HttpRequest {
                method: Method::Post,
                url: self.endpoint("upload"),
                headers: Vec::new(),
                body: RequestBody::Multipart {
                    fields,
                    file_field: INLINE_PART_FIELD.to_string(),
                    data: data.to_vec(),
                },
            },
            None => HttpRequest::form(self.endpoint("upload"), fields),
        }
    }

    pub fn build_commit_request(&self, request: &CommitUploadRequest<'_>) -> HttpRequest {
        HttpRequest::form(self.endpoint("commit"), self.with_api_key(request.fields()))
    }

    pub fn build_complete_request(&self, request: &CompleteUploadRequest<'_>) -> HttpRequest {
        HttpRequest::form(self.endpoint("complete"), self.with_api_key(request.fields()))
    }

    /// 预签名直传请求：远端指定的请求头原样透传，缺少 Content-Type 时补上
    pub fn build_storage_request(&self, request: &StorageWriteRequest<'_>) -> HttpRequest {
        let mut headers: Vec<(String, String)> = request.headers.to_vec();
        if !headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        {
            headers.push(("Content-Type".to_string(), request.content_type.to_string()));
        }
        HttpRequest {
            method: Method::Put,
            url: request.url.to_string(),
            headers,
            body: RequestBody::Bytes(request.data.to_vec()),
        }
    }

    // =====================================================
    // 协议调用
    // =====================================================

    /// 开始上传
    pub async fn start(&self, request: &StartUploadRequest<'_>) -> Result<StartResponse, UploadError> {
        let response = self.transport.send(self.build_start_request(request)).await?;
        let start: StartResponse = decode_json(check_status(response)?)?;

        info!(
            "start 成功: upload_id={}, region={}, upload_type={:?}",
            start.upload_id, start.region, start.upload_type
        );
        Ok(start)
    }

    /// 获取分片上传参数（或代理上传分片）
    pub async fn upload(
        &self,
        request: &UploadPartRequest<'_>,
    ) -> Result<UploadPartResponse, UploadError> {
        let response = self
            .transport
            .send(self.build_upload_request(request))
            .await?;

        // 代理写入时服务端也可能报告校验失败
        if !response.is_success() {
            if let Some(err) = digest_mismatch(request.part(), &response) {
                return Err(err);
            }
        }
        let response = check_status(response)?;

        // 代理写入成功时服务端可能返回空响应体
        if response.body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(UploadPartResponse::default());
        }
        decode_json(response)
    }

    /// 直传分片到预签名地址，返回存储端 ETag
    pub async fn put_to_storage(
        &self,
        request: &StorageWriteRequest<'_>,
    ) -> Result<Option<String>, UploadError> {
        let response = self
            .transport
            .send(self.build_storage_request(request))
            .await?;

        if !response.is_success() {
            if let Some(err) = digest_mismatch(request.part, &response) {
                return Err(err);
            }
            let body = response.text();
            warn!(
                "存储端拒绝分片 #{}: status={}, body={}",
                request.part,
                response.status,
                truncate(&body)
            );
            return Err(UploadError::Storage {
                code: response.status,
                message: truncate(&body),
            });
        }

        Ok(response.header("etag").map(|s| s.to_string()))
    }

    /// 提交分片（仅普通模式）
    pub async fn commit(&self, request: &CommitUploadRequest<'_>) -> Result<(), UploadError> {
        let response = self
            .transport
            .send(self.build_commit_request(request))
            .await?;
        check_status(response)?;
        Ok(())
    }

    /// 完成上传
    ///
    /// 服务端仍在合并分片时返回 202，映射为 CompletionPending 交由调用方重试
    pub async fn complete(
        &self,
        request: &CompleteUploadRequest<'_>,
    ) -> Result<FileHandle, UploadError> {
        let response = self
            .transport
            .send(self.build_complete_request(request))
            .await?;

        if response.status == 202 {
            debug!("complete 返回 202，分片仍在合并");
            return Err(UploadError::CompletionPending);
        }

        decode_json(check_status(response)?)
    }
}

/// 远端报告的 MD5 不匹配（BadDigest / InvalidDigest）
fn digest_mismatch(part: u32, response: &HttpResponse) -> Option<UploadError> {
    let body = response.text();
    if body.contains("BadDigest") || body.contains("InvalidDigest") {
        Some(UploadError::Integrity {
            part,
            message: truncate(&body),
        })
    } else {
        None
    }
}

/// 非 2xx 统一转换为 HTTP 错误
fn check_status(response: HttpResponse) -> Result<HttpResponse, UploadError> {
    if response.is_success() {
        return Ok(response);
    }
    Err(UploadError::http(
        response.status,
        extract_error_message(&response),
    ))
}

/// 从响应体提取错误信息（优先 JSON 的 error / message 字段）
fn extract_error_message(response: &HttpResponse) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&response.body) {
        for key in ["error", "message", "msg"] {
            if let Some(msg) = value.get(key).and_then(|v| v.as_str()) {
                return truncate(msg);
            }
        }
    }
    let text = response.text();
    if text.trim().is_empty() {
        format!("HTTP {}", response.status)
    } else {
        truncate(text.trim())
    }
}

fn decode_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T, UploadError> {
    serde_json::from_slice(&response.body).map_err(|e| {
        UploadError::Decode(format!("{}, body={}", e, truncate(&response.text())))
    })
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_ERROR_MESSAGE_LEN {
        return s.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageOptions;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// 固定返回同一响应并记录请求
    struct FixedTransport {
        response: HttpResponse,
        requests: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, UploadError> {
            self.requests.lock().push(request);
            Ok(self.response.clone())
        }
    }

    fn client_with(response: HttpResponse) -> (UploadProtocolClient, Arc<FixedTransport>) {
        let transport = Arc::new(FixedTransport {
            response,
            requests: Mutex::new(Vec::new()),
        });
        let client = UploadProtocolClient::new(
            transport.clone(),
            "https://upload.example.com/",
            "KEY",
            Some(SecurityConfig {
                policy: "P".to_string(),
                signature: "S".to_string(),
            }),
        );
        (client, transport)
    }

    fn target() -> UploadTarget {
        UploadTarget {
            uri: "/b/k".to_string(),
            region: "us-east-1".to_string(),
            upload_id: "u1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_carries_api_key_and_security() {
        let body = r#"{"uri":"/b/k","region":"us-east-1","upload_id":"u1"}"#;
        let (client, transport) = client_with(HttpResponse::new(200, body));
        let storage = StorageOptions::builder().filename("f").build();

        let response = client
            .start(&StartUploadRequest::new(10, false, &storage))
            .await
            .unwrap();
        assert_eq!(response.upload_id, "u1");

        let requests = transport.requests.lock();
        assert_eq!(requests[0].url, "https://upload.example.com/multipart/start");
        assert_eq!(requests[0].form_value("apikey"), Some("KEY"));
        assert_eq!(requests[0].form_value("policy"), Some("P"));
        assert_eq!(requests[0].form_value("signature"), Some("S"));
    }

    #[tokio::test]
    async fn test_non_2xx_becomes_http_error() {
        let (client, _) = client_with(HttpResponse::new(400, r#"{"error":"invalid apikey"}"#));
        let storage = StorageOptions::default();
        let err = client
            .start(&StartUploadRequest::new(10, false, &storage))
            .await
            .unwrap_err();
        match err {
            UploadError::Http { code, message } => {
                assert_eq!(code, 400);
                assert_eq!(message, "invalid apikey");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_complete_202_is_pending() {
        let (client, _) = client_with(HttpResponse::new(202, "{}"));
        let storage = StorageOptions::default();
        let target = target();
        let err = client
            .complete(&CompleteUploadRequest::intelligent(&target, 10, &storage))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::CompletionPending));
    }

    #[tokio::test]
    async fn test_storage_put_headers_verbatim() {
        let (client, transport) =
            client_with(HttpResponse::new(200, "").with_header("ETag", "\"etag-1\""));
        let headers = vec![
            ("Authorization".to_string(), "AWS4-HMAC-SHA256 abc".to_string()),
            ("x-amz-date".to_string(), "20240101T000000Z".to_string()),
        ];
        let etag = client
            .put_to_storage(&StorageWriteRequest {
                part: 1,
                url: "https://s3.example.com/p1",
                headers: &headers,
                content_type: "text/plain",
                data: b"hello",
            })
            .await
            .unwrap();
        assert_eq!(etag.as_deref(), Some("\"etag-1\""));

        let requests = transport.requests.lock();
        assert_eq!(requests[0].method, Method::Put);
        assert_eq!(requests[0].header("authorization"), Some("AWS4-HMAC-SHA256 abc"));
        assert_eq!(requests[0].header("x-amz-date"), Some("20240101T000000Z"));
        assert_eq!(requests[0].header("content-type"), Some("text/plain"));
        assert_eq!(requests[0].body_len(), 5);
    }

    #[tokio::test]
    async fn test_storage_bad_digest_is_integrity_error() {
        let (client, _) = client_with(HttpResponse::new(
            400,
            "<Error><Code>BadDigest</Code></Error>",
        ));
        let err = client
            .put_to_storage(&StorageWriteRequest {
                part: 4,
                url: "https://s3.example.com/p4",
                headers: &[],
                content_type: "application/octet-stream",
                data: b"x",
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Integrity { part: 4, .. }));
    }

    #[tokio::test]
    async fn test_proxied_upload_sends_inline_data() {
        let (client, transport) = client_with(HttpResponse::new(200, ""));
        let target = target();
        let response = client
            .upload(&UploadPartRequest::regular(&target, 1, 3, "md5").with_inline_data(b"abc"))
            .await
            .unwrap();
        assert!(response.presigned_url().is_none());

        let requests = transport.requests.lock();
        assert_eq!(requests[0].body_len(), 3);
        assert_eq!(requests[0].form_value("part"), Some("1"));
    }

    #[tokio::test]
    async fn test_proxied_bad_digest_is_integrity_error() {
        let (client, _) = client_with(HttpResponse::new(
            400,
            r#"{"error":"BadDigest: md5 mismatch"}"#,
        ));
        let target = target();
        let err = client
            .upload(
                &UploadPartRequest::intelligent(&target, 4, 3, "md5", 0).with_inline_data(b"abc"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Integrity { part: 4, .. }));
    }

    #[test]
    fn test_truncate_long_message() {
        let long = "错".repeat(200);
        let truncated = truncate(&long);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= MAX_ERROR_MESSAGE_LEN + 3);
    }
}
