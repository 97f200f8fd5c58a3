// 传输层抽象
//
// 上传核心只依赖 send(request) -> (status, headers, body)，不绑定具体 HTTP 客户端

pub mod http_client;

pub use http_client::ReqwestTransport;

use crate::error::UploadError;
use async_trait::async_trait;
use std::collections::HashMap;

/// HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Put,
}

/// 请求体
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// 表单（application/x-www-form-urlencoded）
    Form(Vec<(String, String)>),
    /// multipart 表单，附带一个二进制文件字段
    Multipart {
        fields: Vec<(String, String)>,
        file_field: String,
        data: Vec<u8>,
    },
    /// 原始字节
    Bytes(Vec<u8>),
}

/// HTTP 请求
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    /// 创建表单 POST 请求
    pub fn form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Form(fields),
        }
    }

    /// 查找表单字段值（表单与 multipart 请求均可用）
    pub fn form_value(&self, key: &str) -> Option<&str> {
        let fields = match &self.body {
            RequestBody::Form(fields) => fields,
            RequestBody::Multipart { fields, .. } => fields,
            RequestBody::Bytes(_) => return None,
        };
        fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 查找请求头（大小写不敏感）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// 请求体字节数
    pub fn body_len(&self) -> usize {
        match &self.body {
            RequestBody::Form(_) => 0,
            RequestBody::Multipart { data, .. } => data.len(),
            RequestBody::Bytes(data) => data.len(),
        }
    }
}

/// HTTP 响应
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// 响应头（键统一小写）
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// 传输层
///
/// 只负责发送请求，不做任何重试
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, UploadError>;
}
