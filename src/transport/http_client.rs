// 基于 reqwest 的传输层实现

use crate::error::UploadError;
use crate::transport::{HttpRequest, HttpResponse, Method, RequestBody, Transport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// 默认 User-Agent
const USER_AGENT: &str = concat!("cloud-upload-rust/", env!("CARGO_PKG_VERSION"));

/// reqwest 传输层
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 创建传输层
    ///
    /// # 参数
    /// * `timeout_secs` - 单次请求超时（秒）
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// 使用已有的 reqwest 客户端
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> UploadError {
    if e.is_timeout() {
        UploadError::Timeout(e.to_string())
    } else {
        UploadError::Network(e.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, UploadError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = match method {
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
        };

        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match body {
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Multipart {
                fields,
                file_field,
                data,
            } => {
                let mut form = multipart::Form::new();
                for (name, value) in fields {
                    form = form.text(name, value);
                }
                let part = multipart::Part::bytes(data)
                    .file_name("blob")
                    .mime_str("application/octet-stream")
                    .map_err(map_reqwest_error)?;
                builder.multipart(form.part(file_field, part))
            }
            RequestBody::Bytes(data) => builder.body(data),
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        debug!(
            "HTTP {:?} {} -> status={}, body={} bytes",
            method,
            url,
            status,
            body.len()
        );

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
