// 上传客户端
//
// 面向调用方的入口：由配置组装传输层、协议客户端和上传引擎

use crate::config::ClientConfig;
use crate::error::UploadError;
use crate::protocol::{FileHandle, UploadProtocolClient};
use crate::storage::StorageOptions;
use crate::transport::{ReqwestTransport, Transport};
use crate::uploader::{UploadEngine, UploadProgress, UploadSource};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// 上传客户端
pub struct UploadClient {
    engine: UploadEngine,
}

impl UploadClient {
    /// 使用默认的 reqwest 传输层创建客户端
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.upload.request_timeout_secs)
            .context("Failed to build HTTP client")?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// 使用自定义传输层创建客户端
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        if config.api_key.is_empty() {
            anyhow::bail!("API Key 未配置");
        }
        config
            .upload
            .validate()
            .map_err(|e| anyhow::anyhow!(e))
            .context("上传配置验证失败")?;

        let protocol =
            UploadProtocolClient::new(transport, &config.base_url, &config.api_key, config.security);
        Ok(Self {
            engine: UploadEngine::new(protocol, config.upload),
        })
    }

    /// 使用调用方的取消令牌
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.engine = self.engine.with_cancel_token(cancel_token);
        self
    }

    /// 上传文件
    ///
    /// # 参数
    /// * `source` - 上传源
    /// * `size_hint` - 调用方已知的大小（以实际大小为准）
    /// * `want_intelligent` - 是否请求智能上传（服务端确认后才生效）
    /// * `storage` - 存储选项
    pub async fn upload(
        &self,
        source: UploadSource,
        size_hint: Option<u64>,
        want_intelligent: bool,
        storage: StorageOptions,
    ) -> Result<FileHandle, UploadError> {
        self.engine
            .upload(source, size_hint, want_intelligent, &storage)
            .await
    }

    /// 订阅上传进度
    pub fn subscribe_progress(&self) -> watch::Receiver<UploadProgress> {
        self.engine.subscribe_progress()
    }

    pub fn cancel(&self) {
        self.engine.cancel();
    }

    pub fn engine(&self) -> &UploadEngine {
        &self.engine
    }
}
