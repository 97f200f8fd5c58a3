// 单分片上传
//
// 每个分片：读取数据 -> 计算 MD5 -> upload -> （直传）PUT -> 普通模式 commit。
// upload 与 PUT 作为一次尝试整体重试，commit 有自己的重试循环

use crate::error::UploadError;
use crate::protocol::{
    CommitUploadRequest, StorageWriteRequest, UploadPartRequest, UploadProtocolClient,
    UploadTarget,
};
use crate::uploader::part::{PartRecord, PartRegistry};
use crate::uploader::retry::{retry_with_backoff, RetryPolicy};
use crate::uploader::source::UploadSource;
use crate::uploader::UploadMode;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 计算分片 MD5（base64 编码的原始摘要）
pub fn part_md5(data: &[u8]) -> String {
    BASE64.encode(md5::compute(data).0)
}

/// 分片上传结果
#[derive(Debug)]
pub struct PartOutcome {
    /// 上传的分片
    pub record: PartRecord,
    /// 成功时为存储端 ETag（代理写入可能没有）
    pub result: Result<Option<String>, UploadError>,
}

/// 分片上传器
///
/// 同一会话的所有分片任务共享一份（克隆开销只是引用计数）
#[derive(Clone)]
pub struct PartUploader {
    protocol: UploadProtocolClient,
    source: UploadSource,
    target: Arc<UploadTarget>,
    mode: UploadMode,
    /// 文件总大小（commit 需要）
    size: u64,
    mimetype: Arc<str>,
    store_location: Arc<str>,
    parts: Arc<Mutex<PartRegistry>>,
    policy: RetryPolicy,
    proxy_parts: bool,
    cancel_token: CancellationToken,
}

impl PartUploader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        protocol: UploadProtocolClient,
        source: UploadSource,
        target: UploadTarget,
        mode: UploadMode,
        size: u64,
        mimetype: &str,
        store_location: &str,
        parts: Arc<Mutex<PartRegistry>>,
        policy: RetryPolicy,
        proxy_parts: bool,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            protocol,
            source,
            target: Arc::new(target),
            mode,
            size,
            mimetype: Arc::from(mimetype),
            store_location: Arc::from(store_location),
            parts,
            policy,
            proxy_parts,
            cancel_token,
        }
    }

    /// 上传一个分片
    pub async fn upload(&self, record: PartRecord) -> PartOutcome {
        let result = self.upload_inner(&record).await;
        PartOutcome { record, result }
    }

    async fn upload_inner(&self, record: &PartRecord) -> Result<Option<String>, UploadError> {
        if self.cancel_token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        debug!(
            "[分片#{}] 开始上传 (范围: {}-{}, 大小: {} bytes, 分片内偏移: {})",
            record.part,
            record.offset,
            record.end() - 1,
            record.length,
            record.part_offset
        );

        let data = self.source.read_range(record.offset, record.length).await?;
        let md5 = part_md5(&data);
        self.parts.lock().set_md5(record.offset, md5.clone());

        let label = format!("分片#{}@{}", record.part, record.offset);
        let this = self;
        let data = data.as_slice();
        let md5 = md5.as_str();

        let etag = retry_with_backoff(
            self.policy,
            self.mode,
            &self.cancel_token,
            &label,
            move |_| async move {
                let result = this.transfer_once(record, data, md5).await;
                if result.is_err() {
                    this.parts.lock().increment_retry(record.offset);
                }
                result
            },
        )
        .await?;

        if self.mode == UploadMode::Regular {
            // 普通模式 complete 需要每个分片的 ETag
            if etag.as_deref().map_or(true, str::is_empty) {
                return Err(UploadError::Decode(format!(
                    "分片 #{} 未返回 ETag",
                    record.part
                )));
            }

            let commit_label = format!("commit#{}", record.part);
            retry_with_backoff(
                self.policy,
                self.mode,
                &self.cancel_token,
                &commit_label,
                move |_| async move { this.commit(record).await },
            )
            .await?;
        }

        debug!("[分片#{}] ✓ 上传成功 (etag: {:?})", record.part, etag);
        Ok(etag)
    }

    /// 一次上传尝试：获取上传参数（或代理写入），需要时直传到存储端
    async fn transfer_once(
        &self,
        record: &PartRecord,
        data: &[u8],
        md5: &str,
    ) -> Result<Option<String>, UploadError> {
        let target = self.target.as_ref();
        let mut request = match self.mode {
            UploadMode::Regular => UploadPartRequest::regular(target, record.part, record.length, md5),
            UploadMode::Intelligent => UploadPartRequest::intelligent(
                target,
                record.part,
                record.length,
                md5,
                record.part_offset,
            ),
        };
        if self.proxy_parts {
            request = request.with_inline_data(data);
        }

        let response = self.protocol.upload(&request).await?;

        let url = match response.presigned_url() {
            Some(url) => url,
            None if self.proxy_parts => {
                debug!("[分片#{}] 服务端已代理写入", record.part);
                return Ok(response.etag.clone());
            }
            None => {
                return Err(UploadError::Decode(format!(
                    "分片 #{} 的 upload 响应缺少 url",
                    record.part
                )));
            }
        };

        let mut headers: Vec<(String, String)> = response
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.sort();

        let write = StorageWriteRequest {
            part: record.part,
            url,
            headers: &headers,
            content_type: &self.mimetype,
            data,
        };
        self.protocol.put_to_storage(&write).await
    }

    async fn commit(&self, record: &PartRecord) -> Result<(), UploadError> {
        let request = CommitUploadRequest::new(
            self.target.as_ref(),
            self.size,
            record.part,
            &self.store_location,
        );
        self.protocol.commit(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_md5_is_base64_of_raw_digest() {
        // md5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(part_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
        assert_eq!(part_md5(b"hello"), "XUFAKrxLKna5cZ2REBfFkg==");
    }
}
