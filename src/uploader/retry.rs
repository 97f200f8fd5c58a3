// 重试与指数退避
//
// 退避序列（默认参数）：100ms, 200ms, 400ms, 800ms ... 最大 5000ms，
// 限流时至少等待 10000ms

use crate::config::UploadConfig;
use crate::error::{UploadError, UploadErrorKind};
use crate::uploader::UploadMode;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大重试次数（总尝试次数 = max_retries + 1）
    pub max_retries: u32,
    /// 初始退避延迟（毫秒）
    pub initial_backoff_ms: u64,
    /// 最大退避延迟（毫秒）
    pub max_backoff_ms: u64,
    /// 限流时的最小等待时间（毫秒）
    pub rate_limit_backoff_ms: u64,
}

impl RetryPolicy {
    /// 分片上传使用的重试策略
    pub fn for_parts(config: &UploadConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            rate_limit_backoff_ms: config.rate_limit_backoff_ms,
        }
    }

    /// complete 使用的重试策略
    pub fn for_complete(config: &UploadConfig) -> Self {
        Self {
            max_retries: config.complete_max_retries,
            ..Self::for_parts(config)
        }
    }

    /// 计算指数退避延迟
    pub fn backoff_delay(&self, retry_count: u32, kind: UploadErrorKind) -> u64 {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);

        // 限流时使用更长的等待时间
        if kind == UploadErrorKind::RateLimited {
            delay.max(self.rate_limit_backoff_ms)
        } else {
            delay
        }
    }
}

/// 带退避的重试
///
/// `op` 收到当前尝试序号（从 0 开始）。每次尝试前检查取消；
/// 不可重试的错误立即返回，预算耗尽时返回最后一次的错误
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    mode: UploadMode,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, UploadError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, UploadError>>,
{
    let mut retry = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let error = match op(retry).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let kind = error.kind();
        if !kind.is_retriable(mode) {
            error!("[{}] 失败（不可重试）: {:?}, 错误: {}", label, kind, error);
            return Err(error);
        }

        if retry >= policy.max_retries {
            error!(
                "[{}] 失败，已达最大重试次数 ({}): {}",
                label, policy.max_retries, error
            );
            return Err(error);
        }

        let backoff_ms = policy.backoff_delay(retry, kind);
        warn!(
            "[{}] 失败，等待 {}ms 后重试 ({}/{}): {}",
            label,
            backoff_ms,
            retry + 1,
            policy.max_retries,
            error
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
        }
        retry += 1;
    }
}
