// 上传错误定义
//
// 所有协议调用都返回 Result<T, UploadError>，错误以值的形式跨越并发边界，
// 由 UploadErrorKind 统一分类决定是否重试

use crate::uploader::UploadMode;
use thiserror::Error;

/// 上传错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 网络错误（连接失败、DNS、连接被重置等）
    #[error("网络错误: {0}")]
    Network(String),

    /// 请求超时
    #[error("请求超时: {0}")]
    Timeout(String),

    /// 服务端拒绝（非 2xx 且响应体可解析）
    #[error("HTTP {code}: {message}")]
    Http { code: u16, message: String },

    /// 存储端拒绝预签名直传（签名过期、临时不可用等）
    #[error("存储写入失败 HTTP {code}: {message}")]
    Storage { code: u16, message: String },

    /// 分片校验失败（远端报告 MD5 不匹配）
    #[error("分片 #{part} 校验失败: {message}")]
    Integrity { part: u32, message: String },

    /// 读取本地上传源失败
    #[error("读取上传源失败: {0}")]
    SourceRead(#[from] std::io::Error),

    /// 参数无效
    #[error("参数无效: {0}")]
    InvalidArgument(String),

    /// 响应解析失败
    #[error("解析响应失败: {0}")]
    Decode(String),

    /// complete 返回 202，服务端仍在合并分片
    #[error("服务端仍在处理分片合并")]
    CompletionPending,

    /// 上传已取消
    #[error("上传已取消")]
    Cancelled,

    /// 分片任务异常（panic 或被中止）
    #[error("分片任务异常: {0}")]
    Task(String),
}

impl UploadError {
    /// 构造 HTTP 错误
    pub fn http(code: u16, message: impl Into<String>) -> Self {
        UploadError::Http {
            code,
            message: message.into(),
        }
    }

    /// 错误分类
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            UploadError::Network(_) => UploadErrorKind::Network,
            UploadError::Timeout(_) => UploadErrorKind::Timeout,
            UploadError::Http { code, .. } => UploadErrorKind::from_status(*code),
            UploadError::Storage { code, .. } => match UploadErrorKind::from_status(*code) {
                UploadErrorKind::RateLimited => UploadErrorKind::RateLimited,
                _ => UploadErrorKind::StorageRejected,
            },
            UploadError::Integrity { .. } => UploadErrorKind::Integrity,
            UploadError::SourceRead(_) => UploadErrorKind::SourceRead,
            UploadError::InvalidArgument(_) => UploadErrorKind::BadRequest,
            UploadError::Decode(_) => UploadErrorKind::Decode,
            UploadError::CompletionPending => UploadErrorKind::CompletionPending,
            UploadError::Cancelled => UploadErrorKind::Cancelled,
            UploadError::Task(_) => UploadErrorKind::Task,
        }
    }

    /// 在指定上传模式下是否可重试
    pub fn is_retriable(&self, mode: UploadMode) -> bool {
        self.kind().is_retriable(mode)
    }

    /// 对外暴露的 HTTP 状态码（本地错误返回 None）
    pub fn status_code(&self) -> Option<u16> {
        match self {
            UploadError::Http { code, .. } | UploadError::Storage { code, .. } => Some(*code),
            UploadError::CompletionPending => Some(202),
            _ => None,
        }
    }
}

/// 上传错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadErrorKind {
    /// 网络错误（可重试）
    Network,
    /// 超时（可重试）
    Timeout,
    /// 服务器错误 5xx（可重试）
    ServerError,
    /// 限流 429（可重试，需要更长等待时间）
    RateLimited,
    /// 请求超时 408（可重试）
    RequestTimeout,
    /// 存储端拒绝预签名 URL（可重试，下次尝试会重新获取 URL）
    StorageRejected,
    /// 分片合并中（可重试）
    CompletionPending,
    /// 校验失败（仅智能模式可重试）
    Integrity,
    /// 权限不足（不可重试）
    Forbidden,
    /// 资源不存在（不可重试）
    NotFound,
    /// 参数错误（不可重试）
    BadRequest,
    /// 其他非 2xx 状态（不可重试）
    Rejected,
    /// 响应解析失败（不可重试）
    Decode,
    /// 本地读取失败（不可重试）
    SourceRead,
    /// 已取消
    Cancelled,
    /// 任务异常
    Task,
}

impl UploadErrorKind {
    /// 是否可重试
    pub fn is_retriable(&self, mode: UploadMode) -> bool {
        match self {
            UploadErrorKind::Network
            | UploadErrorKind::Timeout
            | UploadErrorKind::ServerError
            | UploadErrorKind::RateLimited
            | UploadErrorKind::RequestTimeout
            | UploadErrorKind::StorageRejected
            | UploadErrorKind::CompletionPending => true,
            UploadErrorKind::Integrity => mode == UploadMode::Intelligent,
            _ => false,
        }
    }

    /// 从 HTTP 状态码转换
    pub fn from_status(code: u16) -> Self {
        match code {
            202 => UploadErrorKind::CompletionPending,
            400 | 206 => UploadErrorKind::BadRequest,
            401 | 403 => UploadErrorKind::Forbidden,
            404 => UploadErrorKind::NotFound,
            408 => UploadErrorKind::RequestTimeout,
            429 => UploadErrorKind::RateLimited,
            500..=599 => UploadErrorKind::ServerError,
            _ => UploadErrorKind::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(UploadErrorKind::from_status(500), UploadErrorKind::ServerError);
        assert_eq!(UploadErrorKind::from_status(503), UploadErrorKind::ServerError);
        assert_eq!(UploadErrorKind::from_status(429), UploadErrorKind::RateLimited);
        assert_eq!(UploadErrorKind::from_status(400), UploadErrorKind::BadRequest);
        assert_eq!(UploadErrorKind::from_status(403), UploadErrorKind::Forbidden);
        assert_eq!(UploadErrorKind::from_status(418), UploadErrorKind::Rejected);
    }

    #[test]
    fn test_remote_rejection_retried_only_for_5xx() {
        let mode = UploadMode::Regular;
        assert!(UploadError::http(502, "bad gateway").is_retriable(mode));
        assert!(!UploadError::http(400, "bad request").is_retriable(mode));
        assert!(!UploadError::http(403, "forbidden").is_retriable(mode));
    }

    #[test]
    fn test_storage_rejection_is_transient() {
        let err = UploadError::Storage {
            code: 403,
            message: "Request has expired".to_string(),
        };
        assert_eq!(err.kind(), UploadErrorKind::StorageRejected);
        assert!(err.is_retriable(UploadMode::Regular));
    }

    #[test]
    fn test_integrity_depends_on_mode() {
        let err = UploadError::Integrity {
            part: 3,
            message: "BadDigest".to_string(),
        };
        assert!(err.is_retriable(UploadMode::Intelligent));
        assert!(!err.is_retriable(UploadMode::Regular));
    }

    #[test]
    fn test_local_errors_are_fatal() {
        let err = UploadError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.kind(), UploadErrorKind::SourceRead);
        assert!(!err.is_retriable(UploadMode::Intelligent));
        assert!(!UploadError::Cancelled.is_retriable(UploadMode::Intelligent));
        assert_eq!(err.status_code(), None);
    }
}
