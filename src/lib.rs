// Cloud Upload Rust Library
// 分片上传客户端核心库（支持智能上传）

// 配置管理模块
pub mod config;

// 日志系统
pub mod logging;

// 错误定义
pub mod error;

// HTTP 传输层
pub mod transport;

// 上传协议客户端
pub mod protocol;

// 存储选项
pub mod storage;

// 上传引擎模块
pub mod uploader;

// 客户端入口
pub mod client;

// 导出常用类型
pub use client::UploadClient;
pub use config::{ClientConfig, SecurityConfig, UploadConfig};
pub use error::{UploadError, UploadErrorKind};
pub use protocol::{FileHandle, UploadProtocolClient};
pub use storage::StorageOptions;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use uploader::{UploadEngine, UploadMode, UploadProgress, UploadSource};
