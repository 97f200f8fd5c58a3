// 上传协议响应类型定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 智能上传模式标识
pub const INTELLIGENT_UPLOAD_TYPE: &str = "intelligent_ingestion";

/// 远端上传标识（start 返回，后续所有调用都需要携带）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// 远端存储位置 URI
    pub uri: String,
    /// 远端存储区域
    pub region: String,
    /// 上传 ID
    pub upload_id: String,
}

impl UploadTarget {
    pub fn fields(&self) -> Vec<(String, String)> {
        vec![
            ("uri".to_string(), self.uri.clone()),
            ("region".to_string(), self.region.clone()),
            ("upload_id".to_string(), self.upload_id.clone()),
        ]
    }
}

/// start 响应
#[derive(Debug, Clone, Deserialize)]
pub struct StartResponse {
    /// 远端存储位置 URI
    pub uri: String,

    /// 远端存储区域
    pub region: String,

    /// 上传 ID
    pub upload_id: String,

    /// 后续请求应发往的主机
    #[serde(default)]
    pub location_url: Option<String>,

    /// 上传类型（intelligent_ingestion 表示服务端接受智能上传）
    #[serde(default)]
    pub upload_type: Option<String>,
}

impl StartResponse {
    /// 服务端是否接受智能上传
    pub fn is_intelligent(&self) -> bool {
        self.upload_type.as_deref() == Some(INTELLIGENT_UPLOAD_TYPE)
    }

    pub fn target(&self) -> UploadTarget {
        UploadTarget {
            uri: self.uri.clone(),
            region: self.region.clone(),
            upload_id: self.upload_id.clone(),
        }
    }
}

/// upload 响应
///
/// 带 url 时需直传到预签名地址，否则表示服务端已代理写入
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadPartResponse {
    /// 预签名直传地址
    #[serde(default)]
    pub url: Option<String>,

    /// 直传时必须原样携带的请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub location_url: Option<String>,

    /// 代理写入时服务端返回的 ETag
    #[serde(default)]
    pub etag: Option<String>,
}

impl UploadPartResponse {
    /// 是否需要直传
    pub fn presigned_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.is_empty())
    }
}

/// 上传完成后的文件句柄（complete 响应）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandle {
    /// 文件句柄
    pub handle: String,

    /// 文件访问地址
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub filename: String,

    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub mimetype: String,

    #[serde(default)]
    pub status: Option<String>,
}
