// 上传会话状态
//
// 一次上传调用对应一个会话，由 UploadEngine 独占持有；
// 分片登记表会被多个分片任务并发修改，统一放在一把互斥锁后面

use crate::protocol::{StartResponse, UploadTarget};
use crate::uploader::part::PartRegistry;
use crate::uploader::source::UploadSource;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// 上传模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// 普通上传：固定分片，每个分片需要 commit
    Regular,
    /// 智能上传：更小的分片，失败分片自动拆分重试，无需 commit
    Intelligent,
}

impl UploadMode {
    /// 根据 start 响应确定上传模式
    ///
    /// 只有调用方请求且服务端确认时才使用智能模式
    pub fn negotiate(want_intelligent: bool, response: &StartResponse) -> Self {
        if want_intelligent && response.is_intelligent() {
            UploadMode::Intelligent
        } else {
            UploadMode::Regular
        }
    }

    pub fn is_intelligent(&self) -> bool {
        matches!(self, UploadMode::Intelligent)
    }
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// 传输分片
    Transferring,
    /// 完成上传
    Completing,
    /// 已完成
    Completed,
    /// 失败
    Failed,
}

/// 上传进度快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    /// 已上传字节数
    pub uploaded_bytes: u64,
    /// 文件总大小
    pub total_bytes: u64,
    /// 已提交分片数
    pub completed_parts: usize,
    /// 分片总数（拆分后会增加）
    pub total_parts: usize,
    /// 上传速度 (bytes/s)
    pub speed: u64,
}

impl UploadProgress {
    /// 进度百分比
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.uploaded_bytes as f64 / self.total_bytes as f64) * 100.0
    }
}

/// 上传会话
#[derive(Debug)]
pub struct UploadSession {
    /// 会话ID
    pub id: String,
    /// 上传源
    pub source: UploadSource,
    /// 文件大小
    pub size: u64,
    /// 上传模式
    pub mode: UploadMode,
    /// 分片大小
    pub part_size: u64,
    /// 远端上传标识
    pub target: UploadTarget,
    /// 远端返回的后续请求主机
    pub location_url: Option<String>,
    /// 分片登记表
    pub parts: Arc<Mutex<PartRegistry>>,
    /// 会话状态
    pub status: SessionStatus,
}

impl UploadSession {
    /// 根据 start 响应创建会话并规划分片
    pub fn new(
        source: UploadSource,
        size: u64,
        mode: UploadMode,
        part_size: u64,
        start: &StartResponse,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            size,
            mode,
            part_size,
            target: start.target(),
            location_url: start.location_url.clone(),
            parts: Arc::new(Mutex::new(PartRegistry::plan(size, part_size))),
            status: SessionStatus::Transferring,
        }
    }

    /// 标记完成
    ///
    /// 仍有未提交分片时拒绝转换，返回 false
    pub fn mark_completed(&mut self) -> bool {
        if !self.parts.lock().is_completed() {
            return false;
        }
        self.status = SessionStatus::Completed;
        true
    }

    pub fn mark_failed(&mut self) {
        self.status = SessionStatus::Failed;
    }
}
