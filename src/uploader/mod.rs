// 上传引擎模块
//
// - 分片登记表兼作工作队列（智能模式下失败分片对半拆分后重新入队）
// - Semaphore + JoinSet 控制单个文件的并发分片数
// - 指数退避重试（限流时等待更久）
// - 取消令牌贯穿所有分片任务

pub mod engine;
pub mod part;
pub mod part_uploader;
pub mod retry;
pub mod session;
pub mod source;

pub use engine::UploadEngine;
pub use part::{PartRecord, PartRegistry, PartStatus, SplitLimits};
pub use part_uploader::{part_md5, PartOutcome, PartUploader};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use session::{SessionStatus, UploadMode, UploadProgress, UploadSession};
pub use source::UploadSource;
