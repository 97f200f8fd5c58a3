// 上传引擎
//
// 核心功能：
// 1. 协商上传模式（普通 / 智能）
// 2. 规划分片并并发上传
// 3. 智能模式下拆分重试耗尽的分片
// 4. 完成上传，返回文件句柄
//
// 并发上传策略：
// - 使用 Semaphore 控制最大并发分片数
// - 使用 JoinSet 管理并发任务，任务结果以值的形式返回
// - 分片登记表同时是工作队列，拆分出的分片放回队首
// - 任一分片致命失败时触发取消令牌，等待在途分片结束后返回错误

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::protocol::{
    CompleteUploadRequest, FileHandle, StartResponse, StartUploadRequest, UploadProtocolClient,
};
use crate::storage::StorageOptions;
use crate::uploader::part::SplitLimits;
use crate::uploader::part_uploader::{PartOutcome, PartUploader};
use crate::uploader::retry::{retry_with_backoff, RetryPolicy};
use crate::uploader::session::{SessionStatus, UploadMode, UploadProgress, UploadSession};
use crate::uploader::source::UploadSource;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 速度采样最小间隔（秒）
const SPEED_SAMPLE_INTERVAL_SECS: f64 = 0.5;

/// 上传引擎
///
/// 负责协调单个文件的上传过程，包括：
/// - 模式协商
/// - 分片上传
/// - 错误重试与拆分
/// - 进度跟踪
pub struct UploadEngine {
    /// 协议客户端
    protocol: UploadProtocolClient,
    /// 上传配置
    config: UploadConfig,
    /// 取消令牌（每次上传派生子令牌）
    cancel_token: CancellationToken,
    /// 进度广播
    progress_tx: watch::Sender<UploadProgress>,
}

impl UploadEngine {
    pub fn new(protocol: UploadProtocolClient, config: UploadConfig) -> Self {
        let (progress_tx, _) = watch::channel(UploadProgress::default());
        Self {
            protocol,
            config,
            cancel_token: CancellationToken::new(),
            progress_tx,
        }
    }

    /// 使用调用方的取消令牌
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    /// 取消所有进行中的上传
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// 订阅上传进度
    pub fn subscribe_progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress_tx.subscribe()
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// 执行上传
    ///
    /// # 上传流程
    /// 1. 确定上传大小（本地错误在任何远端调用前返回）
    /// 2. start，协商上传模式
    /// 3. 并发上传分片
    /// 4. complete，返回文件句柄
    pub async fn upload(
        &self,
        source: UploadSource,
        size_hint: Option<u64>,
        want_intelligent: bool,
        storage: &StorageOptions,
    ) -> Result<FileHandle, UploadError> {
        let size = source.resolve_size(size_hint).await?;
        let cancel = self.cancel_token.child_token();

        info!(
            "开始上传: filename={}, size={}, 请求智能上传={}",
            storage.filename(),
            size,
            want_intelligent
        );

        // 1. start
        let start = self.start(size, want_intelligent, storage, &cancel).await?;
        let mode = UploadMode::negotiate(want_intelligent, &start);
        if want_intelligent && mode == UploadMode::Regular {
            info!("服务端未启用智能上传，降级为普通上传");
        }

        let part_size = match mode {
            UploadMode::Regular => self.config.regular_part_size,
            UploadMode::Intelligent => self.config.intelligent_part_size,
        };
        let mut session = UploadSession::new(source, size, mode, part_size, &start);

        info!(
            "[会话 {}] 上传模式: {:?}, 分片大小: {} bytes, location_url: {:?}",
            session.id, mode, part_size, session.location_url
        );

        // 2. 分片上传
        if let Err(e) = self.transfer_parts(&session, storage, &cancel).await {
            session.mark_failed();
            error!("[会话 {}] 上传失败: {}", session.id, e);
            return Err(e);
        }

        // 3. complete
        session.status = SessionStatus::Completing;
        let handle = match self.complete(&session, storage, &cancel).await {
            Ok(handle) => handle,
            Err(e) => {
                session.mark_failed();
                error!("[会话 {}] complete 失败: {}", session.id, e);
                return Err(e);
            }
        };

        if !session.mark_completed() {
            session.mark_failed();
            return Err(UploadError::Task("存在未提交的分片".to_string()));
        }

        info!(
            "[会话 {}] 上传完成: handle={}, url={}",
            session.id, handle.handle, handle.url
        );
        Ok(handle)
    }

    async fn start(
        &self,
        size: u64,
        want_intelligent: bool,
        storage: &StorageOptions,
        cancel: &CancellationToken,
    ) -> Result<StartResponse, UploadError> {
        let request = StartUploadRequest::new(size, want_intelligent, storage);
        let protocol = &self.protocol;
        let request = &request;
        retry_with_backoff(
            RetryPolicy::for_parts(&self.config),
            UploadMode::Regular,
            cancel,
            "start",
            move |_| async move { protocol.start(request).await },
        )
        .await
    }

    async fn complete(
        &self,
        session: &UploadSession,
        storage: &StorageOptions,
        cancel: &CancellationToken,
    ) -> Result<FileHandle, UploadError> {
        let request = match session.mode {
            UploadMode::Regular => {
                let parts = session.parts.lock().etag_list().ok_or_else(|| {
                    UploadError::Decode("存在缺少 ETag 的分片，无法完成上传".to_string())
                })?;
                CompleteUploadRequest::regular(&session.target, session.size, storage, parts)
            }
            UploadMode::Intelligent => {
                CompleteUploadRequest::intelligent(&session.target, session.size, storage)
            }
        };

        let protocol = &self.protocol;
        let request = &request;
        retry_with_backoff(
            RetryPolicy::for_complete(&self.config),
            session.mode,
            cancel,
            "complete",
            move |_| async move { protocol.complete(request).await },
        )
        .await
    }

    /// 并发上传分片
    ///
    /// 队列为空且没有在途任务时结束；拆分出的分片会重新进入队列
    async fn transfer_parts(
        &self,
        session: &UploadSession,
        storage: &StorageOptions,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let concurrency = self.config.concurrency.max(1);
        let part_count = session.parts.lock().part_count();

        info!(
            "[并发上传] 开始上传 {} 个分片，并发数: {}",
            part_count, concurrency
        );

        let uploader = PartUploader::new(
            self.protocol.clone(),
            session.source.clone(),
            session.target.clone(),
            session.mode,
            session.size,
            storage.mimetype(),
            storage.location(),
            session.parts.clone(),
            RetryPolicy::for_parts(&self.config),
            self.config.proxy_parts,
            cancel.clone(),
        );

        // 信号量控制并发数
        let semaphore = Arc::new(Semaphore::new(concurrency));

        // JoinSet 管理并发任务
        let mut join_set: JoinSet<PartOutcome> = JoinSet::new();

        let mut progress = ProgressTracker::new(session.size);
        self.publish(&progress, session);

        loop {
            // 检查取消
            if cancel.is_cancelled() {
                return Err(drain_and_fail(&mut join_set, cancel, UploadError::Cancelled).await);
            }

            // 获取下一个待上传分片
            let next = session.parts.lock().next_pending();

            match next {
                Some(record) => {
                    // 尝试获取信号量许可（非阻塞检查）
                    let permit = match semaphore.clone().try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => {
                            // 信号量已满，先把分片放回队列，等待一个任务完成
                            session.parts.lock().unmark_in_flight(record.offset);

                            if let Some(result) = join_set.join_next().await {
                                if let Err(e) = self.handle_part_result(result, session, &mut progress) {
                                    return Err(drain_and_fail(&mut join_set, cancel, e).await);
                                }
                            }
                            continue;
                        }
                    };

                    let uploader = uploader.clone();
                    join_set.spawn(async move {
                        let outcome = uploader.upload(record).await;
                        drop(permit);
                        outcome
                    });
                }
                None => {
                    // 队列已空：等待在途任务，拆分可能会放回新的分片
                    match join_set.join_next().await {
                        Some(result) => {
                            if let Err(e) = self.handle_part_result(result, session, &mut progress) {
                                return Err(drain_and_fail(&mut join_set, cancel, e).await);
                            }
                            continue;
                        }
                        None => break,
                    }
                }
            }

            // 非阻塞检查是否有任务完成
            while let Some(result) = join_set.try_join_next() {
                if let Err(e) = self.handle_part_result(result, session, &mut progress) {
                    return Err(drain_and_fail(&mut join_set, cancel, e).await);
                }
            }
        }

        let parts = session.parts.lock();
        info!(
            "[并发上传] 所有 {} 个分片上传完成",
            parts.committed_count()
        );
        Ok(())
    }

    /// 处理分片上传结果
    ///
    /// 智能模式下可重试错误耗尽预算时拆分分片，返回 Ok 继续调度
    fn handle_part_result(
        &self,
        result: Result<PartOutcome, JoinError>,
        session: &UploadSession,
        progress: &mut ProgressTracker,
    ) -> Result<(), UploadError> {
        let PartOutcome { record, result } = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                // 任务 panic
                error!("分片任务异常: {}", e);
                return Err(UploadError::Task(e.to_string()));
            }
        };

        match result {
            Ok(etag) => {
                session.parts.lock().mark_committed(record.offset, etag);
                progress.record(record.length);
                self.publish(progress, session);
                Ok(())
            }
            Err(e) => {
                if session.mode == UploadMode::Intelligent && e.is_retriable(session.mode) {
                    let limits = SplitLimits {
                        min_part_size: self.config.min_part_size,
                        max_generations: self.config.max_split_generations,
                    };
                    let split = session.parts.lock().split(record.offset, limits);
                    if let Some((first, second)) = split {
                        warn!(
                            "[分片#{}] 重试耗尽，拆分为 {} + {} bytes 重新上传: {}",
                            record.part, first.length, second.length, e
                        );
                        self.publish(progress, session);
                        return Ok(());
                    }
                    debug!(
                        "[分片#{}] 无法继续拆分 (第 {} 代, {} bytes)",
                        record.part, record.generation, record.length
                    );
                }

                session.parts.lock().mark_failed(record.offset);
                error!("[分片#{}] 上传失败: {}", record.part, e);
                Err(e)
            }
        }
    }

    fn publish(&self, progress: &ProgressTracker, session: &UploadSession) {
        let (completed_parts, total_parts) = {
            let parts = session.parts.lock();
            (parts.committed_count(), parts.part_count())
        };
        self.progress_tx.send_replace(UploadProgress {
            uploaded_bytes: progress.uploaded_bytes,
            total_bytes: progress.total_bytes,
            completed_parts,
            total_parts,
            speed: progress.speed,
        });
    }
}

/// 触发取消，等待在途任务结束并丢弃其结果
async fn drain_and_fail(
    join_set: &mut JoinSet<PartOutcome>,
    cancel: &CancellationToken,
    error: UploadError,
) -> UploadError {
    cancel.cancel();
    let mut discarded = 0usize;
    while join_set.join_next().await.is_some() {
        discarded += 1;
    }
    if discarded > 0 {
        debug!("丢弃 {} 个在途分片的结果", discarded);
    }
    error
}

/// 进度与速度统计
struct ProgressTracker {
    uploaded_bytes: u64,
    total_bytes: u64,
    speed: u64,
    last_speed_time: Instant,
    last_speed_bytes: u64,
}

impl ProgressTracker {
    fn new(total_bytes: u64) -> Self {
        Self {
            uploaded_bytes: 0,
            total_bytes,
            speed: 0,
            last_speed_time: Instant::now(),
            last_speed_bytes: 0,
        }
    }

    /// 记录一个完成的分片，至少间隔 0.5 秒更新一次速度
    fn record(&mut self, bytes: u64) {
        self.uploaded_bytes += bytes;

        let elapsed_secs = self.last_speed_time.elapsed().as_secs_f64();
        if elapsed_secs >= SPEED_SAMPLE_INTERVAL_SECS {
            let bytes_diff = self.uploaded_bytes.saturating_sub(self.last_speed_bytes);
            self.speed = (bytes_diff as f64 / elapsed_secs) as u64;
            self.last_speed_bytes = self.uploaded_bytes;
            self.last_speed_time = Instant::now();
        }
    }
}
