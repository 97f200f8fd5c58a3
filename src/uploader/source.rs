// 上传源
//
// 文件源按需读取分片范围（阻塞线程池上 seek + read_exact），
// 内存源直接切片

use crate::error::UploadError;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

/// 流式读取时按提示值预分配的上限
const MAX_PREALLOC_BYTES: u64 = 64 * 1024 * 1024;

/// 上传源
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// 本地文件
    File(PathBuf),
    /// 内存数据
    Memory(Arc<Vec<u8>>),
}

impl UploadSource {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        UploadSource::File(path.as_ref().to_path_buf())
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        UploadSource::Memory(Arc::new(data))
    }

    /// 读取整个流到内存
    ///
    /// size_hint 只用于预分配
    pub async fn from_reader<R>(mut reader: R, size_hint: Option<u64>) -> Result<Self, UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let capacity = size_hint.map_or(0, |hint| hint.min(MAX_PREALLOC_BYTES)) as usize;
        let mut data = Vec::with_capacity(capacity);
        reader.read_to_end(&mut data).await?;
        debug!("从流读取上传数据: {} bytes", data.len());
        Ok(Self::from_bytes(data))
    }

    /// 确定上传大小
    ///
    /// 以实际大小为准，提示值不一致时记录警告；大小为 0 视为无效参数
    pub async fn resolve_size(&self, size_hint: Option<u64>) -> Result<u64, UploadError> {
        let actual = match self {
            UploadSource::File(path) => {
                let metadata = tokio::fs::metadata(path).await?;
                if !metadata.is_file() {
                    return Err(UploadError::InvalidArgument(format!(
                        "不是普通文件: {:?}",
                        path
                    )));
                }
                metadata.len()
            }
            UploadSource::Memory(data) => data.len() as u64,
        };

        if let Some(hint) = size_hint {
            if hint != actual {
                warn!("上传大小提示 {} 与实际大小 {} 不一致，使用实际大小", hint, actual);
            }
        }

        if actual == 0 {
            return Err(UploadError::InvalidArgument("上传源为空".to_string()));
        }
        Ok(actual)
    }

    /// 读取 [offset, offset + len) 范围的数据
    pub async fn read_range(&self, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
        match self {
            UploadSource::File(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || {
                    let mut file = std::fs::File::open(&path)?;
                    file.seek(SeekFrom::Start(offset))?;

                    let mut buffer = vec![0u8; len as usize];
                    file.read_exact(&mut buffer)?;
                    Ok(buffer)
                })
                .await
                .map_err(std::io::Error::other)?
            }
            UploadSource::Memory(data) => {
                let start = offset as usize;
                let end = start.saturating_add(len as usize);
                data.get(start..end).map(|s| s.to_vec()).ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("范围 {}..{} 超出数据长度 {}", start, end, data.len()),
                    )
                })
            }
        }
    }
}
