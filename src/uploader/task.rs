// 上传文件记录定义

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::UploadError;

/// 文件 ID（顺序分配，不复用）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 请求序号，用于丢弃过期的进度与响应
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestToken(pub u64);

/// 本地文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

impl LocalFile {
    /// 读取文件元数据
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("无法读取文件信息: {:?}", path))?;
        if !metadata.is_file() {
            anyhow::bail!("不是普通文件: {:?}", path);
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("无法获取文件名: {:?}", path))?;

        Ok(Self {
            path,
            name,
            size: metadata.len(),
        })
    }
}

/// 内存数据块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobData {
    /// 未设置时使用配置中的默认名称
    pub name: Option<String>,
    pub data: Arc<Vec<u8>>,
}

impl BlobData {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            name: None,
            data: Arc::new(data),
        }
    }

    pub fn named(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: Some(name.into()),
            data: Arc::new(data),
        }
    }
}

/// 上传数据来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    File(LocalFile),
    Blob(BlobData),
}

impl UploadSource {
    pub fn is_blob(&self) -> bool {
        matches!(self, UploadSource::Blob(_))
    }

    pub fn size(&self) -> u64 {
        match self {
            UploadSource::File(file) => file.size,
            UploadSource::Blob(blob) => blob.data.len() as u64,
        }
    }

    /// 名称，Blob 未命名时返回 `None`
    pub fn name(&self) -> Option<&str> {
        match self {
            UploadSource::File(file) => Some(file.name.as_str()),
            UploadSource::Blob(blob) => blob.name.as_deref(),
        }
    }

    /// 读取指定范围的数据
    pub async fn read_range(&self, range: Range<u64>) -> Result<Vec<u8>> {
        match self {
            UploadSource::Blob(blob) => {
                let start = usize::try_from(range.start).context("读取范围越界")?;
                let end = usize::try_from(range.end).context("读取范围越界")?;
                blob.data
                    .get(start..end)
                    .map(<[u8]>::to_vec)
                    .with_context(|| format!("读取范围越界: {:?}", range))
            }
            UploadSource::File(file) => {
                let path = file.path.clone();
                let size = usize::try_from(range.end - range.start).context("读取范围过大")?;
                let start = range.start;

                tokio::task::spawn_blocking(move || {
                    let mut file = std::fs::File::open(&path)
                        .with_context(|| format!("无法打开文件: {:?}", path))?;
                    file.seek(SeekFrom::Start(start))?;

                    let mut buffer = vec![0u8; size];
                    file.read_exact(&mut buffer)?;

                    Ok(buffer)
                })
                .await?
            }
        }
    }
}

/// 传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// 单个请求发送整个文件
    Standard,
    /// 分片上传
    Chunked,
}

/// 上传状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// 已添加，尚未发送
    Idle,
    Uploading(TransferMode),
    Completed,
    Failed,
}

/// 进行中的请求
#[derive(Debug, Clone)]
pub struct InFlightRequest {
    pub token: RequestToken,
    /// 分片索引，标准上传为 `None`
    pub chunk: Option<usize>,
    pub abort: CancellationToken,
}

/// 单个文件的上传记录
#[derive(Debug)]
pub struct FileRecord {
    pub id: FileId,
    pub source: UploadSource,
    pub name: String,
    pub size: u64,
    /// 传输实例 ID
    pub uuid: String,
    pub status: UploadStatus,
    /// 已确认发送的字节数（含请求开销）
    pub loaded: u64,
    /// 预估的全部请求总大小
    pub est_total_requests_size: Option<u64>,
    /// 首个分片的请求开销
    pub initial_request_overhead: Option<i64>,
    /// 最近一个分片的请求开销
    pub last_request_overhead: Option<i64>,
    /// 最近一次修正预估总大小时的分片索引
    pub last_chunk_idx_progress: Option<usize>,
    /// 待发送的分片索引（队首为下一个）
    pub remaining_chunks: VecDeque<usize>,
    pub attempting_resume: bool,
    pub in_flight: Option<InFlightRequest>,
    pub error: Option<UploadError>,
    pub created_at: i64,
}

impl FileRecord {
    pub fn new(id: FileId, source: UploadSource, name: String) -> Self {
        let size = source.size();
        Self {
            id,
            source,
            name,
            size,
            uuid: Uuid::new_v4().to_string(),
            status: UploadStatus::Idle,
            loaded: 0,
            est_total_requests_size: None,
            initial_request_overhead: None,
            last_request_overhead: None,
            last_chunk_idx_progress: None,
            remaining_chunks: VecDeque::new(),
            attempting_resume: false,
            in_flight: None,
            error: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_blob(&self) -> bool {
        self.source.is_blob()
    }

    /// 清除服务器要求重置时失效的分片状态
    pub fn clear_chunk_state(&mut self) {
        self.remaining_chunks.clear();
        self.loaded = 0;
        self.est_total_requests_size = None;
        self.initial_request_overhead = None;
        self.last_request_overhead = None;
        self.last_chunk_idx_progress = None;
    }

    /// 中止进行中的请求，返回是否确实中止了请求
    pub fn abort_in_flight(&mut self) -> bool {
        match self.in_flight.take() {
            Some(request) => {
                request.abort.cancel();
                true
            }
            None => false,
        }
    }

    /// 该令牌是否对应当前进行中的请求
    pub fn is_current(&self, token: RequestToken) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|request| request.token == token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_new_record() {
        let source = UploadSource::Blob(BlobData::new(vec![1, 2, 3]));
        let a = FileRecord::new(FileId(0), source.clone(), "a".to_string());
        let b = FileRecord::new(FileId(1), source, "b".to_string());
        assert_eq!(a.size, 3);
        assert_eq!(a.status, UploadStatus::Idle);
        assert_ne!(a.uuid, b.uuid);
        assert!(a.is_blob());
    }

    #[test]
    fn test_abort_in_flight() {
        let source = UploadSource::Blob(BlobData::new(vec![0; 10]));
        let mut record = FileRecord::new(FileId(0), source, "a".to_string());
        let abort = CancellationToken::new();
        record.in_flight = Some(InFlightRequest {
            token: RequestToken(7),
            chunk: Some(0),
            abort: abort.clone(),
        });

        assert!(record.is_current(RequestToken(7)));
        assert!(!record.is_current(RequestToken(6)));
        assert!(record.abort_in_flight());
        assert!(abort.is_cancelled());
        assert!(!record.abort_in_flight());
    }

    #[tokio::test]
    async fn test_read_range() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"0123456789").unwrap();

        let file = LocalFile::open(temp.path()).await.unwrap();
        assert_eq!(file.size, 10);
        let source = UploadSource::File(file);
        assert_eq!(source.read_range(2..5).await.unwrap(), b"234");

        let blob = UploadSource::Blob(BlobData::new(b"abcdef".to_vec()));
        assert_eq!(blob.read_range(4..6).await.unwrap(), b"ef");
        assert!(blob.read_range(4..9).await.is_err());
    }

    #[tokio::test]
    async fn test_open_directory_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(LocalFile::open(dir.path()).await.is_err());
    }
}
