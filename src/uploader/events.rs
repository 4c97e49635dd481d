//! 上传事件
//!
//! 把回调转换为可序列化的事件，推送到 tokio 通道，便于跨任务消费

use super::callbacks::UploadCallbacks;
use super::chunk::ChunkCallbackData;
use super::response::UploadResponse;
use super::task::FileId;
use super::validation::{ValidationError, ValidationErrorKind};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// 上传事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 文件已提交
    Submitted { id: FileId, name: String },
    /// 校验失败
    ValidationFailed {
        kind: ValidationErrorKind,
        message: String,
    },
    /// 开始上传
    Started { id: FileId, name: String },
    /// 发送分片
    ChunkStarted {
        id: FileId,
        name: String,
        chunk: ChunkCallbackData,
    },
    /// 从断点继续
    Resumed {
        id: FileId,
        name: String,
        part_index: usize,
    },
    /// 进度更新
    Progress {
        id: FileId,
        name: String,
        loaded: u64,
        total: u64,
    },
    /// 上传结束
    Completed {
        id: FileId,
        name: String,
        success: bool,
        status: u16,
        response: Value,
    },
    /// 已取消
    Cancelled { id: FileId, name: String },
    /// 错误
    Error {
        id: Option<FileId>,
        name: String,
        reason: String,
    },
    /// 自动重试
    AutoRetry {
        id: FileId,
        name: String,
        attempt: u32,
    },
    /// 删除请求已发送
    DeleteStarted { id: FileId },
    /// 删除请求结束
    DeleteCompleted {
        id: FileId,
        status: u16,
        is_error: bool,
    },
}

impl UploadEvent {
    /// 事件关联的文件 ID
    pub fn file_id(&self) -> Option<FileId> {
        match self {
            UploadEvent::Submitted { id, .. }
            | UploadEvent::Started { id, .. }
            | UploadEvent::ChunkStarted { id, .. }
            | UploadEvent::Resumed { id, .. }
            | UploadEvent::Progress { id, .. }
            | UploadEvent::Completed { id, .. }
            | UploadEvent::Cancelled { id, .. }
            | UploadEvent::AutoRetry { id, .. }
            | UploadEvent::DeleteStarted { id }
            | UploadEvent::DeleteCompleted { id, .. } => Some(*id),
            UploadEvent::Error { id, .. } => *id,
            UploadEvent::ValidationFailed { .. } => None,
        }
    }

    /// 是否为终态事件
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadEvent::Completed { .. } | UploadEvent::Cancelled { .. }
        )
    }
}

/// 把回调转发为事件
#[derive(Debug, Clone)]
pub struct EventForwarder {
    tx: mpsc::UnboundedSender<UploadEvent>,
}

impl EventForwarder {
    pub fn new(tx: mpsc::UnboundedSender<UploadEvent>) -> Self {
        Self { tx }
    }

    /// 创建转发器及其接收端
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn emit(&self, event: UploadEvent) -> Result<()> {
        self.tx.send(event).ok().context("事件接收端已关闭")
    }
}

impl UploadCallbacks for EventForwarder {
    fn on_submit(&self, id: FileId, name: &str) -> Result<bool> {
        self.emit(UploadEvent::Submitted {
            id,
            name: name.to_string(),
        })?;
        Ok(true)
    }

    fn on_validation_error(&self, error: &ValidationError) -> Result<()> {
        self.emit(UploadEvent::ValidationFailed {
            kind: error.kind(),
            message: error.to_string(),
        })
    }

    fn on_upload(&self, id: FileId, name: &str) -> Result<()> {
        self.emit(UploadEvent::Started {
            id,
            name: name.to_string(),
        })
    }

    fn on_upload_chunk(&self, id: FileId, name: &str, chunk: &ChunkCallbackData) -> Result<()> {
        self.emit(UploadEvent::ChunkStarted {
            id,
            name: name.to_string(),
            chunk: *chunk,
        })
    }

    fn on_resume(&self, id: FileId, name: &str, chunk: &ChunkCallbackData) -> Result<bool> {
        self.emit(UploadEvent::Resumed {
            id,
            name: name.to_string(),
            part_index: chunk.part_index,
        })?;
        Ok(true)
    }

    fn on_progress(&self, id: FileId, name: &str, loaded: u64, total: u64) -> Result<()> {
        self.emit(UploadEvent::Progress {
            id,
            name: name.to_string(),
            loaded,
            total,
        })
    }

    fn on_complete(
        &self,
        id: FileId,
        name: &str,
        response: &UploadResponse,
        status: u16,
    ) -> Result<()> {
        self.emit(UploadEvent::Completed {
            id,
            name: name.to_string(),
            success: response.is_success(),
            status,
            response: Value::Object(response.as_map().clone()),
        })
    }

    fn on_cancel(&self, id: FileId, name: &str) -> Result<()> {
        self.emit(UploadEvent::Cancelled {
            id,
            name: name.to_string(),
        })
    }

    fn on_error(&self, id: Option<FileId>, name: &str, reason: &str) -> Result<()> {
        self.emit(UploadEvent::Error {
            id,
            name: name.to_string(),
            reason: reason.to_string(),
        })
    }

    fn on_auto_retry(&self, id: FileId, name: &str, attempt: u32) -> Result<()> {
        self.emit(UploadEvent::AutoRetry {
            id,
            name: name.to_string(),
            attempt,
        })
    }

    fn on_delete(&self, id: FileId) -> Result<()> {
        self.emit(UploadEvent::DeleteStarted { id })
    }

    fn on_delete_complete(&self, id: FileId, status: u16, is_error: bool) -> Result<()> {
        self.emit(UploadEvent::DeleteCompleted {
            id,
            status,
            is_error,
        })
    }
}
