// 上传回调
//
// 每个回调都可能失败：错误只记录日志，并以默认值代替返回值，
// 不会中断上传流程

use super::chunk::ChunkCallbackData;
use super::response::UploadResponse;
use super::task::FileId;
use super::validation::{FileDescriptor, ValidationError};
use anyhow::Result;
use tracing::error;

/// 上传回调
///
/// 返回 `bool` 的回调中，`false` 表示否决对应操作
#[allow(unused_variables)]
pub trait UploadCallbacks: Send + Sync {
    /// 文件已分配 ID，返回 false 放弃提交
    fn on_submit(&self, id: FileId, name: &str) -> Result<bool> {
        Ok(true)
    }

    /// 整批校验，返回 false 放弃整批
    fn on_validate_batch(&self, files: &[FileDescriptor]) -> Result<bool> {
        Ok(true)
    }

    /// 单个文件校验，返回 false 跳过该文件
    fn on_validate(&self, file: &FileDescriptor) -> Result<bool> {
        Ok(true)
    }

    fn on_validation_error(&self, error: &ValidationError) -> Result<()> {
        Ok(())
    }

    fn on_upload(&self, id: FileId, name: &str) -> Result<()> {
        Ok(())
    }

    fn on_upload_chunk(&self, id: FileId, name: &str, chunk: &ChunkCallbackData) -> Result<()> {
        Ok(())
    }

    /// 找到可用的续传数据，返回 false 从头上传
    fn on_resume(&self, id: FileId, name: &str, chunk: &ChunkCallbackData) -> Result<bool> {
        Ok(true)
    }

    fn on_progress(&self, id: FileId, name: &str, loaded: u64, total: u64) -> Result<()> {
        Ok(())
    }

    /// 上传结束（成功或最终失败），`status` 为 0 表示没有收到 HTTP 响应
    fn on_complete(
        &self,
        id: FileId,
        name: &str,
        response: &UploadResponse,
        status: u16,
    ) -> Result<()> {
        Ok(())
    }

    fn on_cancel(&self, id: FileId, name: &str) -> Result<()> {
        Ok(())
    }

    /// 上传或删除失败，`id` 为 `None` 时与具体文件无关
    fn on_error(&self, id: Option<FileId>, name: &str, reason: &str) -> Result<()> {
        Ok(())
    }

    /// 即将进行第 `attempt` 次自动重试
    fn on_auto_retry(&self, id: FileId, name: &str, attempt: u32) -> Result<()> {
        Ok(())
    }

    /// 手动重试，返回 false 否决
    fn on_manual_retry(&self, id: FileId, name: &str) -> Result<bool> {
        Ok(true)
    }

    /// 提交删除请求前调用，返回 false 取消删除
    fn on_submit_delete(&self, id: FileId) -> Result<bool> {
        Ok(true)
    }

    fn on_delete(&self, id: FileId) -> Result<()> {
        Ok(())
    }

    fn on_delete_complete(&self, id: FileId, status: u16, is_error: bool) -> Result<()> {
        Ok(())
    }
}

/// 不做任何处理的回调
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl UploadCallbacks for NoopCallbacks {}

/// 执行回调结果：出错时记录日志并返回 `fallback`
pub fn guard<T>(name: &str, result: Result<T>, fallback: T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            error!("回调 '{}' 执行出错: {:#}", name, e);
            fallback
        }
    }
}
