// 上传错误类型
//
// 单个文件的失败只影响该文件，引擎本身没有“崩溃”状态

use crate::uploader::FileId;
use thiserror::Error;

/// 上传过程中的错误分类
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// 服务器响应无法解析为 JSON（按空结果的失败响应处理）
    #[error("无法解析服务器响应: {0}")]
    Parse(String),

    /// 服务器要求重置整个分片上传
    #[error("服务器要求从第一个分片重新上传")]
    ResetRequested,

    /// 状态码不在成功集合内，或响应未声明 success
    #[error("上传请求失败: 状态码 {status}")]
    Transport { status: u16 },

    /// 自动重试策略放弃重试，作为最终失败上报
    #[error("自动重试已放弃")]
    AutoRetryDeclined,

    /// 文件已上传完成，不能再次上传
    #[error("文件已上传完成: {0}")]
    AlreadyCompleted(FileId),

    /// 无效的文件 ID
    #[error("无效的文件 ID: {0}")]
    InvalidId(FileId),

    /// 传入的文件/Blob 描述不合法
    #[error("不是有效的文件或 Blob 描述: {0}")]
    InvalidDescriptor(String),
}

impl UploadError {
    /// 是否为服务器发起的重置
    pub fn is_reset(&self) -> bool {
        matches!(self, UploadError::ResetRequested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UploadError::Transport { status: 500 };
        assert!(err.to_string().contains("500"));
        assert!(UploadError::ResetRequested.is_reset());
        assert!(!UploadError::AutoRetryDeclined.is_reset());
        assert_eq!(
            UploadError::InvalidId(FileId(7)).to_string(),
            "无效的文件 ID: 7"
        );
    }
}
