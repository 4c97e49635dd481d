// Resumable Uploader Library
// 分片/断点续传 HTTP 上传核心库

// 配置管理模块
pub mod config;

// 错误类型
pub mod error;

// 日志系统
pub mod logging;

// 断点续传记录持久化
pub mod persistence;

// 通用请求队列与删除请求
pub mod requester;

// HTTP 传输层
pub mod transport;

// 上传引擎模块
pub mod uploader;

#[cfg(test)]
mod testing;

// 导出常用类型
pub use config::{AppConfig, UploadConfig};
pub use error::UploadError;
pub use persistence::{FileCheckpointStore, MemoryCheckpointStore, ResumableFile, ResumeStore};
pub use transport::{HttpTransport, Transport, TransportRequest, TransportResponse};
pub use uploader::{
    BlobData, EventForwarder, FileId, NoopCallbacks, UploadCallbacks, UploadEngine, UploadEvent,
    UploadResponse, UploadStatus,
};
