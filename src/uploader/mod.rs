// 上传引擎模块
//
// - 单一所有者的引擎持有全部状态，网络请求在后台任务中执行
// - 请求结果通过消息通道回到引擎，由 RequestToken 丢弃过期消息
// - 支持分片上传、断点续传、自动/手动重试、删除已上传文件

pub mod callbacks;
pub mod chunk;
pub mod engine;
pub mod events;
pub mod handler;
pub mod request;
pub mod response;
pub mod retry;
pub mod task;
pub mod validation;

pub use callbacks::{NoopCallbacks, UploadCallbacks};
pub use chunk::{ChunkCallbackData, ChunkDescriptor, ChunkPlanner, DEFAULT_CHUNK_SIZE};
pub use engine::UploadEngine;
pub use events::{EventForwarder, UploadEvent};
pub use handler::{EngineMessage, ResponseOutcome, UploadHandler};
pub use request::{PayloadEncoding, UploadRequestBuilder, UploadRequestPlan};
pub use response::{UploadResponse, UPLOAD_SUCCESS_STATUS};
pub use retry::AutoRetryState;
pub use task::{
    BlobData, FileId, FileRecord, LocalFile, RequestToken, TransferMode, UploadSource,
    UploadStatus,
};
pub use validation::{FileDescriptor, ValidationError, ValidationErrorKind, Validator};
