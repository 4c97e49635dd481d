//! 断点续传持久化模块
//!
//! - `checkpoint`: 检查点键/值的编码与解析
//! - `store`: 存储介质（内存 / JSON 文件），带过期时间
//! - `resume`: 上传状态机使用的续传存储
//!
//! ## 文件结构
//!
//! ```text
//! {resume.store_path}     # 全部检查点（JSON 格式）
//! ```

pub mod checkpoint;
pub mod resume;
pub mod store;

pub use checkpoint::{CheckpointKey, ResumableFile, ResumeCheckpoint};
pub use resume::{ResumeStore, DEFAULT_EXPIRE_DAYS};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
