//! 断点续传检查点
//!
//! ## 键格式
//!
//! ```text
//! qqfilechunk|{编码后的文件名}|{文件大小}|{分片大小}[|{编码后的续传会话ID}]
//! ```
//!
//! ## 值格式
//!
//! ```text
//! {传输ID}|{分片索引}|{已确认字节数}|{首个请求开销}|{预估请求总大小}
//! ```
//!
//! 未知的数值字段写为空字符串。字段数量不等于 5 的值一律丢弃，不做部分恢复

use serde::{Deserialize, Serialize};
use tracing::warn;

/// 键前缀
pub const CHECKPOINT_KEY_PREFIX: &str = "qqfilechunk";

/// 键/值分隔符
pub const CHECKPOINT_DELIMITER: char = '|';

/// 值字段数量
const CHECKPOINT_FIELD_COUNT: usize = 5;

/// 检查点键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKey {
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    /// 续传会话区分符
    pub resume_id: Option<String>,
}

impl CheckpointKey {
    pub fn new(
        file_name: impl Into<String>,
        file_size: u64,
        chunk_size: u64,
        resume_id: Option<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            chunk_size,
            resume_id,
        }
    }

    /// 编码为存储键
    pub fn encode(&self) -> String {
        let mut key = format!(
            "{prefix}{d}{name}{d}{size}{d}{chunk}",
            prefix = CHECKPOINT_KEY_PREFIX,
            d = CHECKPOINT_DELIMITER,
            name = urlencoding::encode(&self.file_name),
            size = self.file_size,
            chunk = self.chunk_size,
        );
        if let Some(resume_id) = &self.resume_id {
            key.push(CHECKPOINT_DELIMITER);
            key.push_str(&urlencoding::encode(resume_id));
        }
        key
    }

    /// 从存储键解析文件名与大小（列出可续传文件时使用）
    pub fn decode_name_and_size(key: &str) -> Option<(String, u64)> {
        let mut parts = key.split(CHECKPOINT_DELIMITER);
        if parts.next()? != CHECKPOINT_KEY_PREFIX {
            return None;
        }
        let name = urlencoding::decode(parts.next()?).ok()?.into_owned();
        let size = parts.next()?.parse().ok()?;
        Some((name, size))
    }
}

/// 检查点内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeCheckpoint {
    /// 传输实例 ID
    pub uuid: String,
    /// 下一个待发送（最后一次派发）的分片索引
    pub part_index: usize,
    /// 已确认发送的字节数
    pub last_byte_sent: u64,
    /// 首个分片测得的请求开销
    pub initial_request_overhead: Option<i64>,
    /// 预估的全部请求总大小
    pub est_total_requests_size: Option<u64>,
}

impl ResumeCheckpoint {
    /// 编码为存储值
    pub fn encode(&self) -> String {
        let d = CHECKPOINT_DELIMITER;
        format!(
            "{}{d}{}{d}{}{d}{}{d}{}",
            self.uuid,
            self.part_index,
            self.last_byte_sent,
            optional_field(self.initial_request_overhead),
            optional_field(self.est_total_requests_size),
        )
    }

    /// 解析存储值
    ///
    /// 字段数量或数值格式不符时返回 `None` 并记录警告
    pub fn parse(value: &str, file_name: &str) -> Option<Self> {
        let sections: Vec<&str> = value.split(CHECKPOINT_DELIMITER).collect();
        if sections.len() != CHECKPOINT_FIELD_COUNT {
            warn!(
                "忽略 {} 的旧格式续传数据: 字段数={}",
                file_name,
                sections.len()
            );
            return None;
        }

        let parsed = (|| {
            Some(Self {
                uuid: non_empty(sections[0])?.to_string(),
                part_index: sections[1].parse().ok()?,
                last_byte_sent: sections[2].parse().ok()?,
                initial_request_overhead: parse_optional(sections[3])?,
                est_total_requests_size: parse_optional(sections[4])?,
            })
        })();

        if parsed.is_none() {
            warn!("忽略 {} 的损坏续传数据: {}", file_name, value);
        }
        parsed
    }
}

/// 可续传文件信息（跨会话重建文件列表用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumableFile {
    pub name: String,
    pub size: u64,
    pub uuid: String,
    pub part_index: usize,
}

fn optional_field<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// 空字段为 `Some(None)`，无法解析为 `None`
fn parse_optional<T: std::str::FromStr>(s: &str) -> Option<Option<T>> {
    if s.is_empty() {
        Some(None)
    } else {
        s.parse().ok().map(Some)
    }
}
