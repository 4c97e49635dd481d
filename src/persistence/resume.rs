// 断点续传存储
//
// 在存储介质之上编码/解析检查点
// 写入或删除失败只记录日志，不影响上传流程

use super::checkpoint::{CheckpointKey, ResumableFile, ResumeCheckpoint, CHECKPOINT_KEY_PREFIX};
use super::store::{CheckpointStore, MemoryCheckpointStore};
use anyhow::Result;
use regex::Regex;
use tracing::{debug, warn};

/// 默认过期天数
pub const DEFAULT_EXPIRE_DAYS: u32 = 7;

/// 断点续传存储
pub struct ResumeStore {
    store: Box<dyn CheckpointStore>,
    expire_days: u32,
}

impl std::fmt::Debug for ResumeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeStore")
            .field("expire_days", &self.expire_days)
            .field("entries", &self.store.names().len())
            .finish()
    }
}

impl ResumeStore {
    pub fn new(store: Box<dyn CheckpointStore>, expire_days: u32) -> Self {
        Self { store, expire_days }
    }

    /// 仅保存在内存中的存储
    pub fn in_memory(expire_days: u32) -> Self {
        Self::new(Box::new(MemoryCheckpointStore::new()), expire_days)
    }

    pub fn expire_days(&self) -> u32 {
        self.expire_days
    }

    /// 写入检查点，覆盖同键的旧值
    pub fn persist(&mut self, key: &CheckpointKey, checkpoint: &ResumeCheckpoint) {
        let name = key.encode();
        match self
            .store
            .set(&name, &checkpoint.encode(), self.expire_days)
        {
            Ok(()) => debug!(
                "已保存续传数据: {} (分片 {}, 已确认 {} 字节)",
                key.file_name, checkpoint.part_index, checkpoint.last_byte_sent
            ),
            Err(e) => warn!("保存续传数据失败: {}: {:#}", key.file_name, e),
        }
    }

    /// 读取检查点，格式不符时返回 `None`
    pub fn lookup(&self, key: &CheckpointKey) -> Option<ResumeCheckpoint> {
        let value = self.store.get(&key.encode())?;
        ResumeCheckpoint::parse(&value, &key.file_name)
    }

    pub fn delete(&mut self, key: &CheckpointKey) {
        if let Err(e) = self.store.remove(&key.encode()) {
            warn!("删除续传数据失败: {}: {:#}", key.file_name, e);
        }
    }

    /// 列出键匹配 `pattern` 的全部检查点
    pub fn list_all(&self, pattern: &Regex) -> Vec<ResumableFile> {
        self.store
            .names()
            .into_iter()
            .filter(|name| pattern.is_match(name))
            .filter_map(|name| {
                let (file_name, size) = CheckpointKey::decode_name_and_size(&name)?;
                let value = self.store.get(&name)?;
                let checkpoint = ResumeCheckpoint::parse(&value, &file_name)?;
                Some(ResumableFile {
                    name: file_name,
                    size,
                    uuid: checkpoint.uuid,
                    part_index: checkpoint.part_index,
                })
            })
            .collect()
    }

    /// 当前分片大小与续传会话下可续传的文件
    pub fn resumable_files(
        &self,
        chunk_size: u64,
        resume_id: Option<&str>,
    ) -> Result<Vec<ResumableFile>> {
        let pattern = resumable_pattern(chunk_size, resume_id)?;
        Ok(self.list_all(&pattern))
    }
}

/// 构造匹配指定分片大小（及续传会话）的键模式
pub fn resumable_pattern(chunk_size: u64, resume_id: Option<&str>) -> Result<Regex> {
    let suffix = match resume_id {
        Some(id) => format!(r"\|{}", regex::escape(&urlencoding::encode(id))),
        None => String::new(),
    };
    let pattern = format!(
        r"^{}\|[^|]+\|\d+\|{}{}$",
        regex::escape(CHECKPOINT_KEY_PREFIX),
        chunk_size,
        suffix
    );
    Ok(Regex::new(&pattern)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::store::FileCheckpointStore;
    use tempfile::TempDir;

    fn checkpoint(uuid: &str, part_index: usize) -> ResumeCheckpoint {
        ResumeCheckpoint {
            uuid: uuid.to_string(),
            part_index,
            last_byte_sent: 2_000_206,
            initial_request_overhead: Some(206),
            est_total_requests_size: Some(5_000_618),
        }
    }

    #[test]
    fn test_persist_and_lookup() {
        let mut store = ResumeStore::in_memory(DEFAULT_EXPIRE_DAYS);
        let key = CheckpointKey::new("a.bin", 5_000_000, 2_000_000, None);

        assert!(store.lookup(&key).is_none());
        store.persist(&key, &checkpoint("u-1", 1));
        assert_eq!(store.lookup(&key), Some(checkpoint("u-1", 1)));

        store.persist(&key, &checkpoint("u-1", 2));
        assert_eq!(store.lookup(&key).unwrap().part_index, 2);

        store.delete(&key);
        assert!(store.lookup(&key).is_none());
    }

    #[test]
    fn test_malformed_value_is_ignored() {
        let mut raw = MemoryCheckpointStore::new();
        let key = CheckpointKey::new("a.bin", 10, 4, None);
        raw.set(&key.encode(), "u-1|1|4", 7).unwrap();

        let store = ResumeStore::new(Box::new(raw), 7);
        assert!(store.lookup(&key).is_none());
    }

    #[test]
    fn test_key_includes_resume_id() {
        let mut store = ResumeStore::in_memory(7);
        let plain = CheckpointKey::new("a.bin", 10, 4, None);
        let session = CheckpointKey::new("a.bin", 10, 4, Some("s1".to_string()));

        store.persist(&session, &checkpoint("u-1", 1));
        assert!(store.lookup(&plain).is_none());
        assert!(store.lookup(&session).is_some());
    }

    #[test]
    fn test_resumable_files_filters_by_chunk_size_and_session() {
        let mut store = ResumeStore::in_memory(7);
        store.persist(
            &CheckpointKey::new("a b.bin", 5_000_000, 2_000_000, None),
            &checkpoint("u-a", 1),
        );
        store.persist(
            &CheckpointKey::new("c.bin", 5_000_000, 1_000_000, None),
            &checkpoint("u-c", 3),
        );
        store.persist(
            &CheckpointKey::new("d.bin", 42, 2_000_000, Some("s1".to_string())),
            &checkpoint("u-d", 0),
        );

        let files = store.resumable_files(2_000_000, None).unwrap();
        assert_eq!(
            files,
            vec![ResumableFile {
                name: "a b.bin".to_string(),
                size: 5_000_000,
                uuid: "u-a".to_string(),
                part_index: 1,
            }]
        );

        let files = store.resumable_files(2_000_000, Some("s1")).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "d.bin");
        assert_eq!(files[0].size, 42);
    }

    #[test]
    fn test_session_key_never_matches_plain_listing() {
        let mut store = ResumeStore::in_memory(7);
        // 会话 ID 恰好等于查询的分片大小
        store.persist(
            &CheckpointKey::new("x", 10, 4, Some("2000000".to_string())),
            &checkpoint("u-x", 0),
        );
        store.persist(
            &CheckpointKey::new("y", 10, 2_000_000, Some("a|b".to_string())),
            &checkpoint("u-y", 1),
        );

        assert!(store.resumable_files(2_000_000, None).unwrap().is_empty());
        assert!(store.resumable_files(4, None).unwrap().is_empty());

        let files = store.resumable_files(2_000_000, Some("a|b")).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "y");
        assert_eq!(files[0].size, 10);
        assert!(store.resumable_files(2_000_000, Some("a")).unwrap().is_empty());

        let files = store.resumable_files(4, Some("2000000")).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "x");
    }

    #[test]
    fn test_file_backed_store_resumes_across_sessions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoints.json");
        let key = CheckpointKey::new("a.bin", 5_000_000, 2_000_000, None);

        {
            let backend = FileCheckpointStore::open(&path).unwrap();
            let mut store = ResumeStore::new(Box::new(backend), 7);
            store.persist(&key, &checkpoint("u-1", 2));
        }

        let backend = FileCheckpointStore::open(&path).unwrap();
        let store = ResumeStore::new(Box::new(backend), 7);
        assert_eq!(store.lookup(&key), Some(checkpoint("u-1", 2)));
    }
}
