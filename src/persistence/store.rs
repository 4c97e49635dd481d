//! 检查点存储介质
//!
//! 存储只认识字符串键值和过期时间，检查点的编码/解析在上层完成
//!
//! ## 文件格式
//!
//! `FileCheckpointStore` 把全部条目保存为一个 JSON 文件：
//! ```json
//! {
//!   "qqfilechunk|a.bin|5000000|2000000": {
//!     "value": "uuid|1|2000206|206|5000618",
//!     "expires_at": "2025-12-12T00:00:00Z"
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// 存储接口
pub trait CheckpointStore: Send {
    /// 写入（覆盖）条目，`expire_days` 天后失效
    fn set(&mut self, name: &str, value: &str, expire_days: u32) -> Result<()>;

    /// 读取未过期的条目
    fn get(&self, name: &str) -> Option<String>;

    /// 删除条目，条目不存在不算错误
    fn remove(&mut self, name: &str) -> Result<()>;

    /// 所有未过期条目的键
    fn names(&self) -> Vec<String>;
}

/// 单个存储条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn new(value: &str, expire_days: u32) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Utc::now() + Duration::days(i64::from(expire_days)),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

fn live_names(entries: &HashMap<String, StoredEntry>) -> Vec<String> {
    let mut names: Vec<String> = entries
        .iter()
        .filter(|(_, entry)| !entry.is_expired())
        .map(|(name, _)| name.clone())
        .collect();
    names.sort();
    names
}

/// 内存存储（进程退出即丢失）
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: HashMap<String, StoredEntry>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn set(&mut self, name: &str, value: &str, expire_days: u32) -> Result<()> {
        self.entries
            .insert(name.to_string(), StoredEntry::new(value, expire_days));
        Ok(())
    }

    fn get(&self, name: &str) -> Option<String> {
        self.entries
            .get(name)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        self.entries.remove(name);
        Ok(())
    }

    fn names(&self) -> Vec<String> {
        live_names(&self.entries)
    }
}

/// 文件存储
///
/// 条目常驻内存，每次修改后整体写回磁盘
#[derive(Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
    entries: HashMap<String, StoredEntry>,
}

impl FileCheckpointStore {
    /// 打开存储文件，文件不存在时从空存储开始，过期条目在加载时丢弃
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut entries = if path.exists() {
            load_entries(&path)?
        } else {
            HashMap::new()
        };

        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        if entries.len() != before {
            debug!("已丢弃 {} 个过期续传条目", before - entries.len());
        }

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("创建续传数据目录失败: {:?}", parent))?;
            }
        }

        // 先写临时文件再原子重命名
        let temp_path = self.path.with_extension("json.tmp");
        let file = File::create(&temp_path)
            .with_context(|| format!("创建临时文件失败: {:?}", temp_path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.entries).context("序列化续传数据失败")?;
        writer.flush()?;
        drop(writer);

        fs::rename(&temp_path, &self.path)
            .with_context(|| format!("保存续传数据失败: {:?}", self.path))?;
        Ok(())
    }
}

fn load_entries(path: &Path) -> Result<HashMap<String, StoredEntry>> {
    let file = File::open(path).with_context(|| format!("打开续传数据失败: {:?}", path))?;
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(entries) => Ok(entries),
        Err(e) => {
            warn!("续传数据文件损坏，已忽略 {:?}: {}", path, e);
            Ok(HashMap::new())
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn set(&mut self, name: &str, value: &str, expire_days: u32) -> Result<()> {
        self.entries
            .insert(name.to_string(), StoredEntry::new(value, expire_days));
        self.save()
    }

    fn get(&self, name: &str) -> Option<String> {
        self.entries
            .get(name)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        if self.entries.remove(name).is_some() {
            self.save()?;
        }
        Ok(())
    }

    fn names(&self) -> Vec<String> {
        live_names(&self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store() {
        let mut store = MemoryCheckpointStore::new();
        store.set("a", "1", 7).unwrap();
        store.set("b", "2", 7).unwrap();
        assert_eq!(store.get("a").as_deref(), Some("1"));
        assert_eq!(store.names(), vec!["a".to_string(), "b".to_string()]);

        store.set("a", "3", 7).unwrap();
        assert_eq!(store.get("a").as_deref(), Some("3"));

        store.remove("a").unwrap();
        assert!(store.get("a").is_none());
        store.remove("missing").unwrap();
    }

    #[test]
    fn test_zero_days_expires_immediately() {
        let mut store = MemoryCheckpointStore::new();
        store.set("a", "1", 0).unwrap();
        assert!(store.get("a").is_none());
        assert!(store.names().is_empty());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resume").join("checkpoints.json");

        {
            let mut store = FileCheckpointStore::open(&path).unwrap();
            store.set("qqfilechunk|a.bin|10|4", "u|1|4|0|10", 7).unwrap();
            store.set("gone", "x", 0).unwrap();
        }

        let store = FileCheckpointStore::open(&path).unwrap();
        assert_eq!(
            store.get("qqfilechunk|a.bin|10|4").as_deref(),
            Some("u|1|4|0|10")
        );
        assert_eq!(store.names(), vec!["qqfilechunk|a.bin|10|4".to_string()]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoints.json");
        fs::write(&path, "not json").unwrap();

        let store = FileCheckpointStore::open(&path).unwrap();
        assert!(store.names().is_empty());
    }
}
