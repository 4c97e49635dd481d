// 上传分片规划
//
// 纯计算：根据文件大小和配置的分片大小推导分片边界
// 分片描述不持久化，每次都由 (文件大小, 分片大小) 重新计算
//
// 规则：
// - 分片数 = ceil(文件大小 / 分片大小)
// - 每个分片大小 <= 分片大小，最后一个分片可以更短
// - 所有分片大小之和 == 文件大小

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// 默认分片大小: 2,000,000 字节
pub const DEFAULT_CHUNK_SIZE: u64 = 2_000_000;

/// 计算分片总数
///
/// 调用方保证 `chunk_size > 0`
pub fn total_chunks(file_size: u64, chunk_size: u64) -> usize {
    debug_assert!(chunk_size > 0, "分片大小必须大于 0");
    file_size.div_ceil(chunk_size) as usize
}

/// 获取指定索引的分片
pub fn chunk_at(index: usize, file_size: u64, chunk_size: u64) -> ChunkDescriptor {
    let start = (index as u64).saturating_mul(chunk_size).min(file_size);
    let end = start.saturating_add(chunk_size).min(file_size);
    ChunkDescriptor {
        part: index,
        start,
        end,
        count: total_chunks(file_size, chunk_size),
    }
}

/// 分片描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// 分片索引（从 0 开始）
    pub part: usize,
    /// 起始字节（含）
    pub start: u64,
    /// 结束字节（不含）
    pub end: u64,
    /// 文件的分片总数
    pub count: usize,
}

impl ChunkDescriptor {
    /// 分片大小
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// 字节范围
    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }

    /// 转换为回调使用的描述（起始字节从 1 开始计数）
    pub fn to_callback_data(&self) -> ChunkCallbackData {
        ChunkCallbackData {
            part_index: self.part,
            start_byte: self.start + 1,
            end_byte: self.end,
            total_parts: self.count,
        }
    }
}

/// 交给外部回调的分片信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkCallbackData {
    pub part_index: usize,
    /// 1-based
    pub start_byte: u64,
    pub end_byte: u64,
    pub total_parts: usize,
}

/// 分片规划器
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    chunk_size: u64,
}

impl ChunkPlanner {
    /// 创建分片规划器，分片大小为 0 时回退到默认值
    pub fn new(chunk_size: u64) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self { chunk_size }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_chunks(&self, file_size: u64) -> usize {
        total_chunks(file_size, self.chunk_size)
    }

    pub fn chunk_at(&self, index: usize, file_size: u64) -> ChunkDescriptor {
        chunk_at(index, file_size, self.chunk_size)
    }

    /// 计算全部分片
    pub fn plan(&self, file_size: u64) -> Vec<ChunkDescriptor> {
        let count = self.total_chunks(file_size);
        let mut chunks = Vec::with_capacity(count);
        let mut offset = 0u64;
        let mut index = 0;

        while offset < file_size {
            let end = std::cmp::min(offset + self.chunk_size, file_size);
            chunks.push(ChunkDescriptor {
                part: index,
                start: offset,
                end,
                count,
            });
            offset = end;
            index += 1;
        }

        chunks
    }
}

impl Default for ChunkPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_chunk_calculation() {
        let planner = ChunkPlanner::new(2_000_000);
        let chunks = planner.plan(5_000_000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].range(), 0..2_000_000);
        assert_eq!(chunks[1].range(), 2_000_000..4_000_000);
        assert_eq!(chunks[2].range(), 4_000_000..5_000_000);
        assert_eq!(chunks[2].size(), 1_000_000);
        assert!(chunks.iter().all(|c| c.count == 3));
    }

    #[test]
    fn test_exact_multiple() {
        assert_eq!(total_chunks(16 * 1024, 4 * 1024), 4);
        let last = chunk_at(3, 16 * 1024, 4 * 1024);
        assert_eq!(last.range(), (12 * 1024)..(16 * 1024));
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        assert_eq!(total_chunks(0, 1024), 0);
        assert!(ChunkPlanner::new(1024).plan(0).is_empty());
    }

    #[test]
    fn test_callback_data_is_one_based() {
        let data = chunk_at(1, 5_000_000, 2_000_000).to_callback_data();
        assert_eq!(data.part_index, 1);
        assert_eq!(data.start_byte, 2_000_001);
        assert_eq!(data.end_byte, 4_000_000);
        assert_eq!(data.total_parts, 3);
    }

    #[test]
    fn test_zero_chunk_size_falls_back() {
        assert_eq!(ChunkPlanner::new(0).chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    proptest! {
        #[test]
        fn prop_chunks_cover_file(file_size in 0u64..50_000_000, chunk_size in 1u64..5_000_000) {
            let planner = ChunkPlanner::new(chunk_size);
            let chunks = planner.plan(file_size);
            let expected = file_size.div_ceil(chunk_size) as usize;

            prop_assert_eq!(chunks.len(), expected);
            prop_assert_eq!(chunks.iter().map(|c| c.size()).sum::<u64>(), file_size);
            prop_assert!(chunks.iter().all(|c| c.size() <= chunk_size));

            if let Some(last) = chunks.last() {
                prop_assert_eq!(last.size(), file_size - chunk_size * (expected as u64 - 1));
            }
            for (i, c) in chunks.iter().enumerate() {
                prop_assert_eq!(*c, chunk_at(i, file_size, chunk_size));
            }
        }
    }
}
