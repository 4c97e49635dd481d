// 按文件覆盖的请求设置（参数、地址）

use crate::uploader::FileId;
use std::collections::HashMap;

/// 默认值 + 按文件 ID 的覆盖值
#[derive(Debug, Clone)]
pub struct OverrideStore<T> {
    default: T,
    overrides: HashMap<FileId, T>,
}

impl<T: Clone> OverrideStore<T> {
    pub fn new(default: T) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// 获取文件使用的值
    pub fn get(&self, id: FileId) -> T {
        self.overrides
            .get(&id)
            .unwrap_or(&self.default)
            .clone()
    }

    /// 设置值，`id` 为 `None` 时替换默认值
    pub fn set(&mut self, value: T, id: Option<FileId>) {
        match id {
            Some(id) => {
                self.overrides.insert(id, value);
            }
            None => self.default = value,
        }
    }

    pub fn remove(&mut self, id: FileId) {
        self.overrides.remove(&id);
    }

    /// 清除所有覆盖值，默认值保留
    pub fn reset(&mut self) {
        self.overrides.clear();
    }
}
