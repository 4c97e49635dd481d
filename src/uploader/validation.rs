// 提交前的文件校验
//
// 校验失败的文件不会进入上传队列，错误通过独立的校验回调报告

use crate::config::ValidationConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 单位符号
const SIZE_SYMBOLS: [&str; 6] = ["kB", "MB", "GB", "TB", "PB", "EB"];

/// 交给校验回调的文件描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    /// 大小未知时为 `None`
    pub size: Option<u64>,
    pub is_blob: bool,
}

/// 校验错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationErrorKind {
    TypeError,
    SizeError,
    MinSizeError,
    EmptyError,
    NoFilesError,
}

/// 校验错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{file} 的扩展名无效，允许的扩展名: {extensions}")]
    InvalidExtension { file: String, extensions: String },

    #[error("{file} 过大，最大文件大小为 {limit}")]
    TooLarge { file: String, limit: String },

    #[error("{file} 过小，最小文件大小为 {limit}")]
    TooSmall { file: String, limit: String },

    #[error("{file} 为空，请去掉该文件后重新选择")]
    Empty { file: String },

    #[error("没有可上传的文件")]
    NoFiles,
}

impl ValidationError {
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            ValidationError::InvalidExtension { .. } => ValidationErrorKind::TypeError,
            ValidationError::TooLarge { .. } => ValidationErrorKind::SizeError,
            ValidationError::TooSmall { .. } => ValidationErrorKind::MinSizeError,
            ValidationError::Empty { .. } => ValidationErrorKind::EmptyError,
            ValidationError::NoFiles => ValidationErrorKind::NoFilesError,
        }
    }

    /// 出错的文件名（显示用的缩写形式）
    pub fn file_name(&self) -> Option<&str> {
        match self {
            ValidationError::InvalidExtension { file, .. }
            | ValidationError::TooLarge { file, .. }
            | ValidationError::TooSmall { file, .. }
            | ValidationError::Empty { file } => Some(file),
            ValidationError::NoFiles => None,
        }
    }
}

/// 格式化文件大小，如 `1.9MB`
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut index = 0;
    value /= 1024.0;
    while value > 99.0 && index < SIZE_SYMBOLS.len() - 1 {
        value /= 1024.0;
        index += 1;
    }
    format!("{:.1}{}", value.max(0.1), SIZE_SYMBOLS[index])
}

/// 缩短过长的文件名
pub fn format_file_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() > 33 {
        let head: String = chars[..19].iter().collect();
        let tail: String = chars[chars.len() - 14..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        name.to_string()
    }
}

/// 文件校验器
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn stop_on_first_invalid(&self) -> bool {
        self.config.stop_on_first_invalid_file
    }

    /// 扩展名是否允许（大小写不敏感）
    pub fn is_allowed_extension(&self, name: &str) -> bool {
        if self.config.allowed_extensions.is_empty() {
            return true;
        }
        let name = name.to_lowercase();
        self.config
            .allowed_extensions
            .iter()
            .any(|ext| name.ends_with(&format!(".{}", ext.trim_start_matches('.').to_lowercase())))
    }

    /// 校验单个文件，Blob 不检查扩展名
    pub fn validate(&self, file: &FileDescriptor) -> Result<(), ValidationError> {
        let display_name = format_file_name(&file.name);

        if !file.is_blob && !self.is_allowed_extension(&file.name) {
            return Err(ValidationError::InvalidExtension {
                file: display_name,
                extensions: self.config.allowed_extensions.join(", ").to_lowercase(),
            });
        }

        let size = match file.size {
            Some(size) => size,
            None => return Ok(()),
        };

        if size == 0 {
            return Err(ValidationError::Empty { file: display_name });
        }
        if self.config.size_limit > 0 && size > self.config.size_limit {
            return Err(ValidationError::TooLarge {
                file: display_name,
                limit: format_size(self.config.size_limit),
            });
        }
        if size < self.config.min_size_limit {
            return Err(ValidationError::TooSmall {
                file: display_name,
                limit: format_size(self.config.min_size_limit),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> FileDescriptor {
        FileDescriptor {
            name: name.to_string(),
            size: Some(size),
            is_blob: false,
        }
    }

    fn validator(extensions: &[&str], size_limit: u64, min_size_limit: u64) -> Validator {
        Validator::new(ValidationConfig {
            allowed_extensions: extensions.iter().map(|s| s.to_string()).collect(),
            size_limit,
            min_size_limit,
            stop_on_first_invalid_file: true,
        })
    }

    #[test]
    fn test_extension_case_insensitive() {
        let v = validator(&["jpg", "PNG"], 0, 0);
        assert!(v.validate(&file("a.JPG", 1)).is_ok());
        assert!(v.validate(&file("b.png", 1)).is_ok());

        let err = v.validate(&file("c.gif", 1)).unwrap_err();
        assert_eq!(err.kind(), ValidationErrorKind::TypeError);
        assert!(err.to_string().contains("jpg, png"));
    }

    #[test]
    fn test_blob_skips_extension_check() {
        let v = validator(&["jpg"], 0, 0);
        let blob = FileDescriptor {
            name: "Misc data".to_string(),
            size: Some(10),
            is_blob: true,
        };
        assert!(v.validate(&blob).is_ok());
    }

    #[test]
    fn test_size_rules() {
        let v = validator(&[], 1000, 10);
        assert_eq!(
            v.validate(&file("a", 0)).unwrap_err().kind(),
            ValidationErrorKind::EmptyError
        );
        assert_eq!(
            v.validate(&file("a", 1001)).unwrap_err().kind(),
            ValidationErrorKind::SizeError
        );
        assert_eq!(
            v.validate(&file("a", 9)).unwrap_err().kind(),
            ValidationErrorKind::MinSizeError
        );
        assert!(v.validate(&file("a", 1000)).is_ok());

        let unknown = FileDescriptor {
            name: "a".to_string(),
            size: None,
            is_blob: false,
        };
        assert!(v.validate(&unknown).is_ok());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(2_000_000), "1.9MB");
        assert_eq!(format_size(1024), "1.0kB");
        assert_eq!(format_size(10), "0.1kB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0GB");
    }

    #[test]
    fn test_format_file_name() {
        assert_eq!(format_file_name("short.txt"), "short.txt");
        let long = "a_very_long_file_name_that_keeps_going.tar.gz";
        let formatted = format_file_name(long);
        assert_eq!(formatted, "a_very_long_file_na...s_going.tar.gz");
    }
}
