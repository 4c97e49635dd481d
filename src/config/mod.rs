// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 全局最大并发请求数（默认 3）
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// 提交后立即上传；关闭时文件暂存，等待 upload_stored_files
    #[serde(default = "default_true")]
    pub auto_upload: bool,
    /// 演示模式：上传与删除请求都改用 GET
    #[serde(default)]
    pub demo_mode: bool,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub resume: ResumeConfig,
    #[serde(default)]
    pub delete_file: DeleteFileConfig,
    #[serde(default)]
    pub blobs: BlobsConfig,
}

fn default_max_connections() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    "/server/upload".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            auto_upload: true,
            demo_mode: false,
            request: RequestConfig::default(),
            validation: ValidationConfig::default(),
            retry: RetryConfig::default(),
            chunking: ChunkingConfig::default(),
            resume: ResumeConfig::default(),
            delete_file: DeleteFileConfig::default(),
            blobs: BlobsConfig::default(),
        }
    }
}

/// 上传请求配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// 上传地址
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// 每个请求附带的参数
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// 参数放在请求体（multipart 字段）而不是查询字符串
    #[serde(default = "default_true")]
    pub params_in_body: bool,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    /// 总是使用 multipart 编码
    #[serde(default = "default_true")]
    pub force_multipart: bool,
    #[serde(default = "default_input_name")]
    pub input_name: String,
    #[serde(default = "default_uuid_name")]
    pub uuid_name: String,
    #[serde(default = "default_total_file_size_name")]
    pub total_file_size_name: String,
}

fn default_input_name() -> String {
    "qqfile".to_string()
}

fn default_uuid_name() -> String {
    "qquuid".to_string()
}

fn default_total_file_size_name() -> String {
    "qqtotalfilesize".to_string()
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            params: BTreeMap::new(),
            params_in_body: true,
            custom_headers: BTreeMap::new(),
            force_multipart: true,
            input_name: default_input_name(),
            uuid_name: default_uuid_name(),
            total_file_size_name: default_total_file_size_name(),
        }
    }
}

/// 文件校验配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// 允许的扩展名（不含点，大小写不敏感），空表示不限制
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    /// 最大文件大小（字节），0 表示不限制
    #[serde(default)]
    pub size_limit: u64,
    /// 最小文件大小（字节），0 表示不限制
    #[serde(default)]
    pub min_size_limit: u64,
    /// 遇到第一个不合法文件时放弃整批
    #[serde(default = "default_true")]
    pub stop_on_first_invalid_file: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: Vec::new(),
            size_limit: 0,
            min_size_limit: 0,
            stop_on_first_invalid_file: true,
        }
    }
}

/// 自动重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub enable_auto: bool,
    #[serde(default = "default_max_auto_attempts")]
    pub max_auto_attempts: u32,
    /// 两次自动重试之间的间隔（秒）
    #[serde(default = "default_auto_attempt_delay_secs")]
    pub auto_attempt_delay_secs: u64,
    /// 响应中该属性为 true 时禁止任何重试
    #[serde(default = "default_prevent_retry_property")]
    pub prevent_retry_response_property: String,
}

fn default_max_auto_attempts() -> u32 {
    3
}

fn default_auto_attempt_delay_secs() -> u64 {
    5
}

fn default_prevent_retry_property() -> String {
    "preventRetry".to_string()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enable_auto: false,
            max_auto_attempts: default_max_auto_attempts(),
            auto_attempt_delay_secs: default_auto_attempt_delay_secs(),
            prevent_retry_response_property: default_prevent_retry_property(),
        }
    }
}

/// 分片上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// 分片大小（字节，默认 2,000,000）
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    #[serde(default)]
    pub param_names: ChunkingParamNames,
}

fn default_part_size() -> u64 {
    crate::uploader::chunk::DEFAULT_CHUNK_SIZE
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            part_size: default_part_size(),
            param_names: ChunkingParamNames::default(),
        }
    }
}

/// 分片请求的参数名
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingParamNames {
    #[serde(default = "default_part_index_name")]
    pub part_index: String,
    #[serde(default = "default_part_byte_offset_name")]
    pub part_byte_offset: String,
    #[serde(default = "default_chunk_size_name")]
    pub chunk_size: String,
    #[serde(default = "default_total_file_size_name")]
    pub total_file_size: String,
    #[serde(default = "default_total_parts_name")]
    pub total_parts: String,
    #[serde(default = "default_filename_name")]
    pub filename: String,
}

fn default_part_index_name() -> String {
    "qqpartindex".to_string()
}

fn default_part_byte_offset_name() -> String {
    "qqpartbyteoffset".to_string()
}

fn default_chunk_size_name() -> String {
    "qqchunksize".to_string()
}

fn default_total_parts_name() -> String {
    "qqtotalparts".to_string()
}

fn default_filename_name() -> String {
    "qqfilename".to_string()
}

impl Default for ChunkingParamNames {
    fn default() -> Self {
        Self {
            part_index: default_part_index_name(),
            part_byte_offset: default_part_byte_offset_name(),
            chunk_size: default_chunk_size_name(),
            total_file_size: default_total_file_size_name(),
            total_parts: default_total_parts_name(),
            filename: default_filename_name(),
        }
    }
}

/// 断点续传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeConfig {
    /// 仅在分片上传启用时生效
    #[serde(default)]
    pub enabled: bool,
    /// 续传会话区分符，写入检查点键
    #[serde(default)]
    pub id: Option<String>,
    /// 检查点过期天数（默认 7 天）
    #[serde(default = "default_resume_expire_days")]
    pub expire_days: u32,
    #[serde(default = "default_resuming_param_name")]
    pub resuming_param_name: String,
    /// 检查点文件路径，未配置时只保存在内存中
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_resume_expire_days() -> u32 {
    crate::persistence::DEFAULT_EXPIRE_DAYS
}

fn default_resuming_param_name() -> String {
    "qqresume".to_string()
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            id: None,
            expire_days: default_resume_expire_days(),
            resuming_param_name: default_resuming_param_name(),
            store_path: None,
        }
    }
}

/// 删除文件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFileConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl Default for DeleteFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            custom_headers: BTreeMap::new(),
            params: BTreeMap::new(),
        }
    }
}

/// Blob 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobsConfig {
    /// 未命名 Blob 的默认名称
    #[serde(default = "default_blob_name")]
    pub default_name: String,
    #[serde(default = "default_blob_name_param")]
    pub name_param: String,
}

fn default_blob_name() -> String {
    "Misc data".to_string()
}

fn default_blob_name_param() -> String {
    "qqblobname".to_string()
}

impl Default for BlobsConfig {
    fn default() -> Self {
        Self {
            default_name: default_blob_name(),
            name_param: default_blob_name_param(),
        }
    }
}

impl UploadConfig {
    /// 检查配置是否可用
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            anyhow::bail!("max_connections 必须大于 0");
        }
        if self.chunking.part_size == 0 {
            anyhow::bail!("chunking.part_size 必须大于 0");
        }
        if self.request.endpoint.trim().is_empty() {
            anyhow::bail!("request.endpoint 不能为空");
        }
        if self.delete_file.enabled && self.delete_file.endpoint.trim().is_empty() {
            anyhow::bail!("delete_file.endpoint 不能为空");
        }
        if self.validation.size_limit > 0 && self.validation.min_size_limit > self.validation.size_limit
        {
            anyhow::bail!(
                "validation.min_size_limit ({}) 大于 size_limit ({})",
                self.validation.min_size_limit,
                self.validation.size_limit
            );
        }
        Ok(())
    }

    /// 续传实际生效（需要同时启用分片）
    pub fn resume_active(&self) -> bool {
        self.chunking.enabled && self.resume.enabled
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config.upload.validate().context("配置文件中的上传配置验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.upload
            .validate()
            .context("保存配置失败：上传配置无效")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        }
    }
}
