use anyhow::Context;
use resumable_uploader::{
    config::LogConfig, logging, AppConfig, EventForwarder, FileId, HttpTransport, UploadEngine,
    UploadEvent,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// 默认配置文件路径
const DEFAULT_CONFIG_PATH: &str = "config/uploader.toml";

/// 上传结果汇总
#[derive(Debug, Default)]
struct Summary {
    succeeded: Vec<String>,
    /// 失败文件 -> (文件名, 错误原因)
    failed: BTreeMap<FileId, (String, String)>,
    rejected: Vec<String>,
    cancelled: Vec<String>,
}

/// 解析命令行：`[--config <path>] <file>...`
fn parse_args() -> anyhow::Result<(String, Vec<PathBuf>)> {
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut files = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = args.next().context("--config 需要指定配置文件路径")?;
        } else {
            files.push(PathBuf::from(arg));
        }
    }

    if files.is_empty() {
        anyhow::bail!("用法: resumable-uploader [--config <path>] <file>...");
    }
    Ok((config_path, files))
}

/// 只读取日志配置，保证日志系统在加载完整配置前初始化
async fn load_log_config(path: &str) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(path).await {
        if let Ok(value) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = value.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }
    LogConfig::default()
}

/// 消费事件，打印进度并汇总结果
///
/// 最终失败时先收到 Completed，随后才是 Error
async fn collect_events(mut rx: mpsc::UnboundedReceiver<UploadEvent>) -> Summary {
    let mut summary = Summary::default();

    while let Some(event) = rx.recv().await {
        match event {
            UploadEvent::Progress {
                name, loaded, total, ..
            } if total > 0 => {
                println!("{}: {:.1}%", name, loaded as f64 * 100.0 / total as f64);
            }
            UploadEvent::AutoRetry { name, attempt, .. } => {
                println!("{}: 第 {} 次自动重试", name, attempt);
            }
            UploadEvent::ValidationFailed { message, .. } => summary.rejected.push(message),
            UploadEvent::Completed {
                id, name, success, ..
            } => {
                if success {
                    summary.succeeded.push(name);
                } else {
                    summary.failed.insert(id, (name, String::new()));
                }
            }
            UploadEvent::Error {
                id: Some(id),
                reason,
                ..
            } => {
                if let Some((_, slot)) = summary.failed.get_mut(&id) {
                    *slot = reason;
                }
            }
            UploadEvent::Error { id: None, reason, .. } => summary.rejected.push(reason),
            UploadEvent::Cancelled { name, .. } => summary.cancelled.push(name),
            _ => {}
        }
    }
    summary
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config_path, files) = parse_args()?;

    let log_config = load_log_config(&config_path).await;
    let _log_guard = logging::init_logging(&log_config);

    info!("resumable-uploader v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default(&config_path).await;
    info!("上传地址: {}", config.upload.request.endpoint);

    let transport = Arc::new(HttpTransport::new()?);
    let (forwarder, rx) = EventForwarder::channel();
    let collector = tokio::spawn(collect_events(rx));

    let mut engine = UploadEngine::new(config.upload, transport, Arc::new(forwarder))?;

    if let Ok(resumable) = engine.resumable_files() {
        for file in resumable {
            info!(
                "可续传: {} ({} 字节，从分片 {} 继续)",
                file.name, file.size, file.part_index
            );
        }
    }

    let ids = engine.add_files(files).await;
    info!("已提交 {} 个文件", ids.len());
    if !engine.config().auto_upload {
        engine.upload_stored_files();
    }

    engine.run_until_idle().await;
    drop(engine);

    let summary = collector.await?;
    println!(
        "完成: {} 个，失败: {} 个，取消: {} 个，拒绝: {} 个",
        summary.succeeded.len(),
        summary.failed.len(),
        summary.cancelled.len(),
        summary.rejected.len()
    );
    for (name, reason) in summary.failed.values() {
        warn!("上传失败: {} {}", name, reason);
        println!("  失败: {} {}", name, reason);
    }
    for reason in &summary.rejected {
        println!("  拒绝: {}", reason);
    }

    if summary.failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} 个文件上传失败", summary.failed.len())
    }
}
