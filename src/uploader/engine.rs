// 上传引擎
//
// 对外入口：提交文件、开始/取消/重试上传、删除已上传文件
//
// 执行模型：
// - 引擎独占全部状态，所有状态变更都在调用方的任务中进行
// - 网络请求在后台任务中执行，结果通过消息通道交回
// - 调用方通过 process_next / run_until_idle 驱动消息处理
//
// 并发：上传请求共用一个有界队列，队列前 max_connections 个文件处于活跃状态
// 文件失败后等待自动重试期间仍占用槽位

use super::callbacks::{guard, UploadCallbacks};
use super::handler::{EngineMessage, ResponseOutcome, UploadHandler};
use super::response::UploadResponse;
use super::retry::AutoRetryState;
use super::task::{BlobData, FileId, LocalFile, UploadSource, UploadStatus};
use super::validation::{FileDescriptor, ValidationError, Validator};
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::persistence::{FileCheckpointStore, ResumableFile, ResumeStore};
use crate::requester::{
    AjaxCompletion, CompletionSink, DeleteFileRequester, RequestQueue, RequesterHooks,
};
use crate::transport::Transport;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 把删除请求的生命周期转发给上传回调
struct DeleteHooks {
    callbacks: Arc<dyn UploadCallbacks>,
}

impl RequesterHooks for DeleteHooks {
    fn on_send(&self, id: FileId) {
        guard("on_delete", self.callbacks.on_delete(id), ());
    }

    fn on_complete(&self, id: FileId, status: u16, is_error: bool) {
        guard(
            "on_delete_complete",
            self.callbacks.on_delete_complete(id, status, is_error),
            (),
        );
    }
}

/// 上传引擎
///
/// 需要在 Tokio 运行时中使用
pub struct UploadEngine {
    config: Arc<UploadConfig>,
    handler: UploadHandler,
    queue: RequestQueue<FileId>,
    deleter: DeleteFileRequester,
    retries: AutoRetryState,
    validator: Validator,
    callbacks: Arc<dyn UploadCallbacks>,
    /// 已开始且尚未结束的文件
    files_in_progress: HashSet<FileId>,
    /// 未自动上传、等待 upload_stored_files 的文件
    stored_ids: Vec<FileId>,
    tx: mpsc::UnboundedSender<EngineMessage>,
    rx: mpsc::UnboundedReceiver<EngineMessage>,
}

impl UploadEngine {
    /// 创建引擎，配置了 `resume.store_path` 时检查点保存到文件
    pub fn new(
        config: UploadConfig,
        transport: Arc<dyn Transport>,
        callbacks: Arc<dyn UploadCallbacks>,
    ) -> Result<Self> {
        let resume = match &config.resume.store_path {
            Some(path) => {
                let store = FileCheckpointStore::open(path.clone())
                    .with_context(|| format!("无法打开续传数据文件: {:?}", path))?;
                ResumeStore::new(Box::new(store), config.resume.expire_days)
            }
            None => ResumeStore::in_memory(config.resume.expire_days),
        };
        Self::with_resume_store(config, resume, transport, callbacks)
    }

    /// 使用指定的续传存储创建引擎
    pub fn with_resume_store(
        config: UploadConfig,
        resume: ResumeStore,
        transport: Arc<dyn Transport>,
        callbacks: Arc<dyn UploadCallbacks>,
    ) -> Result<Self> {
        config.validate().context("上传配置无效")?;
        let config = Arc::new(config);
        let (tx, rx) = mpsc::unbounded_channel();

        let delete_tx = tx.clone();
        let sink: CompletionSink = Arc::new(move |completion: AjaxCompletion| {
            let _ = delete_tx.send(EngineMessage::Delete(completion));
        });
        let deleter = DeleteFileRequester::new(
            &config,
            transport.clone(),
            sink,
            Arc::new(DeleteHooks {
                callbacks: callbacks.clone(),
            }),
        );

        let handler = UploadHandler::new(
            config.clone(),
            resume,
            transport.clone(),
            callbacks.clone(),
            tx.clone(),
        );

        info!(
            "上传引擎已创建: 传输={}, 最大并发={}, 分片={}, 续传={}",
            transport.name(),
            config.max_connections,
            config.chunking.enabled,
            config.resume_active()
        );

        Ok(Self {
            queue: RequestQueue::new(config.max_connections),
            validator: Validator::new(config.validation.clone()),
            config,
            handler,
            deleter,
            retries: AutoRetryState::new(),
            callbacks,
            files_in_progress: HashSet::new(),
            stored_ids: Vec::new(),
            tx,
            rx,
        })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    // =====================================================
    // 提交
    // =====================================================

    /// 提交单个文件或 Blob，被校验或回调拒绝时返回 `None`
    pub fn add(&mut self, source: UploadSource) -> Option<FileId> {
        self.add_sources(vec![source]).into_iter().next()
    }

    /// 按路径提交本地文件
    ///
    /// 无法读取的路径通过 on_error 报告，不影响其余文件
    pub async fn add_files(&mut self, paths: Vec<PathBuf>) -> Vec<FileId> {
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            match LocalFile::open(&path).await {
                Ok(file) => sources.push(UploadSource::File(file)),
                Err(e) => {
                    let err = UploadError::InvalidDescriptor(path.display().to_string());
                    error!("{}: {:#}", err, e);
                    let name = path.display().to_string();
                    guard(
                        "on_error",
                        self.callbacks.on_error(None, &name, &err.to_string()),
                        (),
                    );
                }
            }
        }
        self.add_sources(sources)
    }

    /// 提交内存数据
    pub fn add_blobs(&mut self, blobs: Vec<BlobData>) -> Vec<FileId> {
        self.add_sources(blobs.into_iter().map(UploadSource::Blob).collect())
    }

    /// 校验并提交一批文件，返回已接受文件的 ID
    pub fn add_sources(&mut self, sources: Vec<UploadSource>) -> Vec<FileId> {
        let descriptors: Vec<FileDescriptor> =
            sources.iter().map(|source| self.descriptor(source)).collect();

        if !guard(
            "on_validate_batch",
            self.callbacks.on_validate_batch(&descriptors),
            true,
        ) {
            info!("整批文件被校验回调拒绝: {} 个", descriptors.len());
            return Vec::new();
        }

        if sources.is_empty() {
            self.report_validation_error(&ValidationError::NoFiles);
            return Vec::new();
        }

        let mut accepted = Vec::new();
        for (source, descriptor) in sources.into_iter().zip(descriptors) {
            if !guard("on_validate", self.callbacks.on_validate(&descriptor), true) {
                debug!("文件被校验回调跳过: {}", descriptor.name);
                continue;
            }
            if let Err(e) = self.validator.validate(&descriptor) {
                warn!("文件校验失败: {}", e);
                self.report_validation_error(&e);
                if self.validator.stop_on_first_invalid() {
                    break;
                }
                continue;
            }
            if let Some(id) = self.submit(source) {
                accepted.push(id);
            }
        }
        accepted
    }

    fn descriptor(&self, source: &UploadSource) -> FileDescriptor {
        FileDescriptor {
            name: source
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| self.config.blobs.default_name.clone()),
            size: Some(source.size()),
            is_blob: source.is_blob(),
        }
    }

    fn report_validation_error(&self, error: &ValidationError) {
        guard(
            "on_validation_error",
            self.callbacks.on_validation_error(error),
            (),
        );
    }

    fn submit(&mut self, source: UploadSource) -> Option<FileId> {
        let id = self.handler.add(source);
        let name = self.handler.name(id).unwrap_or_default().to_string();

        if !guard("on_submit", self.callbacks.on_submit(id, &name), true) {
            info!("文件提交被回调拒绝: id={}, name={}", id, name);
            self.handler.forget(id);
            return None;
        }

        if self.config.auto_upload {
            self.start(id);
        } else {
            debug!("文件已暂存，等待手动上传: id={}", id);
            self.stored_ids.push(id);
        }
        Some(id)
    }

    // =====================================================
    // 上传控制
    // =====================================================

    /// 开始上传单个已提交的文件
    pub fn upload(&mut self, id: FileId) -> Result<(), UploadError> {
        match self.handler.status(id) {
            None => return Err(UploadError::InvalidId(id)),
            Some(UploadStatus::Completed) => return Err(UploadError::AlreadyCompleted(id)),
            Some(_) => {}
        }
        if self.queue.contains(id) {
            warn!("文件已在上传队列中: id={}", id);
            return Ok(());
        }
        self.stored_ids.retain(|stored| *stored != id);
        self.start(id);
        Ok(())
    }

    /// 上传全部暂存的文件
    pub fn upload_stored_files(&mut self) {
        let ids = std::mem::take(&mut self.stored_ids);
        info!("开始上传暂存文件: {} 个", ids.len());
        for id in ids {
            self.start(id);
        }
    }

    /// 丢弃暂存的文件
    pub fn clear_stored_files(&mut self) {
        self.stored_ids.clear();
    }

    pub fn stored_files(&self) -> &[FileId] {
        &self.stored_ids
    }

    fn start(&mut self, id: FileId) {
        self.files_in_progress.insert(id);
        if self.queue.push(id) {
            self.dispatch(id, false);
        }
    }

    /// 对活跃窗口内的文件发起上传
    fn dispatch(&mut self, id: FileId, retry: bool) {
        if let Err(e) = self.handler.upload(id, retry) {
            error!("无法开始上传: {}", e);
            self.files_in_progress.remove(&id);
            self.dequeue(id);
        }
    }

    /// 重新发送：已在活跃窗口内则直接重发，排队中则等待提升，否则重新入队
    fn queue_retry(&mut self, id: FileId) {
        if self.queue.contains(id) {
            if self.queue.is_active(id) {
                self.dispatch(id, true);
            } else {
                debug!("文件仍在排队，等待槽位: id={}", id);
            }
        } else if self.queue.push(id) {
            self.dispatch(id, true);
        }
    }

    fn dequeue(&mut self, id: FileId) {
        if let Some(next) = self.queue.dequeue(id) {
            self.dispatch(next, false);
        }
    }

    /// 手动重试失败的文件
    pub fn retry(&mut self, id: FileId) -> bool {
        let Some(record) = self.handler.record(id) else {
            warn!("{}", UploadError::InvalidId(id));
            return false;
        };
        if record.status == UploadStatus::Completed {
            warn!("文件已上传完成，无需重试: id={}", id);
            return false;
        }
        if record.in_flight.is_some() {
            warn!("文件正在上传，忽略重试: id={}", id);
            return false;
        }
        if self.retries.is_prevented(id) {
            warn!("服务器禁止重试该文件: id={}", id);
            return false;
        }

        let name = record.name.clone();
        if !guard(
            "on_manual_retry",
            self.callbacks.on_manual_retry(id, &name),
            true,
        ) {
            info!("手动重试被回调否决: id={}", id);
            return false;
        }

        info!("手动重试: id={}, name={}", id, name);
        self.retries.cancel(id);
        self.retries.exhaust(id, &self.config.retry);
        self.files_in_progress.insert(id);
        self.queue_retry(id);
        true
    }

    // =====================================================
    // 取消与重置
    // =====================================================

    /// 取消上传，移除文件记录与续传数据
    pub fn cancel(&mut self, id: FileId) -> bool {
        let Some(name) = self.handler.cancel(id) else {
            return false;
        };
        self.retries.forget(id);
        self.stored_ids.retain(|stored| *stored != id);
        self.files_in_progress.remove(&id);
        guard("on_cancel", self.callbacks.on_cancel(id, &name), ());
        self.dequeue(id);
        true
    }

    /// 取消全部未完成的上传
    ///
    /// 先取消排队中的文件，避免取消活跃文件时提升即将被取消的文件
    pub fn cancel_all(&mut self) {
        let mut ids: Vec<FileId> = self.queue.snapshot().into_iter().rev().collect();
        ids.extend(self.stored_ids.iter().copied());
        info!("取消全部上传: {} 个", ids.len());
        for id in ids {
            self.cancel(id);
        }
    }

    /// 中止全部请求并清空状态（文件 ID 不会复用）
    pub fn reset(&mut self) {
        self.handler.reset();
        self.queue.drain();
        self.deleter.reset();
        self.retries.clear();
        self.stored_ids.clear();
        self.files_in_progress.clear();
        while self.rx.try_recv().is_ok() {}
        info!("上传引擎已重置");
    }

    // =====================================================
    // 删除
    // =====================================================

    /// 请求服务器删除已上传的文件
    pub fn delete_file(&mut self, id: FileId) -> bool {
        if !self.config.delete_file.enabled {
            warn!("删除功能未启用，忽略删除请求: id={}", id);
            return false;
        }
        let Some(uuid) = self.handler.uuid(id).map(str::to_string) else {
            warn!("{}", UploadError::InvalidId(id));
            return false;
        };
        if !guard(
            "on_submit_delete",
            self.callbacks.on_submit_delete(id),
            true,
        ) {
            info!("删除请求被回调否决: id={}", id);
            return false;
        }
        self.deleter.send_delete(id, &uuid);
        true
    }

    // =====================================================
    // 参数与地址
    // =====================================================

    /// 设置上传参数，`id` 为 `None` 时修改默认值
    pub fn set_params(&mut self, params: BTreeMap<String, String>, id: Option<FileId>) {
        self.handler.set_params(params, id);
    }

    pub fn set_endpoint(&mut self, endpoint: impl Into<String>, id: Option<FileId>) {
        self.handler.set_endpoint(endpoint.into(), id);
    }

    pub fn set_delete_file_params(&mut self, params: BTreeMap<String, String>, id: Option<FileId>) {
        self.deleter.set_params(params, id);
    }

    pub fn set_delete_file_endpoint(&mut self, endpoint: impl Into<String>, id: Option<FileId>) {
        self.deleter.set_endpoint(endpoint.into(), id);
    }

    // =====================================================
    // 查询
    // =====================================================

    pub fn uuid(&self, id: FileId) -> Option<&str> {
        self.handler.uuid(id)
    }

    pub fn name(&self, id: FileId) -> Option<&str> {
        self.handler.name(id)
    }

    pub fn size(&self, id: FileId) -> Option<u64> {
        self.handler.size(id)
    }

    pub fn status(&self, id: FileId) -> Option<UploadStatus> {
        self.handler.status(id)
    }

    pub fn error(&self, id: FileId) -> Option<&UploadError> {
        self.handler.error(id)
    }

    /// 正在上传（含排队、等待重试）的文件数
    pub fn in_progress(&self) -> usize {
        self.files_in_progress.len()
    }

    /// 可续传的文件（根据已保存的检查点）
    pub fn resumable_files(&self) -> Result<Vec<ResumableFile>> {
        self.handler.resumable_files()
    }

    // =====================================================
    // 消息处理
    // =====================================================

    /// 是否还有未结束的请求或重试
    pub fn has_pending_work(&self) -> bool {
        !self.queue.is_empty() || !self.deleter.is_idle() || self.retries.has_pending()
    }

    /// 处理下一条消息，没有待处理工作时返回 false
    pub async fn process_next(&mut self) -> bool {
        if !self.has_pending_work() {
            return false;
        }
        match self.rx.recv().await {
            Some(message) => {
                self.handle_message(message);
                true
            }
            None => false,
        }
    }

    /// 处理消息直到全部请求结束
    pub async fn run_until_idle(&mut self) {
        while self.process_next().await {}
        debug!("全部请求已结束");
    }

    pub fn handle_message(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::UploadProgress {
                id,
                token,
                loaded,
                total,
            } => self.handler.handle_progress(id, token, loaded, total),
            EngineMessage::UploadResponse {
                id,
                token,
                response,
            } => match self.handler.handle_response(id, token, response) {
                ResponseOutcome::Stale | ResponseOutcome::InProgress => {}
                ResponseOutcome::Completed(response, status) => {
                    self.on_upload_complete(id, &response, status);
                }
                ResponseOutcome::Failed(response, status) => {
                    self.on_upload_failed(id, response, status);
                }
            },
            EngineMessage::Delete(completion) => self.on_delete_complete(completion),
            EngineMessage::AutoRetry { id } => {
                if self.retries.fire(id) && self.handler.contains(id) {
                    info!("自动重试: id={}, 第 {} 次", id, self.retries.attempts(id));
                    self.queue_retry(id);
                }
            }
        }
    }

    fn on_upload_complete(&mut self, id: FileId, response: &UploadResponse, status: u16) {
        let name = self.handler.name(id).unwrap_or_default().to_string();
        guard(
            "on_complete",
            self.callbacks.on_complete(id, &name, response, status),
            (),
        );
        self.files_in_progress.remove(&id);
        self.dequeue(id);
    }

    /// 请求失败：交给自动重试策略，放弃重试时作为最终失败上报
    fn on_upload_failed(&mut self, id: FileId, response: UploadResponse, status: u16) {
        let name = self.handler.name(id).unwrap_or_default().to_string();
        let retry_config = &self.config.retry;
        self.retries.record_response(id, &response, retry_config);

        if self.retries.should_auto_retry(id, retry_config) {
            self.report_upload_error(id, &name, &response, status);
            let attempt = self.retries.attempts(id) + 1;
            guard(
                "on_auto_retry",
                self.callbacks.on_auto_retry(id, &name, attempt),
                (),
            );
            let delay = Duration::from_secs(retry_config.auto_attempt_delay_secs);
            info!(
                "将在 {} 秒后自动重试: id={}, 第 {} 次",
                delay.as_secs(),
                id,
                attempt
            );
            self.retries.schedule(id, delay, self.tx.clone());
            return;
        }

        let declined = retry_config.enable_auto.then_some(UploadError::AutoRetryDeclined);
        self.handler.finish_failed(id, declined);
        guard(
            "on_complete",
            self.callbacks.on_complete(id, &name, &response, status),
            (),
        );
        self.report_upload_error(id, &name, &response, status);
        self.files_in_progress.remove(&id);
        self.dequeue(id);
    }

    fn report_upload_error(&self, id: FileId, name: &str, response: &UploadResponse, status: u16) {
        if response.is_success() {
            return;
        }
        let reason = response.failure_reason(status);
        guard(
            "on_error",
            self.callbacks.on_error(Some(id), name, &reason),
            (),
        );
    }

    fn on_delete_complete(&mut self, completion: AjaxCompletion) {
        let id = completion.id;
        let status = completion.response.status;
        if let Some(true) = self.deleter.handle_completion(completion) {
            let name = self.handler.name(id).unwrap_or_default().to_string();
            let reason = format!("Delete request failed with response code {}", status);
            error!("删除文件失败: id={}, {}", id, reason);
            guard(
                "on_error",
                self.callbacks.on_error(Some(id), &name, &reason),
                (),
            );
        }
    }
}
