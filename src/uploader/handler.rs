// 上传状态机
//
// 持有全部文件记录，负责：
// - 标准上传（单个请求发送整个文件）与分片上传（逐个分片顺序发送）
// - 断点续传检查点的写入、读取、删除
// - 解析服务器响应，决定发送下一个分片、重置或交由引擎处理失败
//
// 网络请求在独立任务中执行，进度与响应通过消息通道交回引擎，
// 由引擎在自己的上下文中调用 handle_progress / handle_response
// 每个请求都带有请求序号，序号不匹配的消息一律丢弃

use super::callbacks::{guard, UploadCallbacks};
use super::chunk::ChunkPlanner;
use super::request::{UploadRequestBuilder, UploadRequestPlan};
use super::response::UploadResponse;
use super::task::{
    FileId, FileRecord, InFlightRequest, RequestToken, TransferMode, UploadSource, UploadStatus,
};
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::persistence::{CheckpointKey, ResumableFile, ResumeCheckpoint, ResumeStore};
use crate::requester::{AjaxCompletion, OverrideStore};
use crate::transport::{ProgressFn, Transport, TransportResponse};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =====================================================
// 引擎消息
// =====================================================

/// 后台任务交回引擎的消息
#[derive(Debug)]
pub enum EngineMessage {
    /// 上传请求进度
    UploadProgress {
        id: FileId,
        token: RequestToken,
        loaded: u64,
        total: u64,
    },
    /// 上传请求结束（网络失败时状态码为 0）
    UploadResponse {
        id: FileId,
        token: RequestToken,
        response: TransportResponse,
    },
    /// 删除请求结束
    Delete(AjaxCompletion),
    /// 自动重试定时器到期
    AutoRetry { id: FileId },
}

/// 响应处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// 过期或已取消的请求
    Stale,
    /// 文件仍在上传（已发送下一个分片或已从头重新开始）
    InProgress,
    /// 上传成功
    Completed(UploadResponse, u16),
    /// 请求失败，由引擎决定是否自动重试
    Failed(UploadResponse, u16),
}

// =====================================================
// 状态机
// =====================================================

/// 上传状态机
pub struct UploadHandler {
    config: Arc<UploadConfig>,
    planner: ChunkPlanner,
    records: HashMap<FileId, FileRecord>,
    next_id: u64,
    next_token: u64,
    resume: ResumeStore,
    params: OverrideStore<BTreeMap<String, String>>,
    endpoints: OverrideStore<String>,
    transport: Arc<dyn Transport>,
    callbacks: Arc<dyn UploadCallbacks>,
    tx: mpsc::UnboundedSender<EngineMessage>,
}

impl UploadHandler {
    pub fn new(
        config: Arc<UploadConfig>,
        resume: ResumeStore,
        transport: Arc<dyn Transport>,
        callbacks: Arc<dyn UploadCallbacks>,
        tx: mpsc::UnboundedSender<EngineMessage>,
    ) -> Self {
        Self {
            planner: ChunkPlanner::new(config.chunking.part_size),
            params: OverrideStore::new(config.request.params.clone()),
            endpoints: OverrideStore::new(config.request.endpoint.clone()),
            config,
            records: HashMap::new(),
            next_id: 0,
            next_token: 0,
            resume,
            transport,
            callbacks,
            tx,
        }
    }

    /// 添加文件，分配新的文件 ID
    pub fn add(&mut self, source: UploadSource) -> FileId {
        let id = FileId(self.next_id);
        self.next_id += 1;

        let name = source
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| self.config.blobs.default_name.clone());
        let record = FileRecord::new(id, source, name);
        debug!(
            "添加文件: id={}, name={}, size={}, uuid={}",
            id, record.name, record.size, record.uuid
        );
        self.records.insert(id, record);
        id
    }

    /// 放弃已添加但未提交的文件
    pub fn forget(&mut self, id: FileId) {
        self.records.remove(&id);
        self.params.remove(id);
        self.endpoints.remove(id);
    }

    // =====================================================
    // 发送
    // =====================================================

    /// 开始或继续上传
    ///
    /// `retry` 为 true 时跳过续传检查点查找
    /// 已完成的文件返回错误，不发送任何请求
    pub fn upload(&mut self, id: FileId, retry: bool) -> Result<(), UploadError> {
        let chunking = self.config.chunking.enabled;
        let record = self
            .records
            .get_mut(&id)
            .ok_or(UploadError::InvalidId(id))?;

        if record.in_flight.is_some() {
            warn!("文件正在上传，忽略重复请求: id={}", id);
            return Ok(());
        }
        if record.status == UploadStatus::Completed {
            return Err(UploadError::AlreadyCompleted(id));
        }

        record.error = None;
        // 空文件无法切分，退回标准上传
        let chunked = chunking && record.size > 0;
        let name = record.name.clone();
        guard("on_upload", self.callbacks.on_upload(id, &name), ());

        if chunked {
            self.upload_chunked(id, retry);
        } else {
            self.upload_standard(id);
        }
        Ok(())
    }

    fn upload_standard(&mut self, id: FileId) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        record.status = UploadStatus::Uploading(TransferMode::Standard);
        record.loaded = 0;
        info!("开始上传: id={}, name={}, size={}", id, record.name, record.size);

        let record = &self.records[&id];
        let builder = UploadRequestBuilder::new(&self.config);
        let plan = builder.build(record, &self.endpoints.get(id), self.params.get(id));
        let range = 0..record.size;
        self.spawn_request(id, None, range, plan);
    }

    fn upload_chunked(&mut self, id: FileId, retry: bool) {
        let total = match self.records.get(&id) {
            Some(record) => self.planner.total_chunks(record.size),
            None => return,
        };

        let needs_plan = self
            .records
            .get(&id)
            .is_some_and(|record| record.remaining_chunks.is_empty());
        if needs_plan {
            let first = if retry { 0 } else { self.restore_checkpoint(id) };
            if let Some(record) = self.records.get_mut(&id) {
                for index in (first..total).rev() {
                    record.remaining_chunks.push_front(index);
                }
            }
        }

        if let Some(record) = self.records.get_mut(&id) {
            record.status = UploadStatus::Uploading(TransferMode::Chunked);
            info!(
                "开始分片上传: id={}, name={}, 剩余分片 {}/{}",
                id,
                record.name,
                record.remaining_chunks.len(),
                total
            );
        }
        self.send_next_chunk(id);
    }

    /// 尝试从检查点恢复，返回起始分片索引
    fn restore_checkpoint(&mut self, id: FileId) -> usize {
        let Some(key) = self.checkpoint_key(id) else {
            return 0;
        };
        let Some(checkpoint) = self.resume.lookup(&key) else {
            return 0;
        };
        let Some(record) = self.records.get(&id) else {
            return 0;
        };

        let total = self.planner.total_chunks(record.size);
        if checkpoint.part_index >= total {
            warn!(
                "续传数据的分片索引越界，从头上传: id={}, 分片 {}/{}",
                id, checkpoint.part_index, total
            );
            return 0;
        }

        let chunk = self.planner.chunk_at(checkpoint.part_index, record.size);
        let name = record.name.clone();
        let accepted = guard(
            "on_resume",
            self.callbacks
                .on_resume(id, &name, &chunk.to_callback_data()),
            true,
        );
        if !accepted {
            info!("续传被回调否决，从头上传: id={}", id);
            return 0;
        }

        let Some(record) = self.records.get_mut(&id) else {
            return 0;
        };
        info!(
            "从分片 {} 继续上传: id={}, name={}, 已确认 {} 字节",
            checkpoint.part_index, id, record.name, checkpoint.last_byte_sent
        );
        record.uuid = checkpoint.uuid;
        record.loaded = checkpoint.last_byte_sent;
        record.initial_request_overhead = checkpoint.initial_request_overhead;
        record.est_total_requests_size = checkpoint.est_total_requests_size;
        record.attempting_resume = true;
        checkpoint.part_index
    }

    fn send_next_chunk(&mut self, id: FileId) {
        let Some(record) = self.records.get(&id) else {
            return;
        };
        let Some(index) = record.remaining_chunks.front().copied() else {
            warn!("没有待发送的分片: id={}", id);
            return;
        };
        let chunk = self.planner.chunk_at(index, record.size);

        if let Some(key) = self.checkpoint_key(id) {
            let checkpoint = ResumeCheckpoint {
                uuid: record.uuid.clone(),
                part_index: index,
                last_byte_sent: record.loaded,
                initial_request_overhead: record.initial_request_overhead,
                est_total_requests_size: record.est_total_requests_size,
            };
            self.resume.persist(&key, &checkpoint);
        }

        guard(
            "on_upload_chunk",
            self.callbacks
                .on_upload_chunk(id, &record.name, &chunk.to_callback_data()),
            (),
        );

        let builder = UploadRequestBuilder::new(&self.config);
        let mut params = self.params.get(id);
        params.extend(builder.chunk_params(record, &chunk));
        let plan = builder.build(record, &self.endpoints.get(id), params);

        debug!(
            "发送分片: id={}, 分片 {}/{}, 字节 {}..{}",
            id, index, chunk.count, chunk.start, chunk.end
        );
        self.spawn_request(id, Some(index), chunk.range(), plan);
    }

    fn spawn_request(
        &mut self,
        id: FileId,
        chunk: Option<usize>,
        range: Range<u64>,
        plan: UploadRequestPlan,
    ) {
        self.next_token += 1;
        let token = RequestToken(self.next_token);
        let abort = CancellationToken::new();

        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        record.in_flight = Some(InFlightRequest {
            token,
            chunk,
            abort: abort.clone(),
        });

        let source = record.source.clone();
        let transport = self.transport.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let progress_tx = tx.clone();
            let progress: ProgressFn = Arc::new(move |loaded, total| {
                let _ = progress_tx.send(EngineMessage::UploadProgress {
                    id,
                    token,
                    loaded,
                    total,
                });
            });

            let send = async {
                let payload = source.read_range(range).await?;
                let response = transport.send(plan.into_request(payload), progress).await?;
                Ok::<_, anyhow::Error>(response)
            };
            let result = tokio::select! {
                biased;
                _ = abort.cancelled() => return,
                result = send => result,
            };

            let response = result.unwrap_or_else(|e| {
                warn!("上传请求未完成: id={}, 错误: {:#}", id, e);
                TransportResponse::network_failure()
            });
            let _ = tx.send(EngineMessage::UploadResponse {
                id,
                token,
                response,
            });
        });
    }

    // =====================================================
    // 进度与响应
    // =====================================================

    /// 处理请求进度
    pub fn handle_progress(&mut self, id: FileId, token: RequestToken, loaded: u64, total: u64) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        if !record.is_current(token) {
            return;
        }

        let chunk_index = record.in_flight.as_ref().and_then(|request| request.chunk);
        let (loaded, total) = match chunk_index {
            None => (loaded, total),
            Some(index) => {
                let chunk = self.planner.chunk_at(index, record.size);
                let overhead = total as i64 - chunk.size() as i64;
                record.last_request_overhead = Some(overhead);

                let seed = record.size as i64 + chunk.count as i64 * overhead;
                if index == 0 {
                    record.last_chunk_idx_progress = Some(0);
                    record.initial_request_overhead = Some(overhead);
                    record.est_total_requests_size = Some(seed.max(0) as u64);
                } else if record.last_chunk_idx_progress != Some(index) {
                    record.last_chunk_idx_progress = Some(index);
                    match (record.initial_request_overhead, record.est_total_requests_size) {
                        (Some(initial), Some(est)) => {
                            let adjusted = est as i64 + overhead - initial;
                            record.est_total_requests_size = Some(adjusted.max(0) as u64);
                        }
                        _ => {
                            record.initial_request_overhead = Some(overhead);
                            record.est_total_requests_size = Some(seed.max(0) as u64);
                        }
                    }
                }

                let est = record.est_total_requests_size.unwrap_or(record.size);
                (loaded + record.loaded, est)
            }
        };

        let name = record.name.clone();
        guard(
            "on_progress",
            self.callbacks.on_progress(id, &name, loaded, total),
            (),
        );
    }

    /// 处理请求响应
    pub fn handle_response(
        &mut self,
        id: FileId,
        token: RequestToken,
        raw: TransportResponse,
    ) -> ResponseOutcome {
        let Some(record) = self.records.get_mut(&id) else {
            debug!("忽略已移除文件的响应: id={}", id);
            return ResponseOutcome::Stale;
        };
        if !record.is_current(token) {
            debug!("忽略过期的响应: id={}", id);
            return ResponseOutcome::Stale;
        }
        let chunk_index = record
            .in_flight
            .take()
            .and_then(|request| request.chunk);

        let status = raw.status;
        let response = if status == 0 && raw.body.is_empty() {
            UploadResponse::default()
        } else {
            UploadResponse::parse(&raw.body)
        };
        let is_error = response.is_error_response(status);

        match chunk_index {
            None => {
                if is_error {
                    record.error = Some(classify(&response, status));
                    return ResponseOutcome::Failed(response, status);
                }
                self.finish_success(id);
                ResponseOutcome::Completed(response, status)
            }
            Some(index) if is_error => {
                if response.is_reset() {
                    return self.handle_reset(id, index, response, status);
                }
                record.error = Some(classify(&response, status));
                ResponseOutcome::Failed(response, status)
            }
            Some(index) => {
                let chunk = self.planner.chunk_at(index, record.size);
                record.remaining_chunks.pop_front();
                let overhead = if UploadRequestBuilder::new(&self.config).multipart() {
                    record.last_request_overhead.unwrap_or(0).max(0) as u64
                } else {
                    0
                };
                record.loaded += chunk.size() + overhead;
                record.attempting_resume = false;
                debug!(
                    "分片上传成功: id={}, 分片 {}/{}, 已确认 {} 字节",
                    id, index, chunk.count, record.loaded
                );

                if record.remaining_chunks.is_empty() {
                    if let Some(key) = self.checkpoint_key(id) {
                        self.resume.delete(&key);
                    }
                    self.finish_success(id);
                    ResponseOutcome::Completed(response, status)
                } else {
                    self.send_next_chunk(id);
                    ResponseOutcome::InProgress
                }
            }
        }
    }

    /// 服务器要求重置：清除分片状态与检查点
    ///
    /// 正在续传时直接从第一个分片重新开始，否则作为失败交给引擎
    fn handle_reset(
        &mut self,
        id: FileId,
        index: usize,
        response: UploadResponse,
        status: u16,
    ) -> ResponseOutcome {
        let key = self.checkpoint_key(id);
        let Some(record) = self.records.get_mut(&id) else {
            return ResponseOutcome::Stale;
        };

        error!(
            "服务器要求重置分片上传: id={}, name={}, 分片 {}",
            id, record.name, index
        );
        let was_resuming = record.attempting_resume;
        record.clear_chunk_state();
        record.attempting_resume = false;
        if let Some(key) = key {
            self.resume.delete(&key);
        }

        if was_resuming {
            info!("续传失败，从第一个分片重新上传: id={}", id);
            if let Err(e) = self.upload(id, true) {
                warn!("重新上传失败: {}", e);
            }
            return ResponseOutcome::InProgress;
        }

        if let Some(record) = self.records.get_mut(&id) {
            record.error = Some(UploadError::ResetRequested);
        }
        ResponseOutcome::Failed(response, status)
    }

    fn finish_success(&mut self, id: FileId) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        record.status = UploadStatus::Completed;
        record.loaded = record.size;
        record.remaining_chunks.clear();
        record.error = None;
        info!("上传完成: id={}, name={}", id, record.name);

        let (name, size) = (record.name.clone(), record.size);
        guard(
            "on_progress",
            self.callbacks.on_progress(id, &name, size, size),
            (),
        );
    }

    /// 标记为最终失败，剩余分片保留以便手动重试
    pub fn finish_failed(&mut self, id: FileId, error: Option<UploadError>) {
        if let Some(record) = self.records.get_mut(&id) {
            record.status = UploadStatus::Failed;
            if error.is_some() {
                record.error = error;
            }
            warn!(
                "上传失败: id={}, name={}, 原因: {}",
                id,
                record.name,
                record
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_default()
            );
        }
    }

    // =====================================================
    // 取消与重置
    // =====================================================

    /// 取消上传并移除记录，返回文件名
    ///
    /// 已完成的文件不能取消
    pub fn cancel(&mut self, id: FileId) -> Option<String> {
        match self.records.get(&id) {
            None => {
                warn!("取消失败，无效的文件 ID: {}", id);
                return None;
            }
            Some(record) if record.status == UploadStatus::Completed => {
                warn!("文件已上传完成，无法取消: id={}", id);
                return None;
            }
            Some(_) => {}
        }

        let key = self.checkpoint_key(id);
        let mut record = self.records.remove(&id)?;
        if record.abort_in_flight() {
            debug!("已中止进行中的请求: id={}", id);
        }
        if let Some(key) = key {
            self.resume.delete(&key);
        }
        self.params.remove(id);
        self.endpoints.remove(id);

        info!("已取消上传: id={}, name={}", id, record.name);
        Some(record.name)
    }

    /// 中止全部请求并清空记录（文件 ID 不会复用）
    pub fn reset(&mut self) {
        for (_, mut record) in self.records.drain() {
            record.abort_in_flight();
        }
        self.params.reset();
        self.endpoints.reset();
        info!("上传状态已重置");
    }

    // =====================================================
    // 查询与设置
    // =====================================================

    pub fn record(&self, id: FileId) -> Option<&FileRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn is_in_flight(&self, id: FileId) -> bool {
        self.records
            .get(&id)
            .is_some_and(|record| record.in_flight.is_some())
    }

    pub fn name(&self, id: FileId) -> Option<&str> {
        self.records.get(&id).map(|record| record.name.as_str())
    }

    pub fn uuid(&self, id: FileId) -> Option<&str> {
        self.records.get(&id).map(|record| record.uuid.as_str())
    }

    pub fn size(&self, id: FileId) -> Option<u64> {
        self.records.get(&id).map(|record| record.size)
    }

    pub fn status(&self, id: FileId) -> Option<UploadStatus> {
        self.records.get(&id).map(|record| record.status)
    }

    pub fn error(&self, id: FileId) -> Option<&UploadError> {
        self.records.get(&id).and_then(|record| record.error.as_ref())
    }

    pub fn set_params(&mut self, params: BTreeMap<String, String>, id: Option<FileId>) {
        self.params.set(params, id);
    }

    pub fn set_endpoint(&mut self, endpoint: String, id: Option<FileId>) {
        self.endpoints.set(endpoint, id);
    }

    /// 当前分片大小与续传会话下可续传的文件
    pub fn resumable_files(&self) -> Result<Vec<ResumableFile>> {
        if !self.config.resume_active() {
            return Ok(Vec::new());
        }
        self.resume
            .resumable_files(self.planner.chunk_size(), self.config.resume.id.as_deref())
    }

    /// 文件的检查点键，续传未启用或为 Blob 时返回 `None`
    fn checkpoint_key(&self, id: FileId) -> Option<CheckpointKey> {
        if !self.config.resume_active() {
            return None;
        }
        let record = self.records.get(&id)?;
        if record.is_blob() {
            return None;
        }
        Some(CheckpointKey::new(
            record.name.clone(),
            record.size,
            self.planner.chunk_size(),
            self.config.resume.id.clone(),
        ))
    }
}

/// 失败响应的错误分类
fn classify(response: &UploadResponse, status: u16) -> UploadError {
    if let Some(reason) = response.parse_error() {
        UploadError::Parse(reason.to_string())
    } else if response.is_reset() {
        UploadError::ResetRequested
    } else {
        UploadError::Transport { status }
    }
}
