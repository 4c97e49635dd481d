// 测试用传输与回调

use crate::transport::{ProgressFn, RequestBody, Transport, TransportRequest, TransportResponse};
use crate::uploader::callbacks::UploadCallbacks;
use crate::uploader::{ChunkCallbackData, FileId, UploadResponse, ValidationError};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// multipart 请求固定计入的编码开销
pub const MOCK_MULTIPART_OVERHEAD: u64 = 100;

type Responder = Box<dyn Fn(&TransportRequest, usize) -> TransportResponse + Send + Sync>;

/// 脚本化传输
///
/// - `held`: 请求挂起，直到测试调用 `respond`
/// - `auto`: 按 responder 立即返回
pub struct MockTransport {
    responder: Option<Responder>,
    requests: Mutex<Vec<TransportRequest>>,
    pending: Mutex<Vec<Option<oneshot::Sender<TransportResponse>>>>,
}

impl MockTransport {
    pub fn held() -> Self {
        Self {
            responder: None,
            requests: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn auto(
        responder: impl Fn(&TransportRequest, usize) -> TransportResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::held()
        }
    }

    /// 每个请求都返回成功
    pub fn always_ok() -> Self {
        Self::auto(|_, _| ok_response())
    }

    pub fn request(&self, index: usize) -> TransportRequest {
        self.requests.lock().unwrap()[index].clone()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// 等待至少 `count` 个请求到达
    pub async fn wait_for_pending(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.request_count() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("等待请求超时");
    }

    /// 让出执行权，使已派发的任务运行到挂起点
    pub async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// 返回第 `index` 个挂起请求的响应，已中止的请求忽略
    pub fn respond(&self, index: usize, status: u16, body: &str) {
        let sender = self
            .pending
            .lock()
            .unwrap()
            .get_mut(index)
            .and_then(Option::take);
        if let Some(sender) = sender {
            let _ = sender.send(TransportResponse {
                status,
                body: body.to_string(),
            });
        }
    }
}

pub fn ok_response() -> TransportResponse {
    TransportResponse {
        status: 200,
        body: r#"{"success":true}"#.to_string(),
    }
}

/// 请求中某个 multipart 字段的值
pub fn field(request: &TransportRequest, name: &str) -> Option<String> {
    match &request.body {
        RequestBody::Multipart { fields, .. } => fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone()),
        _ => None,
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: TransportRequest,
        progress: ProgressFn,
    ) -> Result<TransportResponse> {
        let overhead = match request.body {
            RequestBody::Multipart { .. } => MOCK_MULTIPART_OVERHEAD,
            _ => 0,
        };
        let total = request.body.payload_len() + overhead;
        progress(total, total);

        match &self.responder {
            Some(responder) => {
                let index = {
                    let mut requests = self.requests.lock().unwrap();
                    requests.push(request.clone());
                    self.pending.lock().unwrap().push(None);
                    requests.len() - 1
                };
                Ok(responder(&request, index))
            }
            None => {
                let (tx, rx) = oneshot::channel();
                {
                    let mut requests = self.requests.lock().unwrap();
                    self.pending.lock().unwrap().push(Some(tx));
                    requests.push(request);
                }
                Ok(rx.await?)
            }
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// 记录全部回调的实现，可配置否决
#[derive(Default)]
pub struct RecordingCallbacks {
    pub events: Mutex<Vec<String>>,
    pub progress: Mutex<Vec<(FileId, u64, u64)>>,
    pub completions: Mutex<Vec<(FileId, UploadResponse, u16)>>,
    pub errors: Mutex<Vec<(Option<FileId>, String)>>,
    pub validation_errors: Mutex<Vec<ValidationError>>,
    pub veto_resume: bool,
    pub veto_submit: bool,
    pub veto_manual_retry: bool,
    pub veto_delete: bool,
    pub fail_progress: bool,
}

impl RecordingCallbacks {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl UploadCallbacks for RecordingCallbacks {
    fn on_submit(&self, id: FileId, name: &str) -> Result<bool> {
        self.push(format!("submit:{}:{}", id, name));
        Ok(!self.veto_submit)
    }

    fn on_validation_error(&self, error: &ValidationError) -> Result<()> {
        self.validation_errors.lock().unwrap().push(error.clone());
        Ok(())
    }

    fn on_upload(&self, id: FileId, _name: &str) -> Result<()> {
        self.push(format!("upload:{}", id));
        Ok(())
    }

    fn on_upload_chunk(&self, id: FileId, _name: &str, chunk: &ChunkCallbackData) -> Result<()> {
        self.push(format!("chunk:{}:{}", id, chunk.part_index));
        Ok(())
    }

    fn on_resume(&self, id: FileId, _name: &str, chunk: &ChunkCallbackData) -> Result<bool> {
        self.push(format!("resume:{}:{}", id, chunk.part_index));
        Ok(!self.veto_resume)
    }

    fn on_progress(&self, id: FileId, _name: &str, loaded: u64, total: u64) -> Result<()> {
        self.progress.lock().unwrap().push((id, loaded, total));
        if self.fail_progress {
            anyhow::bail!("进度回调出错");
        }
        Ok(())
    }

    fn on_complete(&self, id: FileId, _name: &str, response: &UploadResponse, status: u16) -> Result<()> {
        self.push(format!("complete:{}:{}", id, response.is_success()));
        self.completions
            .lock()
            .unwrap()
            .push((id, response.clone(), status));
        Ok(())
    }

    fn on_cancel(&self, id: FileId, _name: &str) -> Result<()> {
        self.push(format!("cancel:{}", id));
        Ok(())
    }

    fn on_error(&self, id: Option<FileId>, _name: &str, reason: &str) -> Result<()> {
        self.errors.lock().unwrap().push((id, reason.to_string()));
        Ok(())
    }

    fn on_auto_retry(&self, id: FileId, _name: &str, attempt: u32) -> Result<()> {
        self.push(format!("auto_retry:{}:{}", id, attempt));
        Ok(())
    }

    fn on_manual_retry(&self, id: FileId, _name: &str) -> Result<bool> {
        self.push(format!("manual_retry:{}", id));
        Ok(!self.veto_manual_retry)
    }

    fn on_submit_delete(&self, id: FileId) -> Result<bool> {
        self.push(format!("submit_delete:{}", id));
        Ok(!self.veto_delete)
    }

    fn on_delete(&self, id: FileId) -> Result<()> {
        self.push(format!("delete:{}", id));
        Ok(())
    }

    fn on_delete_complete(&self, id: FileId, status: u16, is_error: bool) -> Result<()> {
        self.push(format!("delete_complete:{}:{}:{}", id, status, is_error));
        Ok(())
    }
}
