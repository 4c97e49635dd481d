// 删除已上传文件的请求
//
// 请求地址为 `{endpoint}/{uuid}`，方法为 DELETE（演示模式下为 GET）

use super::ajax::{AjaxCompletion, AjaxOptions, AjaxRequester, CompletionSink, RequesterHooks};
use crate::config::UploadConfig;
use crate::transport::{HttpMethod, Transport};
use crate::uploader::FileId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// 删除请求视为成功的状态码
pub const DELETE_SUCCESS_CODES: [u16; 3] = [200, 202, 204];

/// 删除请求发送器
pub struct DeleteFileRequester {
    requester: AjaxRequester,
}

impl DeleteFileRequester {
    pub fn new(
        config: &UploadConfig,
        transport: Arc<dyn Transport>,
        sink: CompletionSink,
        hooks: Arc<dyn RequesterHooks>,
    ) -> Self {
        let options = AjaxOptions {
            method: HttpMethod::Delete,
            max_connections: config.max_connections,
            endpoint: config.delete_file.endpoint.clone(),
            params: config.delete_file.params.clone(),
            custom_headers: config.delete_file.custom_headers.clone(),
            success_codes: DELETE_SUCCESS_CODES.to_vec(),
            demo_mode: config.demo_mode,
        };
        Self {
            requester: AjaxRequester::new(options, transport, sink, hooks),
        }
    }

    /// 提交删除请求
    pub fn send_delete(&mut self, id: FileId, uuid: &str) {
        self.requester.send(id, Some(uuid.to_string()));
        info!("已提交删除请求: id={}", id);
    }

    pub fn handle_completion(&mut self, completion: AjaxCompletion) -> Option<bool> {
        self.requester.handle_completion(completion)
    }

    pub fn cancel(&mut self, id: FileId) -> bool {
        self.requester.cancel(id)
    }

    pub fn set_params(&mut self, params: BTreeMap<String, String>, id: Option<FileId>) {
        self.requester.set_params(params, id);
    }

    pub fn set_endpoint(&mut self, endpoint: String, id: Option<FileId>) {
        self.requester.set_endpoint(endpoint, id);
    }

    pub fn is_idle(&self) -> bool {
        self.requester.is_idle()
    }

    pub fn reset(&mut self) {
        self.requester.reset();
    }
}
