// 通用的非上传请求发送器
//
// 请求经过有界队列发送，响应通过完成回调交回调度方，
// 由调度方在自己的上下文中调用 handle_completion

use super::overrides::OverrideStore;
use super::queue::RequestQueue;
use super::url::{append_params, encode_params};
use super::base_headers;
use crate::transport::{
    HttpMethod, ProgressFn, RequestBody, Transport, TransportRequest, TransportResponse,
};
use crate::uploader::{FileId, RequestToken};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 请求完成通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AjaxCompletion {
    pub id: FileId,
    pub token: RequestToken,
    pub response: TransportResponse,
}

/// 接收完成通知
pub type CompletionSink = Arc<dyn Fn(AjaxCompletion) + Send + Sync>;

/// 请求生命周期钩子
pub trait RequesterHooks: Send + Sync {
    fn on_send(&self, _id: FileId) {}
    fn on_complete(&self, _id: FileId, _status: u16, _is_error: bool) {}
    fn on_cancel(&self, _id: FileId) {}
}

/// 请求选项
#[derive(Debug, Clone)]
pub struct AjaxOptions {
    pub method: HttpMethod,
    pub max_connections: usize,
    pub endpoint: String,
    pub params: BTreeMap<String, String>,
    pub custom_headers: BTreeMap<String, String>,
    /// 视为成功的状态码
    pub success_codes: Vec<u16>,
    /// 演示模式下统一使用 GET
    pub demo_mode: bool,
}

impl Default for AjaxOptions {
    fn default() -> Self {
        Self {
            method: HttpMethod::Post,
            max_connections: 3,
            endpoint: String::new(),
            params: BTreeMap::new(),
            custom_headers: BTreeMap::new(),
            success_codes: vec![200],
            demo_mode: false,
        }
    }
}

impl AjaxOptions {
    /// 实际使用的请求方法
    pub fn effective_method(&self) -> HttpMethod {
        if self.demo_mode {
            HttpMethod::Get
        } else {
            self.method
        }
    }
}

#[derive(Debug, Default)]
struct RequestState {
    path_suffix: Option<String>,
    in_flight: Option<(RequestToken, CancellationToken)>,
}

/// 通用请求发送器
pub struct AjaxRequester {
    options: AjaxOptions,
    queue: RequestQueue<FileId>,
    states: HashMap<FileId, RequestState>,
    params: OverrideStore<BTreeMap<String, String>>,
    endpoints: OverrideStore<String>,
    transport: Arc<dyn Transport>,
    sink: CompletionSink,
    hooks: Arc<dyn RequesterHooks>,
    next_token: u64,
}

impl AjaxRequester {
    pub fn new(
        options: AjaxOptions,
        transport: Arc<dyn Transport>,
        sink: CompletionSink,
        hooks: Arc<dyn RequesterHooks>,
    ) -> Self {
        Self {
            queue: RequestQueue::new(options.max_connections),
            states: HashMap::new(),
            params: OverrideStore::new(options.params.clone()),
            endpoints: OverrideStore::new(options.endpoint.clone()),
            options,
            transport,
            sink,
            hooks,
            next_token: 0,
        }
    }

    pub fn options(&self) -> &AjaxOptions {
        &self.options
    }

    /// 提交请求，`path_suffix` 追加到地址末尾
    pub fn send(&mut self, id: FileId, path_suffix: Option<String>) {
        if self.states.contains_key(&id) {
            warn!("请求已在队列中，忽略重复提交: id={}", id);
            return;
        }
        self.states.insert(
            id,
            RequestState {
                path_suffix,
                in_flight: None,
            },
        );
        if self.queue.push(id) {
            self.send_request(id);
        }
    }

    /// 取消请求
    ///
    /// 返回是否中止了进行中的网络请求；排队中的请求只会被移除
    pub fn cancel(&mut self, id: FileId) -> bool {
        let in_flight = match self.states.get_mut(&id) {
            Some(state) => state.in_flight.take(),
            None => return false,
        };

        match in_flight {
            Some((_, abort)) => {
                abort.cancel();
                self.dequeue(id);
                info!("已取消 {} 请求: id={}", self.options.effective_method(), id);
                self.hooks.on_cancel(id);
                true
            }
            None => {
                self.states.remove(&id);
                self.queue.dequeue(id);
                false
            }
        }
    }

    /// 处理请求完成通知
    ///
    /// 返回 `Some(is_error)`；过期或已取消的请求返回 `None`
    pub fn handle_completion(&mut self, completion: AjaxCompletion) -> Option<bool> {
        let AjaxCompletion {
            id,
            token,
            response,
        } = completion;

        let current = self
            .states
            .get(&id)
            .and_then(|state| state.in_flight.as_ref())
            .is_some_and(|(t, _)| *t == token);
        if !current {
            debug!("忽略过期的请求响应: id={}", id);
            return None;
        }

        self.dequeue(id);

        let is_error = !self.options.success_codes.contains(&response.status);
        if is_error {
            error!(
                "{} 请求失败: id={}, 状态码 {}",
                self.options.effective_method(),
                id,
                response.status
            );
        }
        self.hooks.on_complete(id, response.status, is_error);
        Some(is_error)
    }

    pub fn set_params(&mut self, params: BTreeMap<String, String>, id: Option<FileId>) {
        self.params.set(params, id);
    }

    pub fn set_endpoint(&mut self, endpoint: String, id: Option<FileId>) {
        self.endpoints.set(endpoint, id);
    }

    /// 没有排队或进行中的请求
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.queue.active_count()
    }

    /// 清空所有请求与覆盖设置
    pub fn reset(&mut self) {
        for (_, state) in self.states.drain() {
            if let Some((_, abort)) = state.in_flight {
                abort.cancel();
            }
        }
        self.queue.drain();
        self.params.reset();
        self.endpoints.reset();
    }

    fn dequeue(&mut self, id: FileId) {
        self.states.remove(&id);
        if let Some(next) = self.queue.dequeue(id) {
            self.send_request(next);
        }
    }

    fn create_url(&self, id: FileId, params: &BTreeMap<String, String>) -> String {
        let mut endpoint = self.endpoints.get(id);
        if let Some(suffix) = self.states.get(&id).and_then(|s| s.path_suffix.as_deref()) {
            endpoint.push('/');
            endpoint.push_str(suffix);
        }
        if self.options.effective_method().params_in_query() {
            append_params(&endpoint, params)
        } else {
            endpoint
        }
    }

    fn send_request(&mut self, id: FileId) {
        let method = self.options.effective_method();
        self.hooks.on_send(id);

        let params = self.params.get(id);
        let url = self.create_url(id, &params);
        let body = if method.params_in_query() {
            RequestBody::Empty
        } else {
            RequestBody::UrlEncoded(encode_params(&params))
        };
        let request = TransportRequest {
            method,
            url,
            headers: base_headers(&self.options.custom_headers),
            body,
        };

        self.next_token += 1;
        let token = RequestToken(self.next_token);
        let abort = CancellationToken::new();
        if let Some(state) = self.states.get_mut(&id) {
            state.in_flight = Some((token, abort.clone()));
        }

        info!("发送 {} 请求: id={}", method, id);

        let transport = self.transport.clone();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let progress: ProgressFn = Arc::new(|_, _| {});
            let response = tokio::select! {
                biased;
                _ = abort.cancelled() => return,
                result = transport.send(request, progress) => result,
            };
            let response = response.unwrap_or_else(|e| {
                warn!("请求未完成: id={}, 错误: {:#}", id, e);
                TransportResponse::network_failure()
            });
            sink(AjaxCompletion {
                id,
                token,
                response,
            });
        });
    }
}
