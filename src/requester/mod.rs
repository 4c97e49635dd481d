// 请求调度模块
//
// - queue: 有界并发队列（上传与删除共用同一套槽位规则）
// - ajax: 通用的非上传请求
// - delete: 删除文件请求

pub mod ajax;
pub mod delete;
pub mod overrides;
pub mod queue;
pub mod url;

pub use ajax::{AjaxCompletion, AjaxOptions, AjaxRequester, CompletionSink, RequesterHooks};
pub use delete::{DeleteFileRequester, DELETE_SUCCESS_CODES};
pub use overrides::OverrideStore;
pub use queue::RequestQueue;

use std::collections::BTreeMap;

/// 所有请求共有的请求头，自定义请求头在后
pub fn base_headers(custom: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut headers = vec![
        ("X-Requested-With".to_string(), "XMLHttpRequest".to_string()),
        ("Cache-Control".to_string(), "no-cache".to_string()),
    ];
    headers.extend(custom.iter().map(|(k, v)| (k.clone(), v.clone())));
    headers
}
