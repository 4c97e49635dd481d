// 传输层
//
// 上传状态机与具体网络实现解耦，只依赖：
// - send(request) -> 异步响应
// - 通过 CancellationToken 中止进行中的请求（由调度方持有）
//
// 所有传输实现遵循同一个接口，在引擎构建时选定

pub mod http;

pub use http::HttpTransport;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 进度回调：(已发送字节数, 请求总字节数)
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    /// GET/DELETE 请求的参数放在查询字符串中
    pub fn params_in_query(&self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// 请求体
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// 无请求体
    Empty,
    /// application/x-www-form-urlencoded
    UrlEncoded(String),
    /// 原始字节（application/octet-stream）
    Raw(Vec<u8>),
    /// multipart/form-data：普通字段 + 一个文件字段
    Multipart {
        fields: Vec<(String, String)>,
        file_field: String,
        file_name: String,
        payload: Vec<u8>,
    },
}

impl RequestBody {
    /// 请求体中的文件数据大小
    pub fn payload_len(&self) -> u64 {
        match self {
            RequestBody::Empty | RequestBody::UrlEncoded(_) => 0,
            RequestBody::Raw(payload) => payload.len() as u64,
            RequestBody::Multipart { payload, .. } => payload.len() as u64,
        }
    }
}

/// 待发送的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

/// 服务器响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    /// 连接失败等没有拿到 HTTP 响应的情况，状态码记为 0
    pub fn network_failure() -> Self {
        Self {
            status: 0,
            body: String::new(),
        }
    }
}

/// 传输接口
#[async_trait]
pub trait Transport: Send + Sync {
    /// 发送请求
    ///
    /// 发送过程中通过 `progress` 报告进度；中止由调用方丢弃该 future 完成
    async fn send(&self, request: TransportRequest, progress: ProgressFn)
        -> Result<TransportResponse>;

    /// 传输实现名称（日志用）
    fn name(&self) -> &'static str;
}
