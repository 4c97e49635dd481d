// 基于 reqwest 的 HTTP 传输
//
// 请求体按固定大小切片，以流的形式交给 reqwest，
// 每发出一片就报告一次进度

use super::{HttpMethod, ProgressFn, RequestBody, Transport, TransportRequest, TransportResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method};
use tracing::debug;

/// 进度报告的切片大小: 64KB
const PROGRESS_SLICE_SIZE: usize = 64 * 1024;

/// multipart 中文件部分的 Content-Type
const OCTET_STREAM: &str = "application/octet-stream";

/// HTTP 传输
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// 创建 HTTP 传输（不设置超时，停滞的请求只能由调用方取消）
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self { client })
    }

    /// 使用已有的客户端
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: TransportRequest,
        progress: ProgressFn,
    ) -> Result<TransportResponse> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Delete => Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        // GET/DELETE 不携带请求体
        let body = if request.method.params_in_query() {
            RequestBody::Empty
        } else {
            request.body
        };

        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::UrlEncoded(encoded) => builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encoded),
            RequestBody::Raw(payload) => {
                let total = payload.len() as u64;
                builder.body(progress_body(payload, 0, total, progress))
            }
            RequestBody::Multipart {
                fields,
                file_field,
                file_name,
                payload,
            } => {
                let mut form = Form::new();
                for (name, value) in &fields {
                    form = form.text(name.clone(), value.clone());
                }

                let overhead = multipart_overhead(form.boundary(), &fields, &file_field, &file_name);
                let payload_len = payload.len() as u64;
                let total = payload_len + overhead;

                let part = Part::stream_with_length(
                    progress_body(payload, overhead, total, progress),
                    payload_len,
                )
                .file_name(file_name)
                .mime_str(OCTET_STREAM)
                .context("设置 multipart 文件类型失败")?;

                builder.multipart(form.part(file_field, part))
            }
        };

        debug!("发送 {} 请求: {}", request.method, request.url);

        let response = builder.send().await.context("请求发送失败")?;
        let status = response.status().as_u16();
        let body = response.text().await.context("读取响应内容失败")?;

        debug!("收到响应: status={}, body_len={}", status, body.len());

        Ok(TransportResponse { status, body })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// 构造带进度报告的请求体
///
/// `overhead` 为请求中文件数据之外的字节数，最后一片发出时 loaded == total
fn progress_body(payload: Vec<u8>, overhead: u64, total: u64, progress: ProgressFn) -> Body {
    if payload.is_empty() {
        progress(total, total);
        return Body::from(payload);
    }

    let payload_len = payload.len() as u64;
    let slices: Vec<Vec<u8>> = payload
        .chunks(PROGRESS_SLICE_SIZE)
        .map(|slice| slice.to_vec())
        .collect();

    let mut sent = 0u64;
    let stream = futures::stream::iter(slices).map(move |slice| {
        sent += slice.len() as u64;
        let loaded = if sent >= payload_len {
            total
        } else {
            sent + overhead
        };
        progress(loaded, total);
        Ok::<_, std::io::Error>(slice)
    });

    Body::wrap_stream(stream)
}

/// 估算 multipart 编码带来的额外字节数
///
/// 每个字段：`--{boundary}\r\n` + 头部 + `\r\n\r\n` + 内容 + `\r\n`，结尾 `--{boundary}--\r\n`
fn multipart_overhead(
    boundary: &str,
    fields: &[(String, String)],
    file_field: &str,
    file_name: &str,
) -> u64 {
    let delimiter = 2 + boundary.len() + 2;

    let text_fields: usize = fields
        .iter()
        .map(|(name, value)| {
            let header = format!("Content-Disposition: form-data; name=\"{}\"", name);
            delimiter + header.len() + 4 + value.len() + 2
        })
        .sum();

    let file_header = format!(
        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}",
        file_field, file_name, OCTET_STREAM
    );
    let file_part = delimiter + file_header.len() + 4 + 2;

    let closing = 2 + boundary.len() + 2 + 2;

    (text_fields + file_part + closing) as u64
}
