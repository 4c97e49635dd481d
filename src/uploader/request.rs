// 上传请求构造
//
// 规则：
// - params_in_body 或 force_multipart 时使用 multipart/form-data
// - 参数不放在请求体时附加到查询字符串
// - 非 multipart 请求直接发送原始字节，并设置 Content-Type: application/octet-stream

use super::chunk::ChunkDescriptor;
use super::task::FileRecord;
use crate::config::UploadConfig;
use crate::requester::base_headers;
use crate::requester::url::append_params;
use crate::transport::{HttpMethod, RequestBody, TransportRequest};
use std::collections::BTreeMap;

/// 请求体编码方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadEncoding {
    Multipart {
        fields: Vec<(String, String)>,
        file_field: String,
        file_name: String,
    },
    Raw,
}

/// 除文件数据外已确定的请求内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequestPlan {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub encoding: PayloadEncoding,
}

impl UploadRequestPlan {
    /// 填入文件数据
    pub fn into_request(self, payload: Vec<u8>) -> TransportRequest {
        let body = match self.encoding {
            PayloadEncoding::Multipart {
                fields,
                file_field,
                file_name,
            } => RequestBody::Multipart {
                fields,
                file_field,
                file_name,
                payload,
            },
            PayloadEncoding::Raw => RequestBody::Raw(payload),
        };
        TransportRequest {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body,
        }
    }
}

/// 上传请求构造器
#[derive(Debug, Clone, Copy)]
pub struct UploadRequestBuilder<'a> {
    config: &'a UploadConfig,
}

impl<'a> UploadRequestBuilder<'a> {
    pub fn new(config: &'a UploadConfig) -> Self {
        Self { config }
    }

    pub fn multipart(&self) -> bool {
        self.config.request.force_multipart || self.config.request.params_in_body
    }

    pub fn method(&self) -> HttpMethod {
        if self.config.demo_mode {
            HttpMethod::Get
        } else {
            HttpMethod::Post
        }
    }

    /// 分片相关参数
    pub fn chunk_params(&self, record: &FileRecord, chunk: &ChunkDescriptor) -> BTreeMap<String, String> {
        let names = &self.config.chunking.param_names;
        let mut params = BTreeMap::new();
        params.insert(names.part_index.clone(), chunk.part.to_string());
        params.insert(names.part_byte_offset.clone(), chunk.start.to_string());
        params.insert(names.chunk_size.clone(), chunk.size().to_string());
        params.insert(names.total_parts.clone(), chunk.count.to_string());
        params.insert(names.total_file_size.clone(), record.size.to_string());
        if self.multipart() {
            params.insert(names.filename.clone(), record.name.clone());
        }
        if record.attempting_resume {
            params.insert(self.config.resume.resuming_param_name.clone(), "true".to_string());
        }
        params
    }

    /// 构造请求
    ///
    /// `params` 为该文件生效的自定义参数（已合并分片参数）
    pub fn build(
        &self,
        record: &FileRecord,
        endpoint: &str,
        mut params: BTreeMap<String, String>,
    ) -> UploadRequestPlan {
        let request = &self.config.request;
        let multipart = self.multipart();

        params.insert(request.uuid_name.clone(), record.uuid.clone());
        if multipart {
            params.insert(request.total_file_size_name.clone(), record.size.to_string());
            if record.is_blob() {
                params.insert(self.config.blobs.name_param.clone(), record.name.clone());
            }
        }

        let mut url = endpoint.to_string();
        if !request.params_in_body {
            if !multipart {
                params.insert(request.input_name.clone(), record.name.clone());
            }
            url = append_params(endpoint, &params);
        }

        let mut headers = base_headers(&request.custom_headers);
        let encoding = if multipart {
            let fields = if request.params_in_body {
                params.into_iter().collect()
            } else {
                Vec::new()
            };
            PayloadEncoding::Multipart {
                fields,
                file_field: request.input_name.clone(),
                file_name: record.name.clone(),
            }
        } else {
            headers.push((
                "Content-Type".to_string(),
                "application/octet-stream".to_string(),
            ));
            PayloadEncoding::Raw
        };

        UploadRequestPlan {
            method: self.method(),
            url,
            headers,
            encoding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::task::{BlobData, UploadSource};
    use crate::uploader::FileId;

    fn record(name: &str, size: usize) -> FileRecord {
        let source = UploadSource::Blob(BlobData::named(name, vec![0; size]));
        let mut record = FileRecord::new(FileId(0), source, name.to_string());
        record.uuid = "u-1".to_string();
        record
    }

    fn field<'a>(plan: &'a UploadRequestPlan, name: &str) -> Option<&'a str> {
        match &plan.encoding {
            PayloadEncoding::Multipart { fields, .. } => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            PayloadEncoding::Raw => None,
        }
    }

    #[test]
    fn test_default_multipart_params_in_body() {
        let config = UploadConfig::default();
        let builder = UploadRequestBuilder::new(&config);
        let record = record("a.bin", 10);
        let mut params = BTreeMap::new();
        params.insert("custom".to_string(), "1".to_string());

        let plan = builder.build(&record, "/server/upload", params);
        assert_eq!(plan.method, HttpMethod::Post);
        assert_eq!(plan.url, "/server/upload");
        assert_eq!(field(&plan, "qquuid"), Some("u-1"));
        assert_eq!(field(&plan, "qqtotalfilesize"), Some("10"));
        assert_eq!(field(&plan, "qqblobname"), Some("a.bin"));
        assert_eq!(field(&plan, "custom"), Some("1"));
        assert!(!plan
            .headers
            .iter()
            .any(|(name, _)| name == "Content-Type"));

        match plan.into_request(vec![1, 2]).body {
            RequestBody::Multipart {
                file_field,
                file_name,
                payload,
                ..
            } => {
                assert_eq!(file_field, "qqfile");
                assert_eq!(file_name, "a.bin");
                assert_eq!(payload, vec![1, 2]);
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_raw_body_with_query_params() {
        let mut config = UploadConfig::default();
        config.request.params_in_body = false;
        config.request.force_multipart = false;
        let builder = UploadRequestBuilder::new(&config);

        let plan = builder.build(&record("my file.bin", 4), "/up", BTreeMap::new());
        assert_eq!(plan.encoding, PayloadEncoding::Raw);
        assert_eq!(plan.url, "/up?qqfile=my+file.bin&qquuid=u-1");
        assert!(plan.headers.contains(&(
            "Content-Type".to_string(),
            "application/octet-stream".to_string()
        )));
    }

    #[test]
    fn test_chunk_params() {
        let mut config = UploadConfig::default();
        config.chunking.enabled = true;
        let builder = UploadRequestBuilder::new(&config);
        let mut record = record("a.bin", 10);
        record.attempting_resume = true;

        let chunk = crate::uploader::chunk::chunk_at(1, 10, 4);
        let params = builder.chunk_params(&record, &chunk);
        assert_eq!(params["qqpartindex"], "1");
        assert_eq!(params["qqpartbyteoffset"], "4");
        assert_eq!(params["qqchunksize"], "4");
        assert_eq!(params["qqtotalparts"], "3");
        assert_eq!(params["qqtotalfilesize"], "10");
        assert_eq!(params["qqfilename"], "a.bin");
        assert_eq!(params["qqresume"], "true");
    }

    #[test]
    fn test_demo_mode_uses_get() {
        let mut config = UploadConfig::default();
        config.demo_mode = true;
        let builder = UploadRequestBuilder::new(&config);
        assert_eq!(builder.build(&record("a", 1), "/up", BTreeMap::new()).method, HttpMethod::Get);
    }
}
