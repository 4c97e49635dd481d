// 上传响应解析
//
// 响应体为 JSON 对象：
// - success: 是否成功
// - reset: 服务器要求从第一个分片重新上传
// - error: 失败原因
// 无法解析的响应按空对象处理（即失败）

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::error;

/// 上传请求的成功状态码
pub const UPLOAD_SUCCESS_STATUS: u16 = 200;

/// 解析后的上传响应
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UploadResponse {
    body: Map<String, Value>,
    #[serde(skip)]
    parse_error: Option<String>,
}

impl UploadResponse {
    /// 解析响应体，失败时返回空响应并记录错误
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(body)) => Self {
                body,
                parse_error: None,
            },
            Ok(other) => {
                error!("上传响应不是 JSON 对象: {}", other);
                Self::unparsed(format!("响应不是 JSON 对象: {}", other))
            }
            Err(e) => {
                error!("解析上传响应失败 ({})", e);
                Self::unparsed(e.to_string())
            }
        }
    }

    fn unparsed(reason: String) -> Self {
        Self {
            body: Map::new(),
            parse_error: Some(reason),
        }
    }

    pub fn from_map(body: Map<String, Value>) -> Self {
        Self {
            body,
            parse_error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.body.get("success").and_then(Value::as_bool) == Some(true)
    }

    pub fn is_reset(&self) -> bool {
        self.flag("reset")
    }

    /// 服务器给出的错误描述
    pub fn error(&self) -> Option<&str> {
        self.body
            .get("error")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn parse_error(&self) -> Option<&str> {
        self.parse_error.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }

    /// 属性是否为真值（true、非零数字、非空字符串）
    pub fn flag(&self, key: &str) -> bool {
        match self.body.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
            Some(Value::Null) | None => false,
        }
    }

    /// 是否为失败响应
    pub fn is_error_response(&self, status: u16) -> bool {
        status != UPLOAD_SUCCESS_STATUS || !self.is_success() || self.is_reset()
    }

    /// 失败响应对应的错误原因
    ///
    /// 状态码不是 200 且响应没有 error 字段时报告状态码
    pub fn failure_reason(&self, status: u16) -> String {
        if status != UPLOAD_SUCCESS_STATUS && self.error().is_none() {
            format!("XHR returned response code {}", status)
        } else {
            self.error()
                .unwrap_or("Upload failure reason unknown")
                .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let response = UploadResponse::parse(r#"{"success":true,"newUuid":"x"}"#);
        assert!(response.is_success());
        assert!(!response.is_reset());
        assert!(!response.is_error_response(200));
        assert!(response.is_error_response(500));
        assert_eq!(response.get("newUuid"), Some(&Value::String("x".to_string())));
    }

    #[test]
    fn test_reset_is_error() {
        let response = UploadResponse::parse(r#"{"success":false,"reset":true}"#);
        assert!(response.is_reset());
        assert!(response.is_error_response(200));

        // success 与 reset 同时为真仍视为失败
        let response = UploadResponse::parse(r#"{"success":true,"reset":true}"#);
        assert!(response.is_error_response(200));
    }

    #[test]
    fn test_malformed_response_is_empty_failure() {
        for text in ["", "not json", "[1,2]", "\"ok\""] {
            let response = UploadResponse::parse(text);
            assert!(response.as_map().is_empty());
            assert!(response.parse_error().is_some());
            assert!(response.is_error_response(200));
        }
    }

    #[test]
    fn test_failure_reason() {
        let empty = UploadResponse::default();
        assert_eq!(empty.failure_reason(500), "XHR returned response code 500");
        assert_eq!(empty.failure_reason(200), "Upload failure reason unknown");

        let with_error = UploadResponse::parse(r#"{"error":"磁盘已满"}"#);
        assert_eq!(with_error.failure_reason(500), "磁盘已满");
        assert_eq!(with_error.failure_reason(200), "磁盘已满");
    }

    #[test]
    fn test_flag_truthiness() {
        let response = UploadResponse::parse(
            r#"{"a":true,"b":1,"c":"yes","d":false,"e":0,"f":"","g":null}"#,
        );
        for key in ["a", "b", "c"] {
            assert!(response.flag(key), "{}", key);
        }
        for key in ["d", "e", "f", "g", "missing"] {
            assert!(!response.flag(key), "{}", key);
        }
    }
}
