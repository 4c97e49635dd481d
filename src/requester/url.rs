// 查询字符串与 URL 拼接

use std::collections::BTreeMap;

/// 将参数编码为查询字符串，空格编码为 `+`
pub fn encode_params(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(name, value)| format!("{}={}", urlencoding::encode(name), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
        .replace("%20", "+")
}

/// 把参数附加到地址上
///
/// 地址已带 `?` 时用 `&` 连接，以 `?` 结尾时直接拼接
pub fn append_params(endpoint: &str, params: &BTreeMap<String, String>) -> String {
    let query = encode_params(params);
    if query.is_empty() {
        return endpoint.to_string();
    }

    let separator = if endpoint.ends_with('?') {
        ""
    } else if endpoint.contains('?') {
        "&"
    } else {
        "?"
    };
    format!("{}{}{}", endpoint, separator, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_encode_params() {
        let encoded = encode_params(&params(&[("qqfile", "my file.bin"), ("a", "x&y")]));
        assert_eq!(encoded, "a=x%26y&qqfile=my+file.bin");
    }

    #[test]
    fn test_append_params() {
        let p = params(&[("k", "v")]);
        assert_eq!(append_params("/upload", &p), "/upload?k=v");
        assert_eq!(append_params("/upload?x=1", &p), "/upload?x=1&k=v");
        assert_eq!(append_params("/upload?", &p), "/upload?k=v");
        assert_eq!(append_params("/upload", &BTreeMap::new()), "/upload");
    }
}
