// 格式载荷模块
// 把各种编码的导出格式统一为 FormatDescriptor

pub mod mime;
pub mod payload;

pub use mime::{canonical_format_key, is_textual_format, mime_for_format};
pub use payload::{FormatBody, FormatDescriptor, FormatPayloadNormalizer, PayloadShape};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// 单个格式的失败标记
///
/// 某个格式解码或下载失败时记录在书籍上，其余格式照常处理
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatFailure {
    pub key: String,
    pub reason: String,
}

/// 一批格式载荷的规范化结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedFormats {
    pub formats: BTreeMap<String, FormatDescriptor>,
    /// 只有远程地址的格式：键 → URL
    pub remote: BTreeMap<String, String>,
    pub failures: Vec<FormatFailure>,
}

impl FormatPayloadNormalizer {
    /// 批量规范化
    ///
    /// 同一规范键出现多次时保留第一个成功的版本；单个格式失败只记录、不中断
    pub fn normalize_all<'a>(
        &self,
        entries: impl IntoIterator<Item = (&'a String, &'a Value)>,
    ) -> NormalizedFormats {
        let mut result = NormalizedFormats::default();

        for (raw_key, payload) in entries {
            let key = canonical_format_key(raw_key);
            if result.formats.contains_key(&key) {
                debug!("格式 {} 已存在，忽略重复载荷", key);
                continue;
            }

            if let PayloadShape::Remote { url, .. } = PayloadShape::detect(payload) {
                result.remote.entry(key).or_insert_with(|| url.to_string());
                continue;
            }

            match self.normalize(&key, payload) {
                Ok(Some(descriptor)) => {
                    result.remote.remove(&key);
                    result.formats.insert(key, descriptor);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("跳过格式 {}: {}", key, err);
                    result.failures.push(FormatFailure {
                        key,
                        reason: err.to_string(),
                    });
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_all_isolates_failures() {
        let formats = json!({
            "markdown": "# Book",
            "pdf": {"encoding": "base64", "data": [1, 999]},
            "epub": {"url": "https://cdn.example.com/book.epub"},
            "html": "<h1>Book</h1>",
            "md": "# Duplicate"
        });

        let result = FormatPayloadNormalizer::new().normalize_all(formats.as_object().unwrap());

        assert_eq!(result.formats.len(), 2);
        assert_eq!(result.formats["md"].as_text(), Some("# Book"));
        assert!(result.formats.contains_key("html"));
        assert_eq!(result.remote["epub"], "https://cdn.example.com/book.epub");
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].key, "pdf");
    }
}
