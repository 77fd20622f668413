use super::mime::{canonical_format_key, mime_for_format, mime_from_data_uri, strip_data_scheme};
use crate::error::PipelineError;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 格式描述符
///
/// 一种可导出形态（文本或二进制）的统一表示，`text` 与 `dataUri` 二选一
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDescriptor {
    pub key: String,
    pub mime_type: String,
    pub is_binary: bool,
    #[serde(flatten)]
    pub body: FormatBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormatBody {
    Text(String),
    DataUri(String),
}

impl FormatDescriptor {
    pub fn text(key: &str, mime_type: &str, text: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            mime_type: mime_type.to_string(),
            is_binary: false,
            body: FormatBody::Text(text.into()),
        }
    }

    pub fn data_uri(key: &str, mime_type: &str, uri: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            mime_type: mime_type.to_string(),
            is_binary: true,
            body: FormatBody::DataUri(uri.into()),
        }
    }

    /// 用原始字节构建 base64 data URI
    pub fn from_bytes(key: &str, mime_type: &str, bytes: &[u8]) -> Self {
        let uri = format!("data:{};base64,{}", mime_type, general_purpose::STANDARD.encode(bytes));
        Self::data_uri(key, mime_type, uri)
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            FormatBody::Text(text) => Some(text),
            FormatBody::DataUri(_) => None,
        }
    }

    pub fn as_data_uri(&self) -> Option<&str> {
        match &self.body {
            FormatBody::DataUri(uri) => Some(uri),
            FormatBody::Text(_) => None,
        }
    }

    /// 还原字节
    ///
    /// 文本直接取 UTF-8 字节；data URI 解码其 base64 段
    pub fn to_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        match &self.body {
            FormatBody::Text(text) => Ok(text.as_bytes().to_vec()),
            FormatBody::DataUri(uri) => decode_data_uri(&self.key, uri),
        }
    }
}

/// 格式载荷的几种形态
///
/// 在边界一次性判定，解码逻辑只针对具体形态
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PayloadShape<'a> {
    Absent,
    /// `data:` 开头的字符串
    DataUriString(&'a str),
    /// 普通文本
    Text(&'a str),
    /// 带 base64/buffer 编码标记的对象
    Encoded { data: &'a Value, mime: Option<&'a str> },
    /// 已构建好 data URI 的对象
    DataUriObject(&'a str),
    /// 只给出远程地址的对象
    Remote { url: &'a str, mime: Option<&'a str> },
    /// 带 `content` 字符串的对象
    Content { text: &'a str, mime: Option<&'a str> },
    /// 其他，按 JSON 文本兜底
    Json(&'a Value),
}

const ENCODING_MARKERS: [&str; 2] = ["base64", "buffer"];
const MIME_FIELDS: [&str; 5] = ["mimeType", "mime_type", "mime", "contentType", "content_type"];
const DATA_URI_FIELDS: [&str; 6] = ["dataUri", "data_uri", "dataUrl", "dataURL", "data_url", "url"];
const REMOTE_FIELDS: [&str; 5] = ["url", "downloadUrl", "download_url", "href", "link"];

impl<'a> PayloadShape<'a> {
    /// 判定载荷形态
    pub fn detect(payload: &'a Value) -> Self {
        match payload {
            Value::Null => Self::Absent,
            Value::String(s) => {
                if is_data_uri(s) {
                    Self::DataUriString(s)
                } else {
                    Self::Text(s)
                }
            }
            Value::Object(obj) => Self::detect_object(obj, payload),
            other => Self::Json(other),
        }
    }

    fn detect_object(obj: &'a Map<String, Value>, payload: &'a Value) -> Self {
        let mime = MIME_FIELDS
            .iter()
            .find_map(|f| obj.get(*f).and_then(Value::as_str))
            .filter(|m| !m.trim().is_empty());

        let marked = ["encoding", "type"].iter().any(|field| {
            obj.get(*field)
                .and_then(Value::as_str)
                .map(|v| ENCODING_MARKERS.contains(&v.trim().to_lowercase().as_str()))
                .unwrap_or(false)
        });
        if marked {
            if let Some(data) = obj.get("data").filter(|d| !d.is_null()) {
                return Self::Encoded { data, mime };
            }
        }
        if let Some(data) = obj.get("base64").filter(|d| d.is_string()) {
            return Self::Encoded { data, mime };
        }

        if let Some(uri) = DATA_URI_FIELDS
            .iter()
            .find_map(|f| obj.get(*f).and_then(Value::as_str))
            .filter(|u| is_data_uri(u))
        {
            return Self::DataUriObject(uri);
        }

        if let Some(text) = obj.get("content").and_then(Value::as_str) {
            return Self::Content { text, mime };
        }

        if let Some(url) = REMOTE_FIELDS
            .iter()
            .find_map(|f| obj.get(*f).and_then(Value::as_str))
            .filter(|u| is_remote_url(u))
        {
            return Self::Remote { url, mime };
        }

        Self::Json(payload)
    }
}

fn is_data_uri(s: &str) -> bool {
    strip_data_scheme(s).map(|rest| rest.contains(',')).unwrap_or(false)
}

fn is_remote_url(s: &str) -> bool {
    let lower = s.trim().to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// 格式载荷规范化器
///
/// 把任意编码的格式载荷（内联文本、data URI、字节数组、嵌套 buffer 包装）
/// 转换为统一的 `FormatDescriptor`
#[derive(Clone)]
pub struct FormatPayloadNormalizer;

impl FormatPayloadNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// 规范化单个格式载荷
    ///
    /// # 参数
    /// - `format_key`: 格式键（会被规范化，如 markdown → md）
    /// - `payload`: 原始载荷
    ///
    /// # 返回
    /// - `Ok(None)`: 载荷为空，或只有远程地址（需要导出侧下载）
    /// - `Err(Encoding)`: 载荷无法解码为一致的字节/文本
    pub fn normalize(
        &self,
        format_key: &str,
        payload: &Value,
    ) -> Result<Option<FormatDescriptor>, PipelineError> {
        let key = canonical_format_key(format_key);
        let table_mime = mime_for_format(&key);

        let descriptor = match PayloadShape::detect(payload) {
            PayloadShape::Absent | PayloadShape::Remote { .. } => return Ok(None),
            PayloadShape::DataUriString(uri) | PayloadShape::DataUriObject(uri) => {
                let mime = mime_from_data_uri(uri).unwrap_or(table_mime);
                FormatDescriptor::data_uri(&key, mime, uri)
            }
            PayloadShape::Text(text) => FormatDescriptor::text(&key, table_mime, text),
            PayloadShape::Encoded { data, mime } => {
                let bytes = decode_bytes(&key, data)?;
                FormatDescriptor::from_bytes(&key, mime.unwrap_or(table_mime), &bytes)
            }
            PayloadShape::Content { text, mime } => {
                FormatDescriptor::text(&key, mime.unwrap_or(table_mime), text)
            }
            PayloadShape::Json(value) => {
                FormatDescriptor::text(&key, "application/json", serde_json::to_string(value)?)
            }
        };

        Ok(Some(descriptor))
    }
}

impl Default for FormatPayloadNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// 把四种字节形态统一解码为原始字节
///
/// 支持：base64 字符串（或 data URI）、扁平数字数组、`{ data: [...] }` 嵌套包装、数字键映射
pub fn decode_bytes(key: &str, data: &Value) -> Result<Vec<u8>, PipelineError> {
    match data {
        Value::String(s) => match strip_data_scheme(s) {
            Some(_) => decode_data_uri(key, s),
            None => decode_base64(key, s),
        },
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| byte_at(key, i, item))
            .collect(),
        Value::Object(obj) => {
            if let Some(inner) = obj.get("data") {
                return decode_bytes(key, inner);
            }
            decode_indexed_map(key, obj)
        }
        other => Err(PipelineError::encoding(
            key,
            format!("无法识别的字节数据: {}", other),
        )),
    }
}

fn byte_at(key: &str, index: usize, item: &Value) -> Result<u8, PipelineError> {
    item.as_u64()
        .and_then(|n| u8::try_from(n).ok())
        .ok_or_else(|| PipelineError::encoding(key, format!("第 {} 个元素不是字节: {}", index, item)))
}

/// `{ "0": 72, "1": 101, ... }` 形式，按数字键排序
fn decode_indexed_map(key: &str, obj: &Map<String, Value>) -> Result<Vec<u8>, PipelineError> {
    let mut indexed = Vec::with_capacity(obj.len());
    for (k, v) in obj {
        let index: usize = k
            .parse()
            .map_err(|_| PipelineError::encoding(key, format!("非数字键: {}", k)))?;
        indexed.push((index, byte_at(key, index, v)?));
    }
    indexed.sort_by_key(|(index, _)| *index);

    // 键必须连续，否则字节序列不一致
    if indexed.iter().enumerate().any(|(pos, (index, _))| pos != *index) {
        return Err(PipelineError::encoding(key, "数字键不连续"));
    }

    Ok(indexed.into_iter().map(|(_, byte)| byte).collect())
}

fn decode_base64(key: &str, raw: &str) -> Result<Vec<u8>, PipelineError> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    general_purpose::STANDARD
        .decode(&cleaned)
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(&cleaned))
        .or_else(|_| general_purpose::URL_SAFE.decode(&cleaned))
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(&cleaned))
        .map_err(|e| PipelineError::encoding(key, format!("base64 解码失败: {}", e)))
}

/// 解码 data URI 的载荷段
///
/// 带 `;base64` 标记时按 base64 解码，否则按原样取字节
pub fn decode_data_uri(key: &str, uri: &str) -> Result<Vec<u8>, PipelineError> {
    let rest = strip_data_scheme(uri)
        .ok_or_else(|| PipelineError::encoding(key, "不是 data URI"))?;
    let comma = rest
        .find(',')
        .ok_or_else(|| PipelineError::encoding(key, "data URI 缺少逗号分隔"))?;
    let (header, payload) = (&rest[..comma], &rest[comma + 1..]);

    if header.to_lowercase().ends_with(";base64") {
        decode_base64(key, payload)
    } else {
        Ok(payload.as_bytes().to_vec())
    }
}
