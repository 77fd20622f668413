use crate::book::Book;
use crate::config::ExportConfig;
use crate::error::PipelineError;
use crate::format::{is_textual_format, mime_for_format, FormatDescriptor, FormatFailure};
use async_trait::async_trait;
use encoding_rs::{Encoding, GBK, UTF_8, WINDOWS_1252};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 下载得到的原始字节
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBytes {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// 按 URL 取字节的协作方
///
/// 网络细节不属于核心流水线，由实现方注入
#[async_trait]
pub trait ByteSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedBytes, PipelineError>;
}

/// 基于 reqwest 的实现
pub struct ReqwestByteSource {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestByteSource {
    pub fn new(config: &ExportConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(config.fetch_timeout_secs),
        }
    }
}

#[async_trait]
impl ByteSource for ReqwestByteSource {
    async fn fetch(&self, url: &str) -> Result<FetchedBytes, PipelineError> {
        let fetch_error = |e: reqwest::Error| {
            if e.is_timeout() {
                PipelineError::Timeout {
                    url: url.to_string(),
                    secs: self.timeout.as_secs(),
                }
            } else {
                PipelineError::Fetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let resp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(fetch_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Fetch {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty());

        let bytes = resp.bytes().await.map_err(fetch_error)?;

        Ok(FetchedBytes {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// 检测文本编码：BOM > UTF-8 > GBK 特征 > Windows-1252
pub fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _bom_length)) = Encoding::for_bom(bytes) {
        return encoding;
    }

    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }

    if looks_like_gbk(bytes) {
        return GBK;
    }

    WINDOWS_1252
}

/// 超过一半的非 ASCII 字节对符合 GBK 规则（首字节 0x81-0xFE，次字节 0x40-0xFE）
fn looks_like_gbk(bytes: &[u8]) -> bool {
    let mut gbk_pairs = 0;
    let mut total_pairs = 0;

    let mut i = 0;
    while i < bytes.len().saturating_sub(1) {
        let (b1, b2) = (bytes[i], bytes[i + 1]);
        if b1 < 0x80 {
            i += 1;
            continue;
        }

        total_pairs += 1;
        if (0x81..=0xFE).contains(&b1) && (0x40..=0xFE).contains(&b2) {
            gbk_pairs += 1;
            i += 2;
        } else {
            i += 1;
        }
    }

    total_pairs > 0 && (gbk_pairs as f32 / total_pairs as f32) > 0.5
}

/// 解码下载的文本形态，去掉 BOM
pub fn decode_text(bytes: &[u8]) -> String {
    let encoding = detect_encoding(bytes);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

/// 远程格式解析器
///
/// 下载 `Book.remote_formats` 中的格式并写回 `Book.formats`。
/// 每次下载都有超时上限；单个格式失败只记录 `FormatFailure`，其余照常进行。
pub struct RemoteFormatResolver {
    source: Box<dyn ByteSource>,
    timeout: Duration,
}

impl RemoteFormatResolver {
    pub fn new(source: Box<dyn ByteSource>, config: &ExportConfig) -> Self {
        Self {
            source,
            timeout: Duration::from_secs(config.fetch_timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 下载并规范化所有远程格式
    ///
    /// # 返回
    /// 成功写入的格式数
    pub async fn resolve(&self, book: &mut Book) -> usize {
        let pending: Vec<(String, String)> = book
            .remote_formats
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut resolved = 0;
        for (key, url) in pending {
            if book.formats.contains_key(&key) {
                debug!("格式 {} 已有内联版本，跳过下载", key);
                book.remote_formats.remove(&key);
                continue;
            }

            match self.fetch_descriptor(&key, &url).await {
                Ok(descriptor) => {
                    book.remote_formats.remove(&key);
                    book.formats.insert(key, descriptor);
                    resolved += 1;
                }
                Err(err) => {
                    warn!("远程格式 {} 下载失败: {}", key, err);
                    book.format_failures.push(FormatFailure {
                        key,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!("远程格式解析完成: {} 个成功", resolved);
        resolved
    }

    async fn fetch_descriptor(&self, key: &str, url: &str) -> Result<FormatDescriptor, PipelineError> {
        let fetched = tokio::time::timeout(self.timeout, self.source.fetch(url))
            .await
            .map_err(|_| PipelineError::Timeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            })??;

        if is_textual_format(key) {
            return Ok(FormatDescriptor::text(key, mime_for_format(key), decode_text(&fetched.bytes)));
        }

        let mime = fetched
            .content_type
            .as_deref()
            .filter(|ct| *ct != "application/octet-stream")
            .unwrap_or_else(|| mime_for_format(key));
        Ok(FormatDescriptor::from_bytes(key, mime, &fetched.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    enum Outcome {
        Bytes(Vec<u8>, Option<&'static str>),
        Fail,
        Hang,
    }

    struct FakeSource {
        outcomes: HashMap<&'static str, Outcome>,
    }

    #[async_trait]
    impl ByteSource for FakeSource {
        async fn fetch(&self, url: &str) -> Result<FetchedBytes, PipelineError> {
            match self.outcomes.get(url) {
                Some(Outcome::Bytes(bytes, ct)) => Ok(FetchedBytes {
                    bytes: bytes.clone(),
                    content_type: ct.map(str::to_string),
                }),
                Some(Outcome::Hang) => {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Err(PipelineError::Fetch {
                        url: url.to_string(),
                        reason: "unreachable".to_string(),
                    })
                }
                Some(Outcome::Fail) | None => Err(PipelineError::Fetch {
                    url: url.to_string(),
                    reason: "HTTP 404 Not Found".to_string(),
                }),
            }
        }
    }

    fn book_with_remote(entries: &[(&str, &str)]) -> Book {
        let mut book = Book::default();
        for (key, url) in entries {
            book.remote_formats.insert(key.to_string(), url.to_string());
        }
        book
    }

    #[tokio::test]
    async fn test_resolve_mixed_outcomes() {
        let mut outcomes = HashMap::new();
        outcomes.insert("https://cdn/book.pdf", Outcome::Bytes(vec![37, 80, 68, 70], Some("application/pdf")));
        outcomes.insert("https://cdn/book.md", Outcome::Bytes("\u{feff}# Title".as_bytes().to_vec(), None));
        outcomes.insert("https://cdn/book.epub", Outcome::Fail);
        outcomes.insert("https://cdn/book.docx", Outcome::Hang);

        let resolver = RemoteFormatResolver::new(Box::new(FakeSource { outcomes }), &ExportConfig::default())
            .with_timeout(Duration::from_millis(50));

        let mut book = book_with_remote(&[
            ("pdf", "https://cdn/book.pdf"),
            ("md", "https://cdn/book.md"),
            ("epub", "https://cdn/book.epub"),
            ("docx", "https://cdn/book.docx"),
        ]);

        let resolved = resolver.resolve(&mut book).await;
        assert_eq!(resolved, 2);

        let pdf = book.format("pdf").unwrap();
        assert!(pdf.is_binary);
        assert_eq!(pdf.to_bytes().unwrap(), vec![37, 80, 68, 70]);
        assert_eq!(book.format("markdown").unwrap().as_text(), Some("# Title"));

        let failed: Vec<_> = book.format_failures.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(failed, vec!["docx", "epub"]);
        assert!(book.format_failures[0].reason.contains("超时"));
        assert_eq!(book.remote_formats.len(), 2);
    }

    #[tokio::test]
    async fn test_inline_format_is_not_refetched() {
        let resolver = RemoteFormatResolver::new(
            Box::new(FakeSource { outcomes: HashMap::new() }),
            &ExportConfig::default(),
        );
        let mut book = book_with_remote(&[("html", "https://cdn/book.html")]);
        book.formats.insert(
            "html".to_string(),
            FormatDescriptor::text("html", "text/html", "<p>inline</p>"),
        );

        assert_eq!(resolver.resolve(&mut book).await, 0);
        assert!(book.format_failures.is_empty());
        assert!(book.remote_formats.is_empty());
    }

    #[test]
    fn test_decode_text_encodings() {
        assert_eq!(decode_text("plain".as_bytes()), "plain");
        assert_eq!(decode_text(&[0xEF, 0xBB, 0xBF, b'h', b'i']), "hi");

        let (gbk, _, _) = GBK.encode("第一章");
        assert_eq!(detect_encoding(&gbk), GBK);
        assert_eq!(decode_text(&gbk), "第一章");
    }
}
