use thiserror::Error;

/// 流水线错误
///
/// 所有错误都在最小工作单元处产生、记录并跳过，
/// 不会让 `normalize` / `aggregate` / `recover` 整体失败
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("输入格式异常: {field}: {reason}")]
    MalformedInput { field: String, reason: String },
    #[error("章节边界无法确定: {0}")]
    AmbiguousExtraction(String),
    #[error("格式 {key} 解码失败: {reason}")]
    Encoding { key: String, reason: String },
    #[error("无法从交互日志恢复: {0}")]
    RecoveryUnavailable(String),
    #[error("获取远程格式失败 {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("获取远程格式超时 {url}（{secs} 秒）")]
    Timeout { url: String, secs: u64 },
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn malformed(field: &str, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn encoding(key: &str, reason: impl Into<String>) -> Self {
        Self::Encoding {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
