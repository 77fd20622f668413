// 流水线配置
// 两套历史 schema 并存，字段别名全部收敛在这里，而不是散落在各个组件里

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("配置解析失败: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("配置无效: {0}")]
    Invalid(String),
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// 字段别名表
///
/// 每个列表按优先级排列，取第一个非空值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldAliases {
    // 执行记录
    pub nested_container: Vec<String>,
    pub execution_id: Vec<String>,
    pub current_node_id: Vec<String>,
    pub failed_node_id: Vec<String>,
    pub status: Vec<String>,
    pub progress: Vec<String>,
    pub error: Vec<String>,
    pub completion_markers: Vec<String>,
    pub node_results: Vec<String>,
    pub ai_outputs: Vec<String>,
    pub processing_steps: Vec<String>,
    pub story_context: Vec<String>,
    pub user_input: Vec<String>,
    pub checkpoint_data: Vec<String>,
    pub all_formats: Vec<String>,
    pub metadata: Vec<String>,
    pub chapter_info: Vec<String>,

    // 节点结果
    pub node_id: Vec<String>,
    pub node_name: Vec<String>,
    pub node_type: Vec<String>,
    pub node_content: Vec<String>,
    pub node_tokens: Vec<String>,
    pub node_words: Vec<String>,
    pub provider_name: Vec<String>,
    pub live_markers: Vec<String>,

    // 章节条目
    pub chapter_number: Vec<String>,
    pub chapter_title: Vec<String>,
    pub chapter_content: Vec<String>,
    pub chapter_images: Vec<String>,
    pub sections: Vec<String>,

    // 书籍
    pub book_title: Vec<String>,
    pub persisted_book: Vec<String>,
    pub book_id: Vec<String>,
    pub image_placement: Vec<String>,
    pub image_url: Vec<String>,
    pub image_prompt: Vec<String>,
    pub foreword: Vec<String>,
    pub introduction: Vec<String>,
    pub table_of_contents: Vec<String>,

    // 恢复路径
    pub input_data: Vec<String>,
    /// 判断日志条目是否为输入节点时检查的字段（不含标题类字段）
    pub log_entry_role: Vec<String>,
    pub generation_text: Vec<String>,
    pub processed_content: Vec<String>,
    pub genre: Vec<String>,
    pub theme: Vec<String>,
}

impl Default for FieldAliases {
    fn default() -> Self {
        Self {
            nested_container: names(&["executionData", "execution_data"]),
            execution_id: names(&["executionId", "execution_id", "runId", "run_id", "id"]),
            current_node_id: names(&["currentNodeId", "current_node_id", "currentNode", "activeNodeId"]),
            failed_node_id: names(&["failedNodeId", "failed_node_id", "errorNodeId", "error_node_id"]),
            status: names(&["status", "executionStatus", "execution_status", "state"]),
            progress: names(&["progress", "progressPercent", "progress_percent"]),
            error: names(&["error", "errorMessage", "error_message"]),
            completion_markers: names(&["completedAt", "completed_at", "finishedAt", "isComplete", "is_complete"]),
            node_results: names(&["nodeResults", "node_results", "results"]),
            ai_outputs: names(&["aiOutputs", "ai_outputs", "outputs"]),
            processing_steps: names(&["processingSteps", "processing_steps", "steps"]),
            story_context: names(&["storyContext", "story_context"]),
            user_input: names(&["userInput", "user_input", "inputs"]),
            checkpoint_data: names(&["checkpointData", "checkpoint_data", "checkpoint"]),
            all_formats: names(&["allFormats", "all_formats", "formats"]),
            metadata: names(&["metadata", "meta"]),
            chapter_info: names(&["chapterInfo", "chapter_info"]),

            node_id: names(&["nodeId", "node_id", "id"]),
            node_name: names(&["nodeName", "node_name", "name", "label", "title"]),
            node_type: names(&["type", "nodeType", "node_type"]),
            node_content: names(&["content", "output", "result", "text"]),
            node_tokens: names(&["tokens", "tokenCount", "token_count", "tokensUsed"]),
            node_words: names(&["words", "wordCount", "word_count"]),
            provider_name: names(&["providerName", "provider_name", "provider", "model"]),
            live_markers: names(&["isLive", "is_live", "live", "isStreaming", "streaming"]),

            chapter_number: names(&["number", "chapterNumber", "chapter_number", "chapter"]),
            chapter_title: names(&["title", "chapterTitle", "chapter_title", "name"]),
            chapter_content: names(&["content", "text", "body", "chapterContent", "chapter_content"]),
            chapter_images: names(&["images", "imageUrl", "image_url", "image"]),
            sections: names(&["sections", "compiledSections", "compiled_sections"]),

            book_title: names(&["bookTitle", "book_title", "storyTitle", "story_title", "title"]),
            persisted_book: names(&["persistedBook", "persisted_book", "savedBook", "book"]),
            book_id: names(&["bookId", "book_id"]),
            image_placement: names(&["imagePlacement", "image_placement"]),
            image_url: names(&["url", "imageUrl", "image_url", "image", "dataUri", "src"]),
            image_prompt: names(&["prompt", "caption", "alt", "description"]),
            foreword: names(&["foreword", "preface"]),
            introduction: names(&["introduction", "intro"]),
            table_of_contents: names(&["tableOfContents", "table_of_contents", "toc"]),

            log_entry_role: names(&["nodeName", "node_name", "name", "type", "nodeType", "node_type"]),
            input_data: names(&["inputData", "input_data", "receivedParameters", "received_parameters", "input", "parameters"]),
            generation_text: names(&["generatedText", "generated_text", "aiResponse", "ai_response", "response", "generation"]),
            processed_content: names(&["processedContent", "processed_content", "content"]),
            genre: names(&["genre"]),
            theme: names(&["theme"]),
        }
    }
}

/// 章节挖掘阈值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MiningConfig {
    /// 含标题行的章节片段最小字符数，低于此值视为噪声
    pub min_chapter_chars: usize,
    /// 无标题时整段作为单章的最小字符数
    pub min_prose_chars: usize,
    /// 计划/大纲检测只看开头这么多字符
    pub plan_scan_chars: usize,
    pub plan_markers: Vec<String>,
    /// 节点名或类型包含这些标记即视为写作节点
    pub writer_markers: Vec<String>,
    pub final_output_markers: Vec<String>,
    pub image_markers: Vec<String>,
    /// 标题包含这些词时视为通用标题
    pub generic_title_words: Vec<String>,
    /// 从正文首行推导标题时的最大长度
    pub max_derived_title_chars: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            min_chapter_chars: 40,
            min_prose_chars: 200,
            plan_scan_chars: 800,
            plan_markers: names(&["chapter_number", "outline", "table_of_contents", "chapter_outline"]),
            writer_markers: names(&["writer", "chapter"]),
            final_output_markers: names(&["final_output", "final output", "compiler", "compiled"]),
            image_markers: names(&["image", "illustration"]),
            generic_title_words: names(&["output"]),
            max_derived_title_chars: 80,
        }
    }
}

/// 恢复路径阈值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecoveryConfig {
    pub min_generation_chars: usize,
    pub min_processed_chars: usize,
    pub default_title: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            min_generation_chars: 200,
            min_processed_chars: 200,
            default_title: "Untitled Book".to_string(),
        }
    }
}

/// 导出/下载配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportConfig {
    pub fetch_timeout_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { fetch_timeout_secs: 30 }
    }
}

/// 流水线总配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    pub aliases: FieldAliases,
    pub mining: MiningConfig,
    pub recovery: RecoveryConfig,
    pub export: ExportConfig,
}

impl PipelineConfig {
    /// 从 JSON 字符串解析配置，缺省字段使用默认值
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(content)?;
        validate_config(&config)?;
        Ok(config)
    }
}

/// 从 JSON 文件加载配置
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    PipelineConfig::from_json_str(&content)
}

fn validate_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.mining.min_prose_chars == 0 {
        return Err(ConfigError::Invalid(
            "mining.minProseChars must be > 0".to_string(),
        ));
    }

    if config.mining.plan_scan_chars == 0 {
        return Err(ConfigError::Invalid(
            "mining.planScanChars must be > 0".to_string(),
        ));
    }

    if config.export.fetch_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "export.fetchTimeoutSecs must be > 0".to_string(),
        ));
    }

    let aliases = &config.aliases;
    let required = [
        ("aliases.nodeResults", &aliases.node_results),
        ("aliases.nodeId", &aliases.node_id),
        ("aliases.chapterContent", &aliases.chapter_content),
        ("aliases.bookTitle", &aliases.book_title),
    ];
    for (name, list) in required {
        if list.is_empty() {
            return Err(ConfigError::Invalid(format!("{} must not be empty", name)));
        }
    }

    Ok(())
}
