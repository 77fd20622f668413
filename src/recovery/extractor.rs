use crate::book::render::fill_missing_formats;
use crate::book::{derive_book_id, Book, Chapter, ChapterMetadata, ImagePlacement, Provenance};
use crate::config::{FieldAliases, PipelineConfig, RecoveryConfig};
use crate::error::PipelineError;
use crate::merge::{first_object, first_present, first_string};
use crate::mining::{candidate_from_entry, ChapterOrigin, ChapterTextMiner};
use crate::text::word_count;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// 日志条目上可能包着真正负载的子对象
const NESTED_PAYLOAD_KEYS: [&str; 5] = ["output", "outputData", "output_data", "result", "data"];

/// 从日志恢复出的章节
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveredChapter {
    pub number: u32,
    pub title: String,
    pub content: String,
    pub word_count: usize,
    /// 产出该章节的日志条目下标
    pub entry_index: usize,
}

/// 从日志恢复出的最小书籍
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveredBook {
    pub title: String,
    pub genre: Option<String>,
    pub theme: Option<String>,
    pub chapters: Vec<RecoveredChapter>,
    pub total_words: usize,
    pub input_data: Map<String, Value>,
}

impl RecoveredBook {
    /// 转为完整的 `Book`，补齐 html / md / txt，供编辑和导出协作方使用
    pub fn into_book(self) -> Book {
        let chapters = self
            .chapters
            .into_iter()
            .map(|c| Chapter {
                id: Chapter::anchor_id(c.number),
                number: c.number,
                title: c.title,
                content: c.content,
                images: Vec::new(),
                image_placement: ImagePlacement::Inline,
                word_count: c.word_count,
                metadata: ChapterMetadata {
                    source: ChapterOrigin::Fallback,
                    node_id: None,
                    extra: Map::new(),
                },
            })
            .collect();

        let mut book = Book {
            book_id: derive_book_id(&self.title),
            title: self.title,
            chapters,
            provenance: Provenance {
                user_input: self.input_data,
                ..Default::default()
            },
            ..Default::default()
        };
        fill_missing_formats(&mut book);
        book
    }
}

/// 恢复结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub can_recover: bool,
    /// 无法恢复时的原因
    pub reason: Option<String>,
    pub book: Option<RecoveredBook>,
}

impl RecoveryReport {
    fn unavailable(err: PipelineError) -> Self {
        Self {
            can_recover: false,
            reason: Some(err.to_string()),
            book: None,
        }
    }
}

/// 日志恢复提取器
///
/// 主执行记录不可用时的降级路径：只看交互日志数组，不依赖 `ExecutionRecord`。
/// 单个条目格式错误时记录并跳过，不影响其余条目。
pub struct RecoveryExtractor {
    aliases: FieldAliases,
    config: RecoveryConfig,
    miner: ChapterTextMiner,
}

impl RecoveryExtractor {
    pub fn new() -> Self {
        Self::with_config(&PipelineConfig::default())
    }

    pub fn with_config(config: &PipelineConfig) -> Self {
        Self {
            aliases: config.aliases.clone(),
            config: config.recovery.clone(),
            miner: ChapterTextMiner::with_config(&config.mining),
        }
    }

    /// 从日志条目恢复书籍
    ///
    /// # 参数
    /// - `entries`: 按时间顺序排列的交互日志条目
    ///
    /// # 返回
    /// 恢复结果；没有任何可提取章节时 `can_recover` 为 false
    pub fn recover(&self, entries: &[Value]) -> RecoveryReport {
        if entries.is_empty() {
            return RecoveryReport::unavailable(PipelineError::RecoveryUnavailable(
                "日志为空".to_string(),
            ));
        }

        let input_data = self.extract_input_data(entries);

        let mut collected: Vec<RecoveredChapter> = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            match self.extract_entry(entry, index, collected.len()) {
                Ok(chapters) => {
                    if !chapters.is_empty() {
                        debug!("日志条目 {} 恢复 {} 章", index, chapters.len());
                    }
                    collected.extend(chapters);
                }
                Err(err) => warn!("跳过日志条目 {}: {}", index, err),
            }
        }

        let chapters = keep_longest_per_number(collected);
        if chapters.is_empty() {
            return RecoveryReport::unavailable(PipelineError::RecoveryUnavailable(format!(
                "{} 条日志中没有可提取的章节内容",
                entries.len()
            )));
        }

        let title = first_string(&input_data, &self.aliases.book_title)
            .unwrap_or_else(|| self.config.default_title.clone());
        let total_words = chapters.iter().map(|c| c.word_count).sum();

        info!("从日志恢复《{}》: {} 章, {} 词", title, chapters.len(), total_words);

        RecoveryReport {
            can_recover: true,
            reason: None,
            book: Some(RecoveredBook {
                title,
                genre: first_string(&input_data, &self.aliases.genre),
                theme: first_string(&input_data, &self.aliases.theme),
                chapters,
                total_words,
                input_data,
            }),
        }
    }

    /// 输入参数：优先显式的 inputData 字段，其次输入节点本身，最后任何直接带书名的条目
    fn extract_input_data(&self, entries: &[Value]) -> Map<String, Value> {
        let objects = || entries.iter().filter_map(Value::as_object);

        if let Some(input) = objects().find_map(|obj| first_object(obj, &self.aliases.input_data)) {
            return input.clone();
        }

        if let Some(obj) = objects().find(|obj| self.is_input_entry(obj)) {
            return obj.clone();
        }

        objects()
            .find(|obj| first_string(obj, &self.aliases.book_title).is_some())
            .cloned()
            .unwrap_or_default()
    }

    fn is_input_entry(&self, obj: &Map<String, Value>) -> bool {
        self.aliases
            .log_entry_role
            .iter()
            .filter_map(|alias| obj.get(alias).and_then(Value::as_str))
            .any(|label| label.to_lowercase().contains("input"))
    }

    /// 单个条目：依次尝试生成文本、chapters 数组、处理后内容，第一个命中的策略生效
    fn extract_entry(
        &self,
        entry: &Value,
        index: usize,
        collected: usize,
    ) -> Result<Vec<RecoveredChapter>, PipelineError> {
        let obj = entry
            .as_object()
            .ok_or_else(|| PipelineError::malformed("logEntry", "不是对象"))?;

        if self.is_input_entry(obj) {
            return Ok(Vec::new());
        }

        let scopes = payload_scopes(obj);

        if let Some(text) = self.long_string(&scopes, &self.aliases.generation_text, self.config.min_generation_chars) {
            let mined = self.miner.mine_with_offset(&text, collected);
            if !mined.is_empty() {
                return Ok(mined
                    .into_iter()
                    .map(|c| recovered(c.number, c.title, c.content, index))
                    .collect());
            }
        }

        match scopes.iter().find_map(|scope| scope.get("chapters")) {
            Some(Value::Array(items)) => {
                let chapters: Vec<RecoveredChapter> = items
                    .iter()
                    .enumerate()
                    .filter_map(|(position, item)| {
                        candidate_from_entry(item, collected + position, ChapterOrigin::Fallback, &self.aliases)
                    })
                    .map(|c| recovered(c.number, c.title, c.content, index))
                    .collect();
                if !chapters.is_empty() {
                    return Ok(chapters);
                }
            }
            // chapters 字段形态不对只说明这条策略不适用，继续尝试处理后内容
            Some(other) if !other.is_null() => {
                let err = PipelineError::malformed("chapters", format!("不是数组: {}", other));
                warn!("日志条目 {}: {}", index, err);
            }
            _ => {}
        }

        if let Some(text) = self.long_string(&scopes, &self.aliases.processed_content, self.config.min_processed_chars) {
            if self.miner.is_plan_artifact(&text) {
                debug!("日志条目 {} 的处理后内容是计划产物", index);
                return Ok(Vec::new());
            }
            let number = collected as u32 + 1;
            let content = text.trim().to_string();
            let title = self.miner.resolve_title("", number, &content);
            return Ok(vec![recovered(number, title, content, index)]);
        }

        Ok(Vec::new())
    }

    fn long_string(&self, scopes: &[&Map<String, Value>], aliases: &[String], min_chars: usize) -> Option<String> {
        scopes
            .iter()
            .filter_map(|scope| first_present(scope, aliases))
            .filter_map(Value::as_str)
            .find(|text| text.trim().chars().count() > min_chars)
            .map(str::to_string)
    }
}

impl Default for RecoveryExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// 条目本身加上常见的嵌套负载对象
fn payload_scopes(obj: &Map<String, Value>) -> Vec<&Map<String, Value>> {
    let mut scopes = vec![obj];
    scopes.extend(
        NESTED_PAYLOAD_KEYS
            .iter()
            .filter_map(|key| obj.get(*key).and_then(Value::as_object)),
    );
    scopes
}

fn recovered(number: u32, title: String, content: String, entry_index: usize) -> RecoveredChapter {
    RecoveredChapter {
        number,
        title,
        word_count: word_count(&content),
        content,
        entry_index,
    }
}

/// 按编号升序，同编号保留内容最长的一份
fn keep_longest_per_number(chapters: Vec<RecoveredChapter>) -> Vec<RecoveredChapter> {
    let mut by_number: BTreeMap<u32, RecoveredChapter> = BTreeMap::new();
    for chapter in chapters {
        let replace = match by_number.get(&chapter.number) {
            Some(existing) => {
                warn!(
                    "第 {} 章在日志条目 {} 与 {} 中重复，保留较长的一份",
                    chapter.number, existing.entry_index, chapter.entry_index
                );
                existing.content.chars().count() < chapter.content.chars().count()
            }
            None => true,
        };
        if replace {
            by_number.insert(chapter.number, chapter);
        }
    }
    by_number.into_values().collect()
}
