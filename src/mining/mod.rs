use crate::config::{FieldAliases, MiningConfig, PipelineConfig};
use crate::execution::{ExecutionRecord, NodeResult};
use crate::merge::{
    as_flag, as_positive_int, as_sequence, dedup_by_key, event_key, first_present, first_string,
};
use crate::text::sanitize_title;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

// 子模块声明
pub mod chapter_miner;

pub use chapter_miner::{ChapterTextMiner, MinedChapter};

/// 章节来源
///
/// 同一编号出现多次时按此优先级去重：storyContext > nodeResults > fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChapterOrigin {
    StoryContext,
    NodeResults,
    Fallback,
}

/// 章节候选
///
/// 来源策略产出的中间结果，图片与放置方式由聚合器最终解析
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterCandidate {
    pub number: u32,
    pub title: String,
    pub content: String,
    pub origin: ChapterOrigin,
    /// 编号来自标题或显式字段；为 false 时是位置编号
    pub declared_number: bool,
    /// 产出该章节的节点 ID 或事件键
    pub node_id: Option<String>,
    /// 章节条目上挂的原始图片数据
    pub images: Vec<Value>,
    pub image_placement: Option<String>,
    /// 条目上保留的其余元数据
    pub extra: Map<String, Value>,
}

impl ChapterCandidate {
    fn mined(chapter: MinedChapter, origin: ChapterOrigin, node_id: &str) -> Self {
        Self {
            number: chapter.number,
            title: chapter.title,
            content: chapter.content,
            origin,
            declared_number: chapter.number_from_heading,
            node_id: Some(node_id.to_string()),
            images: Vec::new(),
            image_placement: None,
            extra: Map::new(),
        }
    }
}

/// 章节来源策略 trait
///
/// 每种来源按固定优先级被依次尝试，第一个产出章节的来源即为权威来源
pub trait ChapterSource: Send + Sync {
    /// 来源名称，用于日志
    fn name(&self) -> &'static str;

    /// 从执行记录收集章节候选
    ///
    /// # 参数
    /// - `record`: 规范化后的执行记录
    ///
    /// # 返回
    /// 章节候选列表，没有可用数据时为空
    fn collect(&self, record: &ExecutionRecord) -> Vec<ChapterCandidate>;
}

/// 把结构化章节条目（storyContext.chapters、编译段落、日志里的 chapters 数组）映射为候选
///
/// 缺少正文的条目返回 None
pub fn candidate_from_entry(
    entry: &Value,
    position: usize,
    origin: ChapterOrigin,
    aliases: &FieldAliases,
) -> Option<ChapterCandidate> {
    let obj = entry.as_object()?;

    let content = match first_present(obj, &aliases.chapter_content)? {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if content.is_empty() {
        return None;
    }

    let declared = aliases
        .chapter_number
        .iter()
        .filter_map(|alias| obj.get(alias))
        .find_map(as_positive_int);
    let number = declared.unwrap_or(position as u32 + 1);

    let title = first_string(obj, &aliases.chapter_title)
        .map(|t| sanitize_title(&t))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("Chapter {}", number));

    let images = aliases
        .chapter_images
        .iter()
        .filter_map(|alias| obj.get(alias))
        .flat_map(|value| match value {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        })
        .collect();

    let extra = obj
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    Some(ChapterCandidate {
        number,
        title,
        content,
        origin,
        declared_number: declared.is_some(),
        node_id: first_string(obj, &aliases.node_id),
        images,
        image_placement: first_string(obj, &aliases.image_placement),
        extra,
    })
}

/// 预结构化章节：`storyContext.chapters`，原样采用
pub struct StoryContextSource {
    aliases: FieldAliases,
}

impl StoryContextSource {
    pub fn new(aliases: &FieldAliases) -> Self {
        Self {
            aliases: aliases.clone(),
        }
    }
}

impl ChapterSource for StoryContextSource {
    fn name(&self) -> &'static str {
        "storyContext"
    }

    fn collect(&self, record: &ExecutionRecord) -> Vec<ChapterCandidate> {
        as_sequence(record.story_context.get("chapters"))
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                candidate_from_entry(entry, i, ChapterOrigin::StoryContext, &self.aliases)
            })
            .collect()
    }
}

/// 结构性段落的类型名，编译段落中的这些条目不是章节
const STRUCTURAL_SECTION_TYPES: [&str; 7] = [
    "foreword",
    "preface",
    "introduction",
    "intro",
    "toc",
    "table_of_contents",
    "tableofcontents",
];

/// 段落类型（type/sectionType/kind）
pub fn section_type(section: &Value) -> Option<String> {
    let obj = section.as_object()?;
    ["type", "sectionType", "section_type", "kind"]
        .iter()
        .find_map(|field| obj.get(*field).and_then(Value::as_str))
        .map(|t| t.trim().to_lowercase().replace(|c: char| c == '-' || c == ' ', "_"))
}

/// 段落是否为前言/引言/目录
pub fn is_structural_section(section: &Value) -> bool {
    section_type(section)
        .map(|t| STRUCTURAL_SECTION_TYPES.contains(&t.as_str()))
        .unwrap_or(false)
}

/// 编译段落：最终输出节点上的 `sections` 列表
pub struct CompiledSectionsSource {
    aliases: FieldAliases,
    final_markers: Vec<String>,
}

impl CompiledSectionsSource {
    pub fn new(aliases: &FieldAliases, mining: &MiningConfig) -> Self {
        Self {
            aliases: aliases.clone(),
            final_markers: mining.final_output_markers.clone(),
        }
    }
}

impl ChapterSource for CompiledSectionsSource {
    fn name(&self) -> &'static str {
        "compiledSections"
    }

    fn collect(&self, record: &ExecutionRecord) -> Vec<ChapterCandidate> {
        let Some(node) = record
            .node_results
            .iter()
            .find(|n| n.has_marker(&self.final_markers) && !n.sections.is_empty())
        else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        for section in node.sections.iter().filter(|s| !is_structural_section(s)) {
            let position = candidates.len();
            if let Some(mut candidate) =
                candidate_from_entry(section, position, ChapterOrigin::NodeResults, &self.aliases)
            {
                candidate.node_id.get_or_insert_with(|| node.node_id.clone());
                candidates.push(candidate);
            }
        }
        candidates
    }
}

/// 文本挖掘：写作节点优先，找不到时再对其余文本节点和 AI 输出兜底
pub struct MinedTextSource {
    miner: ChapterTextMiner,
    aliases: FieldAliases,
    mining: MiningConfig,
}

impl MinedTextSource {
    pub fn new(aliases: &FieldAliases, mining: &MiningConfig) -> Self {
        Self {
            miner: ChapterTextMiner::with_config(mining),
            aliases: aliases.clone(),
            mining: mining.clone(),
        }
    }

    fn is_writer(&self, node: &NodeResult) -> bool {
        node.has_marker(&self.mining.writer_markers)
    }

    /// 前言、引言、目录节点
    fn is_structural(&self, node: &NodeResult) -> bool {
        let label = node.label();
        STRUCTURAL_SECTION_TYPES.iter().any(|t| label.contains(*t))
    }

    /// 兜底阶段不参与挖掘的节点：图片、前言类、最终编译
    fn is_excluded(&self, node: &NodeResult) -> bool {
        node.has_marker(&self.mining.image_markers)
            || node.has_marker(&self.mining.final_output_markers)
            || self.is_structural(node)
    }

    /// 写作节点：有结构化子章节就直接用，否则挖掘文本
    fn collect_writers(
        &self,
        record: &ExecutionRecord,
        seen: &mut HashSet<(String, u32)>,
    ) -> Vec<ChapterCandidate> {
        let mut collected: Vec<ChapterCandidate> = Vec::new();

        for node in record
            .node_results
            .iter()
            .filter(|n| self.is_writer(n) && !self.is_structural(n))
        {
            if !node.chapters.is_empty() {
                for (i, entry) in node.chapters.iter().enumerate() {
                    let position = collected.len().max(i);
                    if let Some(mut candidate) =
                        candidate_from_entry(entry, position, ChapterOrigin::NodeResults, &self.aliases)
                    {
                        candidate.node_id.get_or_insert_with(|| node.node_id.clone());
                        if seen.insert((node.node_id.clone(), candidate.number)) {
                            collected.push(candidate);
                        }
                    }
                }
                continue;
            }

            let Some(text) = node.text() else { continue };
            for chapter in self.miner.mine_with_offset(text, collected.len()) {
                if seen.insert((node.node_id.clone(), chapter.number)) {
                    collected.push(ChapterCandidate::mined(
                        chapter,
                        ChapterOrigin::NodeResults,
                        &node.node_id,
                    ));
                }
            }
        }

        collected
    }

    /// 兜底：其余文本节点与 AI 输出（非 live 版本优先）
    fn collect_fallback(
        &self,
        record: &ExecutionRecord,
        seen: &mut HashSet<(String, u32)>,
    ) -> Vec<ChapterCandidate> {
        let mut texts: Vec<(String, &str)> = record
            .node_results
            .iter()
            .filter(|n| !self.is_excluded(n))
            .filter_map(|n| n.text().map(|t| (n.node_id.clone(), t)))
            .collect();

        let mut outputs: Vec<&Value> = record.ai_outputs.iter().collect();
        outputs.sort_by_key(|o| self.is_live(o));
        for output in outputs {
            let Some(obj) = output.as_object() else { continue };
            let Some(text) = ["content", "text", "output", "response", "generatedText"]
                .iter()
                .find_map(|f| obj.get(*f).and_then(Value::as_str))
            else {
                continue;
            };
            let key = first_string(obj, &self.aliases.node_id).unwrap_or_else(|| event_key(output));
            texts.push((key, text));
        }

        let mut collected: Vec<ChapterCandidate> = Vec::new();
        for (key, text) in texts {
            for chapter in self.miner.mine_with_offset(text, collected.len()) {
                if seen.insert((key.clone(), chapter.number)) {
                    collected.push(ChapterCandidate::mined(chapter, ChapterOrigin::Fallback, &key));
                }
            }
        }
        collected
    }

    fn is_live(&self, output: &Value) -> bool {
        output
            .as_object()
            .map(|obj| {
                self.aliases
                    .live_markers
                    .iter()
                    .filter_map(|m| obj.get(m))
                    .any(as_flag)
            })
            .unwrap_or(false)
    }
}

impl ChapterSource for MinedTextSource {
    fn name(&self) -> &'static str {
        "minedText"
    }

    fn collect(&self, record: &ExecutionRecord) -> Vec<ChapterCandidate> {
        let mut seen = HashSet::new();

        let writers = self.collect_writers(record, &mut seen);
        if !writers.is_empty() {
            return writers;
        }

        debug!("没有写作节点产出章节，进入兜底挖掘");
        self.collect_fallback(record, &mut seen)
    }
}

/// 章节解析器
///
/// 按优先级依次尝试已注册的来源，第一个产出章节的来源为权威来源
pub struct ChapterResolver {
    sources: Vec<Box<dyn ChapterSource>>,
}

impl ChapterResolver {
    /// 创建解析器并注册默认来源
    ///
    /// 优先级：storyContext > 编译段落 > 文本挖掘
    pub fn new(config: &PipelineConfig) -> Self {
        let sources: Vec<Box<dyn ChapterSource>> = vec![
            Box::new(StoryContextSource::new(&config.aliases)),
            Box::new(CompiledSectionsSource::new(&config.aliases, &config.mining)),
            Box::new(MinedTextSource::new(&config.aliases, &config.mining)),
        ];
        Self { sources }
    }

    /// 使用自定义来源列表
    pub fn with_sources(sources: Vec<Box<dyn ChapterSource>>) -> Self {
        Self { sources }
    }

    /// 解析章节
    ///
    /// # 返回
    /// 编号唯一、按编号升序的章节候选
    pub fn resolve(&self, record: &ExecutionRecord) -> Vec<ChapterCandidate> {
        for source in &self.sources {
            let found = source.collect(record);
            if !found.is_empty() {
                debug!("章节来源 {} 产出 {} 个候选", source.name(), found.len());
                return finalize(found);
            }
        }
        Vec::new()
    }
}

impl Default for ChapterResolver {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

/// 每个编号只保留一章：来源优先级高的胜出，同级保留先出现的；最后按编号排序
///
/// 声明编号重复视为同一章的多个版本；位置编号与已占用编号冲突时顺延到下一个空闲编号，不丢内容
pub fn finalize(mut candidates: Vec<ChapterCandidate>) -> Vec<ChapterCandidate> {
    candidates.sort_by_key(|c| c.origin);

    let mut taken: HashSet<u32> = candidates
        .iter()
        .filter(|c| c.declared_number)
        .map(|c| c.number)
        .collect();
    for candidate in candidates.iter_mut().filter(|c| !c.declared_number) {
        if taken.insert(candidate.number) {
            continue;
        }
        let mut next = candidate.number + 1;
        while taken.contains(&next) {
            next += 1;
        }
        warn!(
            "位置编号 {} 已被占用，章节 {:?} 顺延为 {}",
            candidate.number, candidate.title, next
        );
        if candidate.title == format!("Chapter {}", candidate.number) {
            candidate.title = format!("Chapter {}", next);
        }
        candidate.number = next;
        taken.insert(next);
    }

    let mut unique = dedup_by_key(candidates, |c| c.number);
    unique.sort_by_key(|c| c.number);
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStateNormalizer;
    use serde_json::json;

    fn record(raw: Value) -> ExecutionRecord {
        ExecutionStateNormalizer::new().normalize(&raw, &Value::Null)
    }

    fn prose(tag: &str) -> String {
        format!("{} walked along the quay as the fog rolled in from the sea. ", tag).repeat(2)
    }

    #[test]
    fn test_story_context_is_authoritative() {
        let rec = record(json!({
            "storyContext": {"chapters": [
                {"title": "Second", "content": "b", "number": 2},
                {"title": "First", "content": "a", "number": 1}
            ]},
            "nodeResults": {"writer": {"nodeName": "Chapter Writer", "content": format!("Chapter 9: Other\n\n{}", prose("Ann"))}}
        }));

        let chapters = ChapterResolver::default().resolve(&rec);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].number, 1);
        assert_eq!(chapters[0].title, "First");
        assert_eq!(chapters[1].number, 2);
        assert!(chapters.iter().all(|c| c.origin == ChapterOrigin::StoryContext));
    }

    #[test]
    fn test_story_context_skips_empty_content() {
        let rec = record(json!({
            "storyContext": {"chapters": [{"title": "Empty", "content": ""}, {"content": "text"}]}
        }));

        let chapters = ChapterResolver::default().resolve(&rec);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].number, 2);
        assert_eq!(chapters[0].title, "Chapter 2");
    }

    #[test]
    fn test_compiled_sections_skip_structural() {
        let rec = record(json!({
            "nodeResults": {"final": {
                "type": "final_output",
                "sections": [
                    {"type": "foreword", "content": "Before we begin"},
                    {"type": "chapter", "title": "Arrival", "content": "The ship docked."},
                    {"type": "chapter", "title": "Departure", "content": "The ship left.", "number": 2}
                ]
            }}
        }));

        let chapters = ChapterResolver::default().resolve(&rec);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Arrival");
        assert_eq!(chapters[0].number, 1);
        assert_eq!(chapters[0].node_id.as_deref(), Some("final"));
        assert_eq!(chapters[1].number, 2);
    }

    #[test]
    fn test_writer_nodes_are_mined() {
        let rec = record(json!({
            "nodeResults": [
                {"nodeId": "plan", "nodeName": "Planner", "content": "{\"chapter_number\": 1, \"outline\": \"x\"}"},
                {"nodeId": "w1", "nodeName": "Chapter Writer", "content": format!("Chapter 1: Fog\n\n{}", prose("Ann"))},
                {"nodeId": "w2", "nodeName": "Chapter Writer", "content": format!("Chapter 2: Quay\n\n{}", prose("Ben"))}
            ]
        }));

        let chapters = ChapterResolver::default().resolve(&rec);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Fog");
        assert_eq!(chapters[1].title, "Quay");
        assert_eq!(chapters[1].node_id.as_deref(), Some("w2"));
        assert!(chapters.iter().all(|c| c.origin == ChapterOrigin::NodeResults));
    }

    #[test]
    fn test_writer_structured_chapters() {
        let rec = record(json!({
            "nodeResults": {"writer": {
                "type": "multi_chapter_generation",
                "nodeName": "Writer",
                "chapters": [{"content": "one"}, {"content": "two", "title": "Two"}]
            }}
        }));

        let chapters = ChapterResolver::default().resolve(&rec);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1].title, "Two");
        assert_eq!(chapters[1].number, 2);
    }

    #[test]
    fn test_fallback_prefers_final_ai_output() {
        let text = format!("Chapter 1: Fog\n\n{}", prose("Ann"));
        let partial = "Chapter 1: Fog\n\nAnn walked along the quay as the fog rolled in";
        let rec = record(json!({
            "aiOutputs": [
                {"nodeId": "gen", "content": partial, "isLive": true, "timestamp": 1},
                {"nodeId": "gen", "content": text, "isLive": false, "timestamp": 2}
            ]
        }));

        let chapters = ChapterResolver::default().resolve(&rec);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].origin, ChapterOrigin::Fallback);
        assert_eq!(chapters[0].content, prose("Ann").trim());
    }

    #[test]
    fn test_finalize_priority_and_order() {
        let make = |number, origin, title: &str| ChapterCandidate {
            number,
            title: title.to_string(),
            content: "x".to_string(),
            origin,
            declared_number: true,
            node_id: None,
            images: Vec::new(),
            image_placement: None,
            extra: Map::new(),
        };

        let result = finalize(vec![
            make(2, ChapterOrigin::Fallback, "fallback two"),
            make(1, ChapterOrigin::NodeResults, "node one"),
            make(2, ChapterOrigin::NodeResults, "node two"),
            make(2, ChapterOrigin::NodeResults, "node two again"),
        ]);

        let titles: Vec<_> = result.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["node one", "node two"]);
    }

    #[test]
    fn test_positional_number_does_not_swallow_declared_one() {
        let rec = record(json!({
            "nodeResults": [
                {"nodeId": "w1", "nodeName": "Chapter Writer", "content": format!("Chapter 2: Storm\n\n{}", prose("Ann"))},
                {"nodeId": "w2", "nodeName": "Chapter Writer", "content": prose("Ben").repeat(2)}
            ]
        }));

        let chapters = ChapterResolver::default().resolve(&rec);
        let numbers: Vec<u32> = chapters.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![2, 3]);
        assert_eq!(chapters[0].title, "Storm");
        assert_eq!(chapters[1].node_id.as_deref(), Some("w2"));
        assert!(chapters[1].content.starts_with("Ben walked"));
        assert!(!chapters[1].declared_number);
    }

    #[test]
    fn test_empty_record_yields_nothing() {
        let rec = record(Value::Null);
        assert!(ChapterResolver::default().resolve(&rec).is_empty());
    }
}
