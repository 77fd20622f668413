use super::images::{asset_from_value, attach_images, collect_record_images};
use super::render::fill_missing_formats;
use super::responses::collect_responses;
use super::types::{
    Asset, Book, Chapter, ChapterMetadata, ImagePlacement, Provenance, StructuralSections,
};
use crate::config::{FieldAliases, PipelineConfig};
use crate::execution::ExecutionRecord;
use crate::format::FormatPayloadNormalizer;
use crate::merge::{first_object, first_string};
use crate::mining::{section_type, ChapterCandidate, ChapterResolver};
use crate::text::word_count;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::info;

/// 书籍聚合器
///
/// 从规范化后的执行记录派生 `Book`：标题、结构性段落、有序章节、图片和导出格式。
/// 纯函数，无内部可变状态，对几乎为空的记录也能给出尽力而为的结果。
pub struct BookAggregator {
    config: PipelineConfig,
    resolver: ChapterResolver,
    formats: FormatPayloadNormalizer,
}

impl BookAggregator {
    pub fn new() -> Self {
        Self::with_config(&PipelineConfig::default())
    }

    pub fn with_config(config: &PipelineConfig) -> Self {
        Self {
            config: config.clone(),
            resolver: ChapterResolver::new(config),
            formats: FormatPayloadNormalizer::new(),
        }
    }

    /// 使用自定义章节解析器
    pub fn with_resolver(config: &PipelineConfig, resolver: ChapterResolver) -> Self {
        Self {
            config: config.clone(),
            resolver,
            formats: FormatPayloadNormalizer::new(),
        }
    }

    /// 聚合执行记录
    ///
    /// # 参数
    /// - `record`: 规范化后的执行记录
    ///
    /// # 返回
    /// 书籍文档，永不失败
    pub fn aggregate(&self, record: &ExecutionRecord) -> Book {
        let aliases = &self.config.aliases;

        let title = self.resolve_title(record);
        let structural = self.resolve_structural(record);

        let preference = first_string(&record.user_input, &aliases.image_placement)
            .and_then(|p| ImagePlacement::parse(&p))
            .unwrap_or_default();

        let mut pending_assets = Vec::new();
        let mut requested = Vec::new();
        let mut chapters: Vec<Chapter> = Vec::new();
        for candidate in self.resolver.resolve(record) {
            let (chapter, assets, placement) = self.build_chapter(candidate, preference);
            pending_assets.extend(assets);
            requested.push(placement);
            chapters.push(chapter);
        }

        pending_assets.extend(collect_record_images(record, aliases, &self.config.mining));
        let assets = attach_images(&mut chapters, pending_assets);

        // 图片全部挂好之后再解析 auto
        for (chapter, placement) in chapters.iter_mut().zip(requested) {
            chapter.image_placement = placement.resolve(!chapter.images.is_empty());
        }

        let mut book = Book {
            book_id: self.resolve_book_id(record, &title),
            title,
            structural,
            chapters,
            assets,
            responses: collect_responses(record, aliases),
            provenance: Provenance {
                execution_id: record.execution_id.clone(),
                status: record.status,
                current_node_id: record.current_node_id.clone(),
                failed_node_id: record.failed_node_id.clone(),
                user_input: record.user_input.clone(),
            },
            ..Book::default()
        };

        self.resolve_formats(record, &mut book);

        info!(
            "聚合完成: {} 章, {} 张图片, {} 种格式",
            book.chapters.len(),
            book.assets.len() + book.chapters.iter().map(|c| c.images.len()).sum::<usize>(),
            book.formats.len()
        );
        book
    }

    /// 标题优先级：用户输入 > storyContext > 已保存书籍 > 执行元数据 > 默认
    fn resolve_title(&self, record: &ExecutionRecord) -> String {
        let aliases = &self.config.aliases;

        first_string(&record.user_input, &aliases.book_title)
            .or_else(|| first_string(&record.story_context, &aliases.book_title))
            .or_else(|| {
                first_object(&record.metadata, &aliases.persisted_book)
                    .and_then(|book| first_string(book, &aliases.book_title))
            })
            .or_else(|| first_string(&record.metadata, &aliases.book_title))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| self.config.recovery.default_title.clone())
    }

    /// 结构性段落来源：storyContext > 编译段落中的类型化条目 > 按名称识别的节点
    fn resolve_structural(&self, record: &ExecutionRecord) -> StructuralSections {
        let aliases = &self.config.aliases;
        let lookups: [(&[String], &[&str]); 3] = [
            (aliases.foreword.as_slice(), &["foreword", "preface"][..]),
            (aliases.introduction.as_slice(), &["introduction", "intro"][..]),
            (
                aliases.table_of_contents.as_slice(),
                &["table_of_contents", "tableofcontents", "toc"][..],
            ),
        ];

        let mut resolved = lookups.iter().map(|(field_aliases, types)| {
            structural_text(&record.story_context, field_aliases, aliases)
                .or_else(|| self.structural_from_sections(record, types))
                .or_else(|| self.structural_from_nodes(record, types))
        });

        StructuralSections {
            foreword: resolved.next().flatten(),
            introduction: resolved.next().flatten(),
            table_of_contents: resolved.next().flatten(),
        }
    }

    fn structural_from_sections(&self, record: &ExecutionRecord, types: &[&str]) -> Option<String> {
        record
            .node_results
            .iter()
            .flat_map(|node| node.sections.iter())
            .filter(|section| {
                section_type(section)
                    .map(|t| types.contains(&t.as_str()))
                    .unwrap_or(false)
            })
            .find_map(|section| {
                section
                    .as_object()
                    .and_then(|obj| first_string(obj, &self.config.aliases.chapter_content))
            })
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    fn structural_from_nodes(&self, record: &ExecutionRecord, types: &[&str]) -> Option<String> {
        record
            .node_results
            .iter()
            .find(|node| {
                let label = node.label().replace(|c: char| c == '-' || c == ' ', "_");
                types.iter().any(|t| label.contains(t))
            })
            .and_then(|node| node.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// 候选 → 章节
    ///
    /// # 返回
    /// (章节, 条目自带的图片, 尚未解析的放置方式)
    fn build_chapter(
        &self,
        candidate: ChapterCandidate,
        preference: ImagePlacement,
    ) -> (Chapter, Vec<Asset>, ImagePlacement) {
        let aliases = &self.config.aliases;
        let number = candidate.number;

        let assets: Vec<Asset> = candidate
            .images
            .iter()
            .filter_map(|image| {
                asset_from_value(image, Some(number), candidate.node_id.as_deref(), aliases)
            })
            .map(|mut asset| {
                // 章节条目自带的图片始终属于该章节
                asset.chapter_number = Some(number);
                asset
            })
            .collect();

        let placement = candidate
            .image_placement
            .as_deref()
            .and_then(ImagePlacement::parse)
            .unwrap_or(preference);

        let chapter = Chapter {
            id: Chapter::anchor_id(number),
            number,
            title: candidate.title,
            word_count: word_count(&candidate.content),
            content: candidate.content,
            images: Vec::new(),
            image_placement: placement.resolve(false),
            metadata: ChapterMetadata {
                source: candidate.origin,
                node_id: candidate.node_id,
                extra: candidate.extra,
            },
        };

        (chapter, assets, placement)
    }

    /// 书籍 ID：显式 bookId，否则由执行 ID（或标题）的 SHA-256 派生
    fn resolve_book_id(&self, record: &ExecutionRecord, title: &str) -> String {
        let aliases = &self.config.aliases;
        let explicit = first_string(&record.user_input, &aliases.book_id)
            .or_else(|| first_string(&record.metadata, &aliases.book_id))
            .or_else(|| {
                first_object(&record.metadata, &aliases.persisted_book)
                    .and_then(|book| first_string(book, &["id".to_string()]))
            });
        if let Some(id) = explicit {
            return id;
        }

        derive_book_id(record.execution_id.as_deref().unwrap_or(title))
    }

    /// 规范化上游格式，并补齐 html / md / txt
    fn resolve_formats(&self, record: &ExecutionRecord, book: &mut Book) {
        let final_formats = self.final_node_formats(record);
        let entries = record.all_formats.iter().chain(final_formats.iter());
        let normalized = self.formats.normalize_all(entries);

        book.formats = normalized.formats;
        book.remote_formats = normalized.remote;
        book.format_failures = normalized.failures;

        fill_missing_formats(book);
    }

    /// 最终输出节点上附带的格式表（content.formats 或 metadata.formats）
    fn final_node_formats(&self, record: &ExecutionRecord) -> Map<String, Value> {
        let aliases = &self.config.aliases;
        let mut formats = Map::new();

        for node in record
            .node_results
            .iter()
            .filter(|n| n.has_marker(&self.config.mining.final_output_markers))
        {
            let sources = [node.content.as_object(), Some(&node.metadata)];
            for obj in sources.into_iter().flatten() {
                if let Some(found) = first_object(obj, &aliases.all_formats) {
                    for (key, value) in found {
                        formats.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
        }

        formats
    }
}

/// 由执行 ID 或标题派生稳定的书籍 ID
pub fn derive_book_id(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    format!("book-{}", &hash[..16])
}

impl Default for BookAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// 结构性段落正文：字符串原样；目录可能是列表，逐行展开
fn structural_text(
    obj: &Map<String, Value>,
    field_aliases: &[String],
    aliases: &FieldAliases,
) -> Option<String> {
    let value = field_aliases
        .iter()
        .filter_map(|alias| obj.get(alias))
        .find(|v| !v.is_null())?;
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(entry) => first_string(entry, &aliases.chapter_title),
                _ => None,
            })
            .filter(|line| !line.is_empty())
            .map(|line| format!("- {}", line))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(entry) => first_string(entry, &aliases.chapter_content)?,
        _ => return None,
    };
    Some(text).filter(|t| !t.is_empty())
}
