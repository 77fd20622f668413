use super::responses::GeneratedResponse;
use crate::execution::ExecutionStatus;
use crate::format::{canonical_format_key, FormatDescriptor, FormatFailure};
use crate::mining::ChapterOrigin;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 图片放置方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagePlacement {
    /// 章节正文之前
    ChapterHeader,
    /// 第一个段落之后
    Inline,
    /// 有图片时为 chapter_header，否则为 inline
    #[default]
    Auto,
}

impl ImagePlacement {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().replace('-', "_").as_str() {
            "chapter_header" | "header" | "top" => Some(Self::ChapterHeader),
            "inline" => Some(Self::Inline),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    /// 解析 auto，结果只会是 ChapterHeader 或 Inline
    pub fn resolve(self, has_images: bool) -> Self {
        match self {
            Self::Auto if has_images => Self::ChapterHeader,
            Self::Auto => Self::Inline,
            other => other,
        }
    }
}

/// 图片资源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// URL 或内联 data URI
    pub url: String,
    /// 说明文字
    pub prompt: String,
    pub chapter_number: Option<u32>,
    pub node_id: Option<String>,
}

/// 章节元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterMetadata {
    pub source: ChapterOrigin,
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// 章节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    /// 稳定锚点 ID，`chapter-{number}`
    pub id: String,
    pub number: u32,
    pub title: String,
    pub content: String,
    pub images: Vec<Asset>,
    /// 已解析的放置方式，不会是 auto
    pub image_placement: ImagePlacement,
    pub word_count: usize,
    pub metadata: ChapterMetadata,
}

impl Chapter {
    pub fn anchor_id(number: u32) -> String {
        format!("chapter-{}", number)
    }

    /// 标题是否只是默认的 "Chapter N"
    pub fn has_default_title(&self) -> bool {
        self.title == format!("Chapter {}", self.number)
    }
}

/// 结构性段落：前言、引言、目录
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralSections {
    pub foreword: Option<String>,
    pub introduction: Option<String>,
    pub table_of_contents: Option<String>,
}

impl StructuralSections {
    /// 依次返回非空段落：(锚点 ID, 标题, 正文)
    pub fn present(&self) -> Vec<(&'static str, &'static str, &str)> {
        [
            ("foreword", "Foreword", &self.foreword),
            ("introduction", "Introduction", &self.introduction),
            ("table-of-contents", "Table of Contents", &self.table_of_contents),
        ]
        .into_iter()
        .filter_map(|(id, heading, text)| {
            text.as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| (id, heading, t))
        })
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.present().is_empty()
    }
}

/// 来源信息，供持久化协作方按执行 ID upsert
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub execution_id: Option<String>,
    pub status: ExecutionStatus,
    pub current_node_id: Option<String>,
    pub failed_node_id: Option<String>,
    pub user_input: Map<String, Value>,
}

/// 重建后的书籍文档
///
/// 每次遥测更新时从执行记录重新派生，之后作为导出/编辑协作方的只读输入
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub book_id: String,
    pub title: String,
    pub structural: StructuralSections,
    /// 编号唯一且升序
    pub chapters: Vec<Chapter>,
    /// 没有关联到章节的图片
    pub assets: Vec<Asset>,
    pub formats: BTreeMap<String, FormatDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub format_failures: Vec<FormatFailure>,
    /// 需要导出侧下载的格式：键 → URL
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remote_formats: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<GeneratedResponse>,
    pub provenance: Provenance,
}

impl Book {
    /// 按格式键查找，别名（markdown/md、htm/html）都可用
    pub fn format(&self, key: &str) -> Option<&FormatDescriptor> {
        self.formats.get(&canonical_format_key(key))
    }

    pub fn total_words(&self) -> usize {
        self.chapters.iter().map(|c| c.word_count).sum()
    }
}
