use super::types::{Asset, Chapter, ImagePlacement};
use crate::config::{FieldAliases, MiningConfig};
use crate::execution::ExecutionRecord;
use crate::merge::{as_positive_int, dedup_by_key, first_string};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// 节点 ID/名称里的章节标记，如 `chapter_3_image`、`Chapter 3 Illustration`
fn chapter_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)chapter[_\-\s]?(\d+)").expect("chapter marker pattern"))
}

pub fn chapter_marker(text: &str) -> Option<u32> {
    chapter_marker_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0)
}

/// 看起来像图片地址（远程 URL、data URI 或站内路径）
fn looks_like_image_ref(s: &str) -> bool {
    let lower = s.trim().to_lowercase();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("data:image/")
        || (lower.starts_with('/') && !lower.contains(char::is_whitespace))
}

/// 从单个图片值（字符串或对象）构建资源
///
/// # 参数
/// - `value`: 原始图片值
/// - `chapter_hint`: 外部已知的章节编号（条目自身的编号优先）
/// - `node_id`: 产出该图片的节点
pub fn asset_from_value(
    value: &Value,
    chapter_hint: Option<u32>,
    node_id: Option<&str>,
    aliases: &FieldAliases,
) -> Option<Asset> {
    let (url, prompt, own_number) = match value {
        Value::String(s) if looks_like_image_ref(s) => (s.trim().to_string(), String::new(), None),
        Value::Object(obj) => {
            let url = first_string(obj, &aliases.image_url).filter(|u| looks_like_image_ref(u))?;
            let prompt = first_string(obj, &aliases.image_prompt).unwrap_or_default();
            let number = aliases
                .chapter_number
                .iter()
                .filter_map(|alias| obj.get(alias))
                .find_map(as_positive_int);
            (url, prompt, number)
        }
        _ => return None,
    };

    Some(Asset {
        url,
        prompt,
        chapter_number: own_number.or(chapter_hint),
        node_id: node_id.map(str::to_string),
    })
}

/// 展开可能是单值或列表的图片字段
fn assets_from_any(
    value: &Value,
    chapter_hint: Option<u32>,
    node_id: Option<&str>,
    aliases: &FieldAliases,
) -> Vec<Asset> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| asset_from_value(item, chapter_hint, node_id, aliases))
            .collect(),
        Value::Object(obj) => {
            // { images: [...] } 包装
            if let Some(inner) = aliases
                .chapter_images
                .iter()
                .filter_map(|alias| obj.get(alias))
                .find(|v| v.is_array())
            {
                return assets_from_any(inner, chapter_hint, node_id, aliases);
            }
            asset_from_value(value, chapter_hint, node_id, aliases)
                .into_iter()
                .collect()
        }
        other => asset_from_value(other, chapter_hint, node_id, aliases)
            .into_iter()
            .collect(),
    }
}

/// 收集图片节点和图片类 AI 输出中的图片
///
/// 章节关联：条目自身编号 ?? 节点 ID/名称中的章节标记
pub fn collect_record_images(
    record: &ExecutionRecord,
    aliases: &FieldAliases,
    mining: &MiningConfig,
) -> Vec<Asset> {
    let mut assets = Vec::new();

    for node in record
        .node_results
        .iter()
        .filter(|n| n.has_marker(&mining.image_markers))
    {
        let hint = chapter_marker(&node.node_id).or_else(|| chapter_marker(&node.node_name));
        assets.extend(assets_from_any(&node.content, hint, Some(&node.node_id), aliases));
        for key in &aliases.chapter_images {
            if let Some(value) = node.metadata.get(key) {
                assets.extend(assets_from_any(value, hint, Some(&node.node_id), aliases));
            }
        }
    }

    for output in &record.ai_outputs {
        let Some(obj) = output.as_object() else { continue };
        let label = format!(
            "{} {}",
            first_string(obj, &aliases.node_type).unwrap_or_default(),
            first_string(obj, &aliases.node_name).unwrap_or_default()
        )
        .to_lowercase();
        if !mining.image_markers.iter().any(|m| label.contains(&m.to_lowercase())) {
            continue;
        }

        let node_id = first_string(obj, &aliases.node_id);
        let hint = node_id.as_deref().and_then(chapter_marker).or_else(|| chapter_marker(&label));
        assets.extend(assets_from_any(output, hint, node_id.as_deref(), aliases));
    }

    assets
}

/// 把图片挂到对应章节，返回无法关联的图片（按 URL 去重）
pub fn attach_images(chapters: &mut [Chapter], assets: Vec<Asset>) -> Vec<Asset> {
    let mut gallery = Vec::new();

    for asset in assets {
        let target = asset
            .chapter_number
            .and_then(|n| chapters.iter_mut().find(|c| c.number == n));
        match target {
            Some(chapter) => {
                if !chapter.images.iter().any(|existing| existing.url == asset.url) {
                    chapter.images.push(asset);
                }
            }
            None => gallery.push(asset),
        }
    }

    let attached: Vec<&str> = chapters
        .iter()
        .flat_map(|c| c.images.iter().map(|a| a.url.as_str()))
        .collect();
    let gallery: Vec<Asset> = gallery
        .into_iter()
        .filter(|a| !attached.contains(&a.url.as_str()))
        .collect();
    dedup_by_key(gallery, |a| a.url.clone())
}

/// 章节排版块
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayoutBlock<'a> {
    Text(&'a str),
    Images(&'a [Asset]),
}

/// 按放置方式排列章节正文与图片
///
/// - chapter_header: 图片在正文之前
/// - inline: 图片插在第一个空行之后；正文没有空行时放在最前
pub fn layout(chapter: &Chapter) -> Vec<LayoutBlock<'_>> {
    if chapter.images.is_empty() {
        return vec![LayoutBlock::Text(&chapter.content)];
    }

    let images = LayoutBlock::Images(&chapter.images);
    match chapter.image_placement.resolve(true) {
        ImagePlacement::Inline => match chapter.content.split_once("\n\n") {
            Some((first, rest)) => vec![
                LayoutBlock::Text(first),
                images,
                LayoutBlock::Text(rest),
            ],
            None => vec![images, LayoutBlock::Text(&chapter.content)],
        },
        _ => vec![images, LayoutBlock::Text(&chapter.content)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::types::ChapterMetadata;
    use crate::execution::ExecutionStateNormalizer;
    use crate::mining::ChapterOrigin;
    use serde_json::json;

    fn chapter(number: u32, content: &str, placement: ImagePlacement) -> Chapter {
        Chapter {
            id: Chapter::anchor_id(number),
            number,
            title: format!("Chapter {}", number),
            content: content.to_string(),
            images: Vec::new(),
            image_placement: placement,
            word_count: 0,
            metadata: ChapterMetadata {
                source: ChapterOrigin::NodeResults,
                node_id: None,
                extra: Default::default(),
            },
        }
    }

    fn asset(url: &str, number: Option<u32>) -> Asset {
        Asset {
            url: url.to_string(),
            prompt: String::new(),
            chapter_number: number,
            node_id: None,
        }
    }

    #[test]
    fn test_chapter_marker() {
        assert_eq!(chapter_marker("chapter_3_image"), Some(3));
        assert_eq!(chapter_marker("Chapter 12 Illustration"), Some(12));
        assert_eq!(chapter_marker("cover_image"), None);
    }

    #[test]
    fn test_asset_from_value() {
        let aliases = FieldAliases::default();
        let obj = json!({"imageUrl": "https://img.example.com/a.png", "prompt": "A harbor", "chapterNumber": 2});
        let a = asset_from_value(&obj, Some(9), Some("img"), &aliases).unwrap();
        assert_eq!(a.chapter_number, Some(2));
        assert_eq!(a.prompt, "A harbor");

        let s = json!("data:image/png;base64,AAAA");
        assert_eq!(asset_from_value(&s, Some(1), None, &aliases).unwrap().chapter_number, Some(1));

        assert!(asset_from_value(&json!("a long prompt, not a url"), None, None, &aliases).is_none());
    }

    #[test]
    fn test_collect_record_images() {
        let record = ExecutionStateNormalizer::new().normalize(
            &json!({
                "nodeResults": {
                    "chapter_2_image": {"type": "image_generation", "content": "https://img.example.com/2.png"},
                    "cover": {"nodeName": "Cover Illustration", "content": [{"url": "https://img.example.com/cover.png", "caption": "Cover"}]}
                },
                "aiOutputs": [{"id": "o1", "type": "image", "nodeId": "chapter-1-art", "imageUrl": "https://img.example.com/1.png"}]
            }),
            &Value::Null,
        );

        let assets = collect_record_images(&record, &FieldAliases::default(), &MiningConfig::default());
        assert_eq!(assets.len(), 3);
        assert_eq!(assets[0].chapter_number, Some(2));
        assert_eq!(assets[1].chapter_number, None);
        assert_eq!(assets[1].prompt, "Cover");
        assert_eq!(assets[2].chapter_number, Some(1));
    }

    #[test]
    fn test_attach_images_and_gallery() {
        let mut chapters = vec![chapter(1, "a", ImagePlacement::Inline)];
        let gallery = attach_images(
            &mut chapters,
            vec![
                asset("u1", Some(1)),
                asset("u1", Some(1)),
                asset("u2", Some(7)),
                asset("u3", None),
                asset("u3", None),
                asset("u1", None),
            ],
        );

        assert_eq!(chapters[0].images.len(), 1);
        let urls: Vec<_> = gallery.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["u2", "u3"]);
    }

    #[test]
    fn test_layout_inline_after_first_paragraph() {
        let mut ch = chapter(1, "First para.\n\nSecond para.", ImagePlacement::Inline);
        ch.images.push(asset("u", Some(1)));

        let blocks = layout(&ch);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], LayoutBlock::Text("First para."));
        assert!(matches!(blocks[1], LayoutBlock::Images(_)));
        assert_eq!(blocks[2], LayoutBlock::Text("Second para."));
    }

    #[test]
    fn test_layout_inline_without_paragraph_break_prepends() {
        let mut ch = chapter(1, "Single paragraph.", ImagePlacement::Inline);
        ch.images.push(asset("u", Some(1)));

        let blocks = layout(&ch);
        assert!(matches!(blocks[0], LayoutBlock::Images(_)));
        assert_eq!(blocks[1], LayoutBlock::Text("Single paragraph."));
    }

    #[test]
    fn test_layout_header_and_no_images() {
        let mut ch = chapter(1, "A.\n\nB.", ImagePlacement::ChapterHeader);
        assert_eq!(layout(&ch), vec![LayoutBlock::Text("A.\n\nB.")]);

        ch.images.push(asset("u", Some(1)));
        let blocks = layout(&ch);
        assert!(matches!(blocks[0], LayoutBlock::Images(_)));
        assert_eq!(blocks[1], LayoutBlock::Text("A.\n\nB."));
    }
}
