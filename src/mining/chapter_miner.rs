use crate::config::MiningConfig;
use crate::error::PipelineError;
use crate::text::{char_prefix, first_meaningful_line, sanitize_title};
use regex::Regex;
use tracing::debug;

/// 从文本中挖掘出的章节
#[derive(Debug, Clone, PartialEq)]
pub struct MinedChapter {
    pub number: u32,
    pub title: String,
    /// 标题行之后的正文
    pub content: String,
    /// 编号是否来自标题（否则为位置编号）
    pub number_from_heading: bool,
}

/// 英文数字词，"Chapter Seven" 之类的标题
const NUMBER_WORDS: [(&str, u32); 20] = [
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("nine", 9),
    ("ten", 10),
    ("eleven", 11),
    ("twelve", 12),
    ("thirteen", 13),
    ("fourteen", 14),
    ("fifteen", 15),
    ("sixteen", 16),
    ("seventeen", 17),
    ("eighteen", 18),
    ("nineteen", 19),
    ("twenty", 20),
];

/// 超过这个长度的“标题行”更可能是正文里提到了某一章
const MAX_HEADING_LINE_CHARS: usize = 100;

/// 章节文本挖掘器
///
/// 只在缺少结构化章节数据时使用：
/// 1. 计划/大纲类 JSON 产物直接拒绝
/// 2. 按 "Chapter N: 标题" 标记切分，过短的片段视为噪声
/// 3. 没有标记但足够长的文本整体作为一章
pub struct ChapterTextMiner {
    heading: Regex,
    generic_title: Regex,
    config: MiningConfig,
}

impl ChapterTextMiner {
    pub fn new() -> Self {
        Self::with_config(&MiningConfig::default())
    }

    pub fn with_config(config: &MiningConfig) -> Self {
        // 较长的数字词放前面，避免 "seventeen" 先匹配到 "seven"
        let mut words: Vec<&str> = NUMBER_WORDS.iter().map(|(w, _)| *w).collect();
        words.sort_by_key(|w| std::cmp::Reverse(w.len()));

        let heading = Regex::new(&format!(
            r"(?im)^[ \t]*(?:#{{1,6}}[ \t]*)?(?:\*\*|__)?[ \t]*chapter[ \t]+(\d+|{})\b[ \t]*(?:\*\*|__)?[ \t]*(?:[:.\-–—][ \t]*)?(.*?)[ \t]*$",
            words.join("|")
        ))
        .expect("chapter heading pattern");

        let generic_title = Regex::new(&format!(r"(?i)^chapter\s+(\d+|{})$", words.join("|")))
            .expect("generic title pattern");

        Self {
            heading,
            generic_title,
            config: config.clone(),
        }
    }

    /// 是否为计划/大纲类的结构化产物
    ///
    /// 以 `{` 或 `[` 开头（允许包在 ```json 代码块里），
    /// 且开头一段内出现计划类键名
    pub fn is_plan_artifact(&self, text: &str) -> bool {
        let mut trimmed = text.trim_start();
        if trimmed.starts_with("```") {
            trimmed = match trimmed.find('\n') {
                Some(idx) => trimmed[idx + 1..].trim_start(),
                None => "",
            };
        }

        if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return false;
        }

        let window = char_prefix(trimmed, self.config.plan_scan_chars).to_lowercase();
        self.config
            .plan_markers
            .iter()
            .any(|marker| window.contains(&marker.to_lowercase()))
    }

    /// 挖掘章节，位置编号从 1 开始
    pub fn mine(&self, text: &str) -> Vec<MinedChapter> {
        self.mine_with_offset(text, 0)
    }

    /// 挖掘章节
    ///
    /// # 参数
    /// - `text`: 原始生成文本
    /// - `already_collected`: 调用方已收集的章节数，位置编号从其后继续
    ///
    /// # 返回
    /// 按出现顺序排列的章节；计划产物和过短文本返回空列表
    pub fn mine_with_offset(&self, text: &str, already_collected: usize) -> Vec<MinedChapter> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        if self.is_plan_artifact(text) {
            debug!("跳过计划/大纲产物");
            return Vec::new();
        }

        match self.split_by_headings(text, already_collected) {
            Ok(chapters) if !chapters.is_empty() => chapters,
            Ok(_) => self
                .whole_block(text, already_collected, self.config.min_prose_chars)
                .into_iter()
                .collect(),
            Err(err) => {
                // 有标记但全部低于噪声阈值，整体保留，不丢内容
                debug!("{}，整段作为单章", err);
                self.whole_block(text, already_collected, self.config.min_chapter_chars)
                    .into_iter()
                    .collect()
            }
        }
    }

    /// 按章节标记切分
    ///
    /// 没有任何标记时返回空列表；有标记但全部被判为噪声时返回 `AmbiguousExtraction`
    fn split_by_headings(
        &self,
        text: &str,
        already_collected: usize,
    ) -> Result<Vec<MinedChapter>, PipelineError> {
        let headings: Vec<_> = self
            .heading
            .captures_iter(text)
            .filter(|caps| {
                caps.get(0)
                    .map(|m| m.as_str().trim().chars().count() <= MAX_HEADING_LINE_CHARS)
                    .unwrap_or(false)
            })
            .collect();

        if headings.is_empty() {
            return Ok(Vec::new());
        }

        let mut chapters = Vec::new();

        for (i, caps) in headings.iter().enumerate() {
            let Some(whole) = caps.get(0) else { continue };
            let segment_end = headings
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(text.len());

            let segment = text[whole.start()..segment_end].trim();
            let body = text[whole.end()..segment_end].trim();

            if body.is_empty() || segment.chars().count() < self.config.min_chapter_chars {
                debug!("丢弃过短的章节片段: {}", whole.as_str().trim());
                continue;
            }

            let declared = caps.get(1).and_then(|m| parse_number(m.as_str()));
            let number = declared.unwrap_or((already_collected + chapters.len() + 1) as u32);
            let heading_title = caps.get(2).map(|m| m.as_str()).unwrap_or("");

            chapters.push(MinedChapter {
                number,
                title: self.resolve_title(heading_title, number, body),
                content: body.to_string(),
                number_from_heading: declared.is_some(),
            });
        }

        if chapters.is_empty() {
            return Err(PipelineError::AmbiguousExtraction(format!(
                "{} 个章节标记均低于噪声阈值",
                headings.len()
            )));
        }

        Ok(chapters)
    }

    fn whole_block(&self, text: &str, already_collected: usize, min_chars: usize) -> Option<MinedChapter> {
        let body = text.trim();
        if body.chars().count() <= min_chars {
            return None;
        }

        let number = (already_collected + 1) as u32;
        Some(MinedChapter {
            number,
            title: self.resolve_title("", number, body),
            content: body.to_string(),
            number_from_heading: false,
        })
    }

    /// 解析章节标题
    ///
    /// 优先使用标题行冒号后的文本；通用标题尝试用正文首行替换
    pub fn resolve_title(&self, heading_title: &str, number: u32, body: &str) -> String {
        let title = sanitize_title(heading_title);
        if !self.is_generic_title(&title) {
            return title;
        }

        if let Some(derived) = self.derive_title(body) {
            return derived;
        }

        if title.is_empty() {
            format!("Chapter {}", number)
        } else {
            title
        }
    }

    /// 是否为通用标题（空、"Chapter N" 或包含 "output" 之类的词）
    pub fn is_generic_title(&self, title: &str) -> bool {
        if title.trim().is_empty() || self.generic_title.is_match(title.trim()) {
            return true;
        }
        let lower = title.to_lowercase();
        self.config
            .generic_title_words
            .iter()
            .any(|word| lower.contains(&word.to_lowercase()))
    }

    fn derive_title(&self, body: &str) -> Option<String> {
        let line = first_meaningful_line(body)?;
        let too_long = line.chars().count() > self.config.max_derived_title_chars;
        let sentence = line.ends_with(|c: char| matches!(c, '.' | '!' | '?' | ','));

        if too_long || sentence || self.is_generic_title(&line) || self.heading.is_match(&line) {
            return None;
        }
        Some(line)
    }
}

impl Default for ChapterTextMiner {
    fn default() -> Self {
        Self::new()
    }
}

/// 解析标题中的章节编号（阿拉伯数字或英文数字词）
fn parse_number(raw: &str) -> Option<u32> {
    let lower = raw.trim().to_lowercase();
    if let Ok(n) = lower.parse::<u32>() {
        return (n > 0).then_some(n);
    }
    NUMBER_WORDS
        .iter()
        .find(|(word, _)| *word == lower)
        .map(|(_, n)| *n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_prose(sentences: usize) -> String {
        "The rain fell on the harbor while the lamps burned low. ".repeat(sentences)
    }

    #[test]
    fn test_two_headings() {
        let miner = ChapterTextMiner::new();
        let text = "Chapter 1: The Beginning\n\nThe city never sleeps...\n\nChapter 2: The Investigation\n\nDetective arrived...";

        let chapters = miner.mine(text);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].number, 1);
        assert_eq!(chapters[0].title, "The Beginning");
        assert_eq!(chapters[0].content, "The city never sleeps...");
        assert_eq!(chapters[1].number, 2);
        assert_eq!(chapters[1].title, "The Investigation");
        assert_eq!(chapters[1].content, "Detective arrived...");
    }

    #[test]
    fn test_heading_number_wins_over_position() {
        let miner = ChapterTextMiner::new();
        let text = format!("Chapter 5: Late Start\n\n{}", long_prose(2));

        let chapters = miner.mine_with_offset(&text, 1);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].number, 5);
        assert!(chapters[0].number_from_heading);
    }

    #[test]
    fn test_markdown_and_word_headings() {
        let miner = ChapterTextMiner::new();
        let text = format!(
            "## **Chapter Three: The Dock**\n\n{}\n\n# CHAPTER SEVENTEEN - Tides\n\n{}",
            long_prose(1),
            long_prose(1)
        );

        let chapters = miner.mine(&text);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].number, 3);
        assert_eq!(chapters[0].title, "The Dock");
        assert_eq!(chapters[1].number, 17);
        assert_eq!(chapters[1].title, "Tides");
    }

    #[test]
    fn test_noise_segments_discarded() {
        let miner = ChapterTextMiner::new();
        let text = format!("Chapter 1: Real\n\n{}\n\nChapter 2\n\nok", long_prose(1));

        let chapters = miner.mine(&text);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].number, 1);
    }

    #[test]
    fn test_all_noise_falls_back_to_whole_block() {
        let miner = ChapterTextMiner::new();
        let text = "Chapter 1\n\nshort bit\n\nChapter 2\n\nanother bit";

        let chapters = miner.mine(text);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].number, 1);
        assert!(!chapters[0].number_from_heading);
        assert!(chapters[0].content.contains("another bit"));
    }

    #[test]
    fn test_whole_block_without_headings() {
        let miner = ChapterTextMiner::new();
        let text = long_prose(5);

        let chapters = miner.mine_with_offset(&text, 2);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].number, 3);
        assert_eq!(chapters[0].title, "Chapter 3");
    }

    #[test]
    fn test_short_text_without_headings_is_dropped() {
        let miner = ChapterTextMiner::new();
        assert!(miner.mine("Just a short note.").is_empty());
        assert!(miner.mine("   ").is_empty());
    }

    #[test]
    fn test_plan_artifact_rejected() {
        let miner = ChapterTextMiner::new();
        let plan = format!(
            r#"{{"chapter_number": 1, "outline": "Chapter 1: Setup ... {}"}}"#,
            long_prose(5)
        );
        assert!(miner.is_plan_artifact(&plan));
        assert!(miner.mine(&plan).is_empty());

        let fenced = "```json\n[{\"table_of_contents\": []}]\n```";
        assert!(miner.is_plan_artifact(fenced));

        assert!(!miner.is_plan_artifact("Chapter 1: outline of a life"));
    }

    #[test]
    fn test_generic_title_derived_from_body() {
        let miner = ChapterTextMiner::new();
        let text = format!("Chapter 4\n\nThe Lighthouse Keeper\n\n{}", long_prose(1));

        let chapters = miner.mine(&text);
        assert_eq!(chapters[0].title, "The Lighthouse Keeper");
    }

    #[test]
    fn test_generic_title_kept_when_body_starts_with_sentence() {
        let miner = ChapterTextMiner::new();
        let text = format!("Chapter 2:\n\n{}", long_prose(1));

        let chapters = miner.mine(&text);
        assert_eq!(chapters[0].title, "Chapter 2");
    }

    #[test]
    fn test_output_title_is_generic() {
        let miner = ChapterTextMiner::new();
        assert!(miner.is_generic_title("Writer Output"));
        assert!(miner.is_generic_title("chapter 9"));
        assert!(!miner.is_generic_title("The Dock"));
    }

    #[test]
    fn test_prose_mention_is_not_a_heading() {
        let miner = ChapterTextMiner::new();
        let text = format!(
            "Chapter 1: Arrival\n\n{}\nChapter 1 of her life had ended long before she ever set foot on the long wooden pier, and the whole grey harbor knew it very well.",
            long_prose(1)
        );

        let chapters = miner.mine(&text);
        assert_eq!(chapters.len(), 1);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("12"), Some(12));
        assert_eq!(parse_number("Twelve"), Some(12));
        assert_eq!(parse_number("0"), None);
        assert_eq!(parse_number("zero"), None);
    }
}
