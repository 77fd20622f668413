use pulldown_cmark::{Event, Parser as MdParser, Tag};
use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;

/// 统计空白分隔的词数
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// 按字符数截取前缀（不会切断 UTF-8 字符）
pub fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// 去除 HTML 标签，保留文本内容
pub fn strip_html_tags(text: &str) -> String {
    if !text.contains('<') {
        return text.to_string();
    }
    let fragment = Html::parse_fragment(text);
    fragment.root_element().text().collect::<Vec<_>>().join("")
}

fn emphasis_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*|__|\*|`|~~").expect("emphasis pattern"))
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern"))
}

/// 清理标题
///
/// 去掉 HTML 标签、Markdown 强调符号和标题井号，折叠空白
pub fn sanitize_title(raw: &str) -> String {
    let without_tags = strip_html_tags(raw);
    let without_marks = emphasis_regex().replace_all(&without_tags, "");
    let collapsed = whitespace_regex().replace_all(without_marks.trim(), " ");

    collapsed
        .trim_start_matches('#')
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | '–' | '—' | '_'))
        .to_string()
}

/// 取正文第一条非空的清理后文本行
pub fn first_meaningful_line(body: &str) -> Option<String> {
    body.lines()
        .map(sanitize_title)
        .find(|line| !line.is_empty())
}

/// Markdown 转纯文本
///
/// 丢弃所有标记和内嵌 HTML，块级元素之间保留空行
pub fn markdown_to_plain_text(markdown: &str) -> String {
    let parser = MdParser::new(markdown);
    let mut output = String::new();

    for event in parser {
        match event {
            Event::Text(text) | Event::Code(text) => output.push_str(&text),
            Event::SoftBreak | Event::HardBreak => output.push('\n'),
            Event::Start(Tag::Item) => output.push_str("- "),
            Event::End(Tag::Paragraph)
            | Event::End(Tag::Heading(..))
            | Event::End(Tag::CodeBlock(_))
            | Event::End(Tag::BlockQuote) => output.push_str("\n\n"),
            Event::End(Tag::Item) => output.push('\n'),
            Event::End(Tag::List(_)) => output.push('\n'),
            Event::Rule => output.push_str("\n\n"),
            // 内嵌 HTML 直接丢弃
            _ => {}
        }
    }

    collapse_blank_lines(&output)
}

/// 把三个以上连续换行折叠成一个空行
pub fn collapse_blank_lines(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\n{3,}").expect("blank line pattern"));
    re.replace_all(text.trim(), "\n\n").to_string()
}
