use super::extractor::RecoveredBook;
use chrono::{DateTime, SecondsFormat, Utc};

/// front matter 里的字符串用 JSON 转义，双引号形式同时是合法 YAML
fn quoted(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value.replace('"', "'")))
}

/// 导出恢复结果为单个 Markdown 文档
///
/// 开头是 front matter（书名、类型、主题、章节数、总词数、恢复时间），
/// 之后每章一个二级标题。
///
/// # 参数
/// - `book`: 恢复出的书籍
/// - `recovered_at`: 写入 front matter 的时间戳，由调用方给出以保持输出可复现
pub fn export_markdown(book: &RecoveredBook, recovered_at: DateTime<Utc>) -> String {
    let mut out = String::from("---\n");
    out.push_str(&format!("title: {}\n", quoted(&book.title)));
    if let Some(genre) = &book.genre {
        out.push_str(&format!("genre: {}\n", quoted(genre)));
    }
    if let Some(theme) = &book.theme {
        out.push_str(&format!("theme: {}\n", quoted(theme)));
    }
    out.push_str(&format!("chapters: {}\n", book.chapters.len()));
    out.push_str(&format!("totalWords: {}\n", book.total_words));
    out.push_str(&format!(
        "recoveredAt: {}\n",
        recovered_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    out.push_str("---\n\n");

    out.push_str(&format!("# {}\n\n", book.title));
    for chapter in &book.chapters {
        if chapter.title == format!("Chapter {}", chapter.number) {
            out.push_str(&format!("## {}\n\n", chapter.title));
        } else {
            out.push_str(&format!("## Chapter {}: {}\n\n", chapter.number, chapter.title));
        }
        out.push_str(chapter.content.trim());
        out.push_str("\n\n");
    }

    format!("{}\n", out.trim_end())
}
