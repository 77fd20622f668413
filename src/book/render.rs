use super::images::{layout, LayoutBlock};
use super::types::{Asset, Book, Chapter};
use crate::format::FormatDescriptor;
use crate::text::markdown_to_plain_text;
use html_escape::{encode_double_quoted_attribute, encode_text};
use tracing::debug;

/// 章节标题行：默认标题不重复编号
fn chapter_heading(chapter: &Chapter) -> String {
    if chapter.has_default_title() {
        chapter.title.clone()
    } else {
        format!("Chapter {}: {}", chapter.number, chapter.title)
    }
}

/// 合成 Markdown
///
/// 每章一个二级标题，结构性段落排在章节之前
pub fn render_markdown(book: &Book) -> String {
    let mut out = format!("# {}\n\n", book.title);

    for (_, heading, text) in book.structural.present() {
        out.push_str(&format!("## {}\n\n{}\n\n", heading, text));
    }

    for chapter in &book.chapters {
        out.push_str(&format!("## {}\n\n", chapter_heading(chapter)));
        for block in layout(chapter) {
            match block {
                LayoutBlock::Text(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        out.push_str(text);
                        out.push_str("\n\n");
                    }
                }
                LayoutBlock::Images(images) => {
                    for image in images {
                        out.push_str(&format!("![{}]({})\n\n", image.prompt, image.url));
                    }
                }
            }
        }
    }

    if !book.assets.is_empty() {
        out.push_str("## Gallery\n\n");
        for image in &book.assets {
            out.push_str(&format!("![{}]({})\n\n", image.prompt, image.url));
        }
    }

    format!("{}\n", out.trim_end())
}

/// 合成纯文本：从 Markdown 去掉所有标记
pub fn render_plain_text(book: &Book) -> String {
    markdown_to_plain_text(&render_markdown(book))
}

/// 段落转 HTML：空行分段，段内换行转 `<br />`
fn paragraphs_html(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let lines: Vec<String> = p.lines().map(|l| encode_text(l.trim()).to_string()).collect();
            format!("<p>{}</p>\n", lines.join("<br />"))
        })
        .collect()
}

fn figures_html(images: &[Asset]) -> String {
    images
        .iter()
        .map(|image| {
            let caption = if image.prompt.is_empty() {
                String::new()
            } else {
                format!("<figcaption>{}</figcaption>", encode_text(&image.prompt))
            };
            format!(
                "<figure><img src=\"{}\" alt=\"{}\" />{}</figure>\n",
                encode_double_quoted_attribute(&image.url),
                encode_double_quoted_attribute(&image.prompt),
                caption
            )
        })
        .collect()
}

/// 合成 HTML 文档
///
/// 每章一个 `<section id="chapter-N">`，锚点 ID 稳定
pub fn render_html(book: &Book) -> String {
    let title = encode_text(&book.title);
    let mut body = format!("<article class=\"book\">\n<h1>{}</h1>\n", title);

    for (id, heading, text) in book.structural.present() {
        body.push_str(&format!(
            "<section id=\"{}\" class=\"structural\">\n<h2>{}</h2>\n{}</section>\n",
            id,
            heading,
            paragraphs_html(text)
        ));
    }

    for chapter in &book.chapters {
        body.push_str(&format!(
            "<section id=\"{}\" class=\"chapter\" data-chapter-number=\"{}\">\n<h2>{}</h2>\n",
            chapter.id,
            chapter.number,
            encode_text(&chapter_heading(chapter))
        ));
        for block in layout(chapter) {
            match block {
                LayoutBlock::Text(text) => body.push_str(&paragraphs_html(text)),
                LayoutBlock::Images(images) => body.push_str(&figures_html(images)),
            }
        }
        body.push_str("</section>\n");
    }

    if !book.assets.is_empty() {
        body.push_str("<section id=\"gallery\" class=\"gallery\">\n");
        body.push_str(&figures_html(&book.assets));
        body.push_str("</section>\n");
    }

    body.push_str("</article>");

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\" />\n<title>{}</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        title, body
    )
}

/// 补齐 html / md / txt：上游没有提供时由章节和结构性段落合成
pub fn fill_missing_formats(book: &mut Book) {
    if !book.formats.contains_key("md") {
        debug!("合成 md 格式");
        let md = render_markdown(book);
        book.formats
            .insert("md".to_string(), FormatDescriptor::text("md", "text/markdown", md));
    }
    if !book.formats.contains_key("html") {
        debug!("合成 html 格式");
        let html = render_html(book);
        book.formats
            .insert("html".to_string(), FormatDescriptor::text("html", "text/html", html));
    }
    if !book.formats.contains_key("txt") {
        debug!("合成 txt 格式");
        let txt = render_plain_text(book);
        book.formats
            .insert("txt".to_string(), FormatDescriptor::text("txt", "text/plain", txt));
    }
}
