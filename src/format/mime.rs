/// 格式键规范化
///
/// 小写、去掉前导点，并合并常见别名（markdown → md，htm → html，text → txt）
pub fn canonical_format_key(raw: &str) -> String {
    let key = raw.trim().trim_start_matches('.').to_lowercase();
    match key.as_str() {
        "markdown" | "mdown" => "md".to_string(),
        "htm" | "xhtml" => "html".to_string(),
        "text" | "plain" | "plaintext" => "txt".to_string(),
        "tex" => "latex".to_string(),
        _ => key,
    }
}

/// 静态的格式 → MIME 对照表，未知格式回退为 text/plain
pub fn mime_for_format(key: &str) -> &'static str {
    match canonical_format_key(key).as_str() {
        "html" => "text/html",
        "md" => "text/markdown",
        "txt" => "text/plain",
        "json" => "application/json",
        "xml" => "application/xml",
        "csv" => "text/csv",
        "latex" => "application/x-latex",
        "rtf" => "application/rtf",
        "pdf" => "application/pdf",
        "epub" => "application/epub+zip",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "odt" => "application/vnd.oasis.opendocument.text",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "text/plain",
    }
}

/// 该格式的自然形态是否为文本
pub fn is_textual_format(key: &str) -> bool {
    matches!(
        canonical_format_key(key).as_str(),
        "html" | "md" | "txt" | "json" | "xml" | "csv" | "latex" | "rtf"
    )
}

/// 从 data URI 头部解析 MIME 类型
///
/// `data:text/html;base64,...` → `text/html`；缺省时为 `text/plain`（RFC 2397）
pub fn mime_from_data_uri(uri: &str) -> Option<&str> {
    let rest = strip_data_scheme(uri)?;
    let header = &rest[..rest.find(',')?];
    let mime = header.split(';').next().unwrap_or("").trim();
    Some(if mime.is_empty() { "text/plain" } else { mime })
}

/// 去掉 `data:` 前缀（大小写不敏感）
pub fn strip_data_scheme(uri: &str) -> Option<&str> {
    let trimmed = uri.trim_start();
    // 按字节比较前缀，多字节字符开头的文本不会落在非字符边界上
    if trimmed.as_bytes().get(..5).is_some_and(|p| p.eq_ignore_ascii_case(b"data:")) {
        Some(&trimmed[5..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_data_scheme_multibyte_text() {
        assert_eq!(strip_data_scheme("第一章 开始"), None);
        assert_eq!(strip_data_scheme("abcdé and more"), None);
        assert_eq!(strip_data_scheme("dat"), None);
        assert_eq!(strip_data_scheme("DATA:text/plain,第一"), Some("text/plain,第一"));
        assert_eq!(mime_from_data_uri("  data:,hi"), Some("text/plain"));
    }

    #[test]
    fn test_canonical_keys() {
        assert_eq!(canonical_format_key("Markdown"), "md");
        assert_eq!(canonical_format_key(".HTM"), "html");
        assert_eq!(canonical_format_key("text"), "txt");
        assert_eq!(canonical_format_key("pdf"), "pdf");
    }

    #[test]
    fn test_mime_table() {
        assert_eq!(mime_for_format("html"), "text/html");
        assert_eq!(mime_for_format("markdown"), "text/markdown");
        assert_eq!(mime_for_format("pdf"), "application/pdf");
        assert_eq!(mime_for_format("unknown-format"), "text/plain");
    }

    #[test]
    fn test_mime_from_data_uri() {
        assert_eq!(mime_from_data_uri("data:application/pdf;base64,AAAA"), Some("application/pdf"));
        assert_eq!(mime_from_data_uri("DATA:;base64,AAAA"), Some("text/plain"));
        assert_eq!(mime_from_data_uri("data:no-comma"), None);
        assert_eq!(mime_from_data_uri("https://example.com"), None);
    }

    #[test]
    fn test_textual_formats() {
        assert!(is_textual_format("markdown"));
        assert!(!is_textual_format("pdf"));
    }
}
