// 恢复模块
// 主执行记录不可用时，直接从交互日志重建最小书籍

pub mod extractor;
pub mod markdown_export;

pub use extractor::{RecoveredBook, RecoveredChapter, RecoveryExtractor, RecoveryReport};
pub use markdown_export::export_markdown;
