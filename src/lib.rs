// 书籍重建流水线
// 遥测片段 -> 规范化执行记录 -> 书籍文档；执行记录不可用时从交互日志恢复

pub mod book;
pub mod config;
pub mod error;
pub mod execution;
pub mod export;
pub mod format;
pub mod logging;
pub mod merge;
pub mod mining;
pub mod recovery;
pub mod text;


// 重新导出主要类型
pub use book::{Book, BookAggregator, Chapter, ImagePlacement};
pub use config::{load_config, PipelineConfig};
pub use error::PipelineError;
pub use execution::{ExecutionRecord, ExecutionStateNormalizer, ExecutionStatus};
pub use export::{ByteSource, RemoteFormatResolver, ReqwestByteSource};
pub use format::{FormatDescriptor, FormatPayloadNormalizer};
pub use logging::init_logging;
pub use mining::{ChapterResolver, ChapterTextMiner};
pub use recovery::{export_markdown, RecoveryExtractor, RecoveryReport};
