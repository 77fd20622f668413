// 书籍模块
// 从执行记录派生书籍文档：章节、图片、结构性段落、导出格式

pub mod aggregator;
pub mod images;
pub mod render;
pub mod responses;
pub mod types;

pub use aggregator::{derive_book_id, BookAggregator};
pub use responses::GeneratedResponse;
pub use types::*;
