// 执行状态模块
// 把两套历史 schema 的遥测片段合并为统一的执行记录

pub mod types;
pub mod shape;
pub mod normalizer;

pub use types::*;
pub use shape::NodeResultsField;
pub use normalizer::ExecutionStateNormalizer;
