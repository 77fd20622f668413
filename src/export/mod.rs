// 导出模块
// 唯一的异步边界：下载只给出远程地址的格式

pub mod fetch;

pub use fetch::{ByteSource, FetchedBytes, RemoteFormatResolver, ReqwestByteSource};
