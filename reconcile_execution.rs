/// 从执行遥测片段重建书籍
///
/// 用法: reconcile_execution <片段A.json> [片段B.json] [--markdown] [--fetch-remote] [--config 配置.json]
///
/// 默认输出书籍 JSON；--markdown 只输出 md 格式；--fetch-remote 下载只给出 URL 的格式

use book_reconciler_lib::{
    init_logging, load_config, BookAggregator, ExecutionStateNormalizer, PipelineConfig,
    RemoteFormatResolver, ReqwestByteSource,
};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::ExitCode;

fn read_fragment(path: &str) -> Result<Value, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("读取 {} 失败: {}", path, e))?;
    serde_json::from_str(&content).map_err(|e| format!("解析 {} 失败: {}", path, e))
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging("info");

    let mut fragments = Vec::new();
    let mut markdown = false;
    let mut fetch_remote = false;
    let mut config_path = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--markdown" => markdown = true,
            "--fetch-remote" => fetch_remote = true,
            "--config" => config_path = args.next(),
            _ => fragments.push(arg),
        }
    }

    if fragments.is_empty() || fragments.len() > 2 {
        eprintln!("用法: reconcile_execution <片段A.json> [片段B.json] [--markdown] [--fetch-remote] [--config 配置.json]");
        return ExitCode::from(2);
    }

    let config = match config_path {
        Some(path) => match load_config(Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("错误: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => PipelineConfig::default(),
    };

    let mut raw = Vec::new();
    for path in &fragments {
        match read_fragment(path) {
            Ok(value) => raw.push(value),
            Err(e) => {
                eprintln!("错误: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    let second = raw.get(1).cloned().unwrap_or(Value::Null);

    let record = ExecutionStateNormalizer::with_config(&config).normalize(&raw[0], &second);
    let mut book = BookAggregator::with_config(&config).aggregate(&record);

    if fetch_remote && !book.remote_formats.is_empty() {
        let resolver = RemoteFormatResolver::new(Box::new(ReqwestByteSource::new(&config.export)), &config.export);
        resolver.resolve(&mut book).await;
    }

    if markdown {
        match book.format("md").and_then(|f| f.as_text()) {
            Some(md) => println!("{}", md),
            None => {
                eprintln!("错误: 书籍没有 Markdown 格式");
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    match serde_json::to_string_pretty(&book) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("错误: 序列化书籍失败: {}", e);
            ExitCode::FAILURE
        }
    }
}
