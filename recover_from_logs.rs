/// 从交互日志恢复书籍
///
/// 用法: recover_from_logs <日志.json> [--json] [--config 配置.json]
///
/// 日志文件是条目数组；默认输出带 front matter 的 Markdown，--json 输出完整书籍

use book_reconciler_lib::{export_markdown, init_logging, load_config, PipelineConfig, RecoveryExtractor};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::ExitCode;

fn main() -> ExitCode {
    init_logging("info");

    let mut log_path = None;
    let mut as_json = false;
    let mut config_path = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => as_json = true,
            "--config" => config_path = args.next(),
            _ => log_path = Some(arg),
        }
    }

    let Some(log_path) = log_path else {
        eprintln!("用法: recover_from_logs <日志.json> [--json] [--config 配置.json]");
        return ExitCode::from(2);
    };

    let config = match config_path.map(|p| load_config(Path::new(&p))) {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            eprintln!("错误: {}", e);
            return ExitCode::FAILURE;
        }
        None => PipelineConfig::default(),
    };

    let entries: Vec<Value> = match fs::read_to_string(&log_path)
        .map_err(|e| e.to_string())
        .and_then(|content| serde_json::from_str::<Value>(&content).map_err(|e| e.to_string()))
    {
        Ok(Value::Array(entries)) => entries,
        Ok(_) => {
            eprintln!("错误: {} 不是日志数组", log_path);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("错误: 读取 {} 失败: {}", log_path, e);
            return ExitCode::FAILURE;
        }
    };

    let report = RecoveryExtractor::with_config(&config).recover(&entries);
    let Some(recovered) = report.book else {
        eprintln!("无法恢复: {}", report.reason.unwrap_or_default());
        return ExitCode::FAILURE;
    };

    if as_json {
        match serde_json::to_string_pretty(&recovered.into_book()) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("错误: 序列化书籍失败: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", export_markdown(&recovered, chrono::Utc::now()));
    }
    ExitCode::SUCCESS
}
