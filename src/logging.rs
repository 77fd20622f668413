use tracing_subscriber::EnvFilter;

/// 初始化日志
///
/// `RUST_LOG` 优先，其次使用调用方给定的级别，最后回退到 `info`。
/// 日志写到 stderr，stdout 留给命令行工具的输出。重复调用不会报错。
///
/// # 参数
/// - `level`: 回退的过滤表达式，如 `"debug"` 或 `"book_reconciler_lib=debug"`
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
