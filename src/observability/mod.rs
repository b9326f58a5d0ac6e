//! 可观测性

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志：RUST_LOG 优先，否则使用配置中的级别；重复初始化静默忽略
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
