//! 日志初始化
//!
//! 库本身只通过 `tracing` 宏输出日志；二进制和测试在启动时调用一次
//! [`init_logging`] 安装订阅者。

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// 安装 fmt 订阅者，`RUST_LOG` 未设置时使用 `info`
///
/// 同时把 `log` crate 的记录转发到 `tracing`。重复调用是无害的。
pub fn init_logging() -> bool {
    init_logging_with("info")
}

/// 同 [`init_logging`]，`RUST_LOG` 未设置时使用 `default_directives`
///
/// 返回本次调用是否安装了订阅者（已有全局订阅者时返回 `false`）。
pub fn init_logging_with(default_directives: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer());
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!("log bridge not installed: {}", e);
    }
    true
}
