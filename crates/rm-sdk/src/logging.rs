//! 日志初始化
//!
//! 库内部只使用 `tracing` 宏；由应用在启动时调用 [`init_logger`] 安装输出。

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// 默认日志过滤规则
pub const DEFAULT_LOG_FILTER: &str = "rm_driver=info,rm_client=info,rm_transport=warn";

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Log bridge already installed: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),

    #[error("Global subscriber already set: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 构造过滤器：`RUST_LOG` 优先，否则使用 `default_filter`
pub fn env_filter(default_filter: &str) -> Result<EnvFilter, LoggerError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(default_filter)?),
    }
}

/// 安装全局日志输出
///
/// - `tracing_subscriber::fmt` + `EnvFilter`
/// - `log` crate 的记录经 `LogTracer` 转发到 tracing
///
/// # 错误
/// 过滤规则无法解析，或进程内已安装过日志输出
pub fn init_logger(default_filter: &str) -> Result<(), LoggerError> {
    let filter = env_filter(default_filter)?;
    tracing_log::LogTracer::init()?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
