//! # 日志配置模块
//!
//! 提供统一的结构化日志宏（`linfo!` / `ldebug!` / `lwarn!` / `lerror!`）
//! 以及基于 `tracing-subscriber` 的日志初始化。
//!
//! 所有宏的参数顺序一致：
//! `(关联ID, LogStage, LogComponent, 操作名, 描述, 额外字段...)`

use std::env;
use std::fmt;

use tracing_subscriber::{EnvFilter, fmt as fmt_layer, layer::SubscriberExt, util::SubscriberInitExt};

/// 日志所处的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStage {
    /// 启动
    Startup,
    /// 关闭
    Shutdown,
    /// 安装拦截器
    Injection,
    /// URL 分类
    Classification,
    /// 请求阶段
    Request,
    /// 响应阶段
    Response,
    /// 流式重建
    Streaming,
    /// 事件派发
    Dispatch,
    /// 平台处理
    Handling,
    /// 错误
    Error,
}

impl LogStage {
    /// 日志字段中的名称
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Injection => "injection",
            Self::Classification => "classification",
            Self::Request => "request",
            Self::Response => "response",
            Self::Streaming => "streaming",
            Self::Dispatch => "dispatch",
            Self::Handling => "handling",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 产生日志的组件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogComponent {
    /// 主流程
    Main,
    /// 配置
    Config,
    /// 拦截器
    Interceptor,
    /// 响应体捕获
    Capture,
    /// 端点分类
    Classifier,
    /// 增量处理器
    StreamProcessor,
    /// 事件监控
    Monitor,
    /// 平台路由
    PlatformManager,
    /// ChatGPT 处理器
    ChatGpt,
    /// Claude 处理器
    Claude,
    /// 网络请求
    Fetch,
}

impl LogComponent {
    /// 日志字段中的名称
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Config => "config",
            Self::Interceptor => "interceptor",
            Self::Capture => "capture",
            Self::Classifier => "classifier",
            Self::StreamProcessor => "stream_processor",
            Self::Monitor => "monitor",
            Self::PlatformManager => "platform_manager",
            Self::ChatGpt => "chatgpt",
            Self::Claude => "claude",
            Self::Fetch => "fetch",
        }
    }
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 结构化 info 日志
#[macro_export]
macro_rules! linfo {
    ($id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr $(, $($field:tt)+)?) => {
        ::tracing::info!(
            request_id = %$id,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            $($($field)+,)?
            "{}",
            $description
        )
    };
}

/// 结构化 debug 日志
#[macro_export]
macro_rules! ldebug {
    ($id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr $(, $($field:tt)+)?) => {
        ::tracing::debug!(
            request_id = %$id,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            $($($field)+,)?
            "{}",
            $description
        )
    };
}

/// 结构化 warn 日志
#[macro_export]
macro_rules! lwarn {
    ($id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr $(, $($field:tt)+)?) => {
        ::tracing::warn!(
            request_id = %$id,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            $($($field)+,)?
            "{}",
            $description
        )
    };
}

/// 结构化 error 日志
#[macro_export]
macro_rules! lerror {
    ($id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr $(, $($field:tt)+)?) => {
        ::tracing::error!(
            request_id = %$id,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            $($($field)+,)?
            "{}",
            $description
        )
    };
}

/// 初始化优化的日志系统
///
/// `RUST_LOG` 存在时优先使用；重复初始化（例如测试中）会被静默忽略。
pub fn init_optimized_logging(log_level: Option<&String>) {
    let level = log_level.map_or("info", std::string::String::as_str);

    let default_filter = format!("{level},chat_intercept={level},reqwest=warn,hyper=warn");

    let log_filter = env::var("RUST_LOG").unwrap_or(default_filter);

    let result = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .with(
            fmt_layer::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init();

    if result.is_ok() {
        tracing::debug!("📋 日志系统初始化完成 (level={level})");
    }
}

/// 环境变量设置指南
pub fn print_logging_help() {
    println!("📋 日志配置指南:");
    println!("  RUST_LOG=info                          # 标准日志级别");
    println!("  RUST_LOG=debug                         # 调试级别");
    println!("  RUST_LOG=chat_intercept=trace          # 拦截器详细追踪");
    println!("  RUST_LOG=info,chat_intercept::streaming=debug  # 仅流式重建调试");
    println!();
    println!("💡 也可以通过 CHAT_INTERCEPT_LOG_LEVEL 或配置文件 [logging].level 设置默认级别");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_and_component_display_are_snake_case() {
        assert_eq!(LogStage::Streaming.to_string(), "streaming");
        assert_eq!(LogComponent::StreamProcessor.to_string(), "stream_processor");
        assert_eq!(LogComponent::PlatformManager.as_str(), "platform_manager");
    }
}
