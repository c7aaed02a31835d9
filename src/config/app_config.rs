//! # 应用配置结构定义

use serde::{Deserialize, Serialize};

use crate::endpoint::PatternRule;

/// 应用主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 拦截器配置
    #[serde(default)]
    pub interceptor: InterceptorConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 自定义端点规则；缺省时使用内置规则表
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Vec<PatternRule>>,
}

/// 拦截器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    /// 拦截器所在页面地址，用于判断平台
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    /// 流式响应空闲超时（秒）
    pub idle_timeout_secs: u64,
    /// 单个响应体的最大捕获字节数
    pub max_capture_bytes: usize,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            page_url: None,
            idle_timeout_secs: 120,
            max_capture_bytes: 16 * 1024 * 1024,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别，`RUST_LOG` 优先
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
