//! # 错误类型定义

use thiserror::Error;

/// 拦截系统主要错误类型
#[derive(Debug, Error)]
pub enum InterceptError {
    /// 配置相关错误
    #[error("配置错误: {message}")]
    Config {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 请求/响应体或 SSE 帧解析错误
    #[error("解析错误: {message}")]
    Parse {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 网络通信错误
    #[error("网络错误: {message}")]
    Network {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 端点分类错误（模式表构建失败等）
    #[error("分类错误: {message}")]
    Classification {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 流式重建错误
    #[error("流处理错误: {message}")]
    Stream {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 平台处理器错误
    #[error("处理器错误[{platform}]: {message}")]
    Handler {
        /// 错误描述
        message: String,
        /// 出错的平台
        platform: String,
        /// 底层错误
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 事件结构不被识别
    #[error("事件结构错误: {message}")]
    Schema {
        /// 错误描述
        message: String,
    },

    /// IO相关错误
    #[error("IO错误: {message}")]
    Io {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: std::io::Error,
    },

    /// 序列化/反序列化错误
    #[error("序列化错误: {message}")]
    Serialization {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: anyhow::Error,
    },

    /// 系统内部错误
    #[error("内部错误: {message}")]
    Internal {
        /// 错误描述
        message: String,
        /// 底层错误
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 上下文包装
    #[error("{context}: {source}")]
    Context {
        /// 附加的上下文
        context: String,
        /// 底层错误
        #[source]
        source: Box<InterceptError>,
    },
}

impl InterceptError {
    /// 创建配置错误
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的配置错误
    pub fn config_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建解析错误
    pub fn parse<T: Into<String>>(message: T) -> Self {
        Self::Parse {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的解析错误
    pub fn parse_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Parse {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建网络错误
    pub fn network<T: Into<String>>(message: T) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的网络错误
    pub fn network_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建分类错误
    pub fn classification<T: Into<String>>(message: T) -> Self {
        Self::Classification {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的分类错误
    pub fn classification_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Classification {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建流处理错误
    pub fn stream<T: Into<String>>(message: T) -> Self {
        Self::Stream {
            message: message.into(),
            source: None,
        }
    }

    /// 创建处理器错误
    pub fn handler<T: Into<String>, P: Into<String>>(message: T, platform: P) -> Self {
        Self::Handler {
            message: message.into(),
            platform: platform.into(),
            source: None,
        }
    }

    /// 创建带来源的处理器错误
    pub fn handler_with_source<T: Into<String>, P: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        platform: P,
        source: E,
    ) -> Self {
        Self::Handler {
            message: message.into(),
            platform: platform.into(),
            source: Some(source.into()),
        }
    }

    /// 创建事件结构错误
    pub fn schema<T: Into<String>>(message: T) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// 创建内部错误
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的内部错误
    pub fn internal_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 错误分类（用于日志聚合）
    #[must_use]
    pub fn category(&self) -> super::ErrorCategory {
        match self {
            Self::Config { .. } | Self::Classification { .. } | Self::Schema { .. } => {
                super::ErrorCategory::Setup
            }
            Self::Parse { .. } | Self::Serialization { .. } => super::ErrorCategory::Payload,
            Self::Network { .. } | Self::Io { .. } => super::ErrorCategory::Transport,
            Self::Stream { .. } | Self::Handler { .. } | Self::Internal { .. } => {
                super::ErrorCategory::Processing
            }
            Self::Context { source, .. } => source.category(),
        }
    }
}

impl From<std::io::Error> for InterceptError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for InterceptError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("TOML解析失败", err)
    }
}

impl From<serde_json::Error> for InterceptError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: "JSON序列化失败".to_string(),
            source: err.into(),
        }
    }
}

impl From<regex::Error> for InterceptError {
    fn from(err: regex::Error) -> Self {
        Self::classification_with_source("端点正则编译失败", err)
    }
}

impl From<url::ParseError> for InterceptError {
    fn from(err: url::ParseError) -> Self {
        Self::parse_with_source("URL解析失败", err)
    }
}

impl From<reqwest::Error> for InterceptError {
    fn from(err: reqwest::Error) -> Self {
        Self::network_with_source("HTTP请求失败", err)
    }
}
