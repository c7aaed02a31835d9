//! # 平台识别
//!
//! 根据页面（或请求）URL 的主机名判断当前属于哪个 AI 聊天平台。
//! 纯函数，只做常数次字符串比较，可在每个被拦截的请求上调用。

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// AI 聊天平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// chatgpt.com / chat.openai.com
    #[serde(rename = "chatgpt")]
    ChatGpt,
    /// claude.ai
    Claude,
    /// 未识别的平台；反序列化时任何未知字符串都会落到这里
    #[default]
    #[serde(other)]
    Unknown,
}

impl Platform {
    /// 小写名称
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChatGpt => "chatgpt",
            Self::Claude => "claude",
            Self::Unknown => "unknown",
        }
    }

    /// 从配置中的平台名解析（大小写不敏感）
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "chatgpt" | "openai" => Self::ChatGpt,
            "claude" | "anthropic" => Self::Claude,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const CHATGPT_HOSTS: &[&str] = &["chatgpt.com", "chat.openai.com"];
const CLAUDE_HOSTS: &[&str] = &["claude.ai"];

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// 根据 URL 主机名识别平台
#[must_use]
pub fn detect_platform(location: &Url) -> Platform {
    let Some(host) = location.host_str() else {
        return Platform::Unknown;
    };
    let host = host.to_ascii_lowercase();

    if CHATGPT_HOSTS.iter().any(|d| host_matches(&host, d)) {
        Platform::ChatGpt
    } else if CLAUDE_HOSTS.iter().any(|d| host_matches(&host, d)) {
        Platform::Claude
    } else {
        Platform::Unknown
    }
}

/// 字符串版本；无法解析的 URL 视为未知平台
#[must_use]
pub fn detect_platform_str(location: &str) -> Platform {
    Url::parse(location).map_or(Platform::Unknown, |url| detect_platform(&url))
}
