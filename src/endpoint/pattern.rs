//! 端点 URL 匹配模式

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 单个端点的 URL 匹配模式
#[derive(Debug, Clone)]
pub enum EndpointPattern {
    /// 子串匹配
    Contains(String),
    /// 正则匹配（对完整 URL 执行 `is_match`）
    Regex(Regex),
}

impl EndpointPattern {
    /// 解析序列化形式：`/.../` 视为正则，其余按子串处理
    pub fn parse(raw: &str) -> Result<Self, regex::Error> {
        if raw.len() > 2 && raw.starts_with('/') && raw.ends_with('/') {
            Regex::new(&raw[1..raw.len() - 1]).map(Self::Regex)
        } else {
            Ok(Self::Contains(raw.to_string()))
        }
    }

    /// 编译一个正则模式
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Regex)
    }

    /// 子串模式
    pub fn contains(needle: impl Into<String>) -> Self {
        Self::Contains(needle.into())
    }

    /// URL 是否命中
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Contains(needle) => url.contains(needle.as_str()),
            Self::Regex(re) => re.is_match(url),
        }
    }
}

impl fmt::Display for EndpointPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains(needle) => f.write_str(needle),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// 配置文件里的模式写法
///
/// ```toml
/// pattern = "/backend-api/me"              # 子串
/// pattern = "/\\/backend-api\\/me$/"       # 正则（首尾斜杠）
/// pattern = { regex = "/backend-api/me$" } # 显式正则
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternSpec {
    /// 字符串：首尾带 `/` 视为正则，否则为子串
    Serialized(String),
    /// 显式正则
    Regex {
        /// 正则源码
        regex: String,
    },
    /// 显式子串
    Contains {
        /// 需要包含的子串
        contains: String,
    },
}

impl TryFrom<&PatternSpec> for EndpointPattern {
    type Error = regex::Error;

    fn try_from(spec: &PatternSpec) -> Result<Self, Self::Error> {
        match spec {
            PatternSpec::Serialized(raw) => Self::parse(raw),
            PatternSpec::Regex { regex } => Self::regex(regex),
            PatternSpec::Contains { contains } => Ok(Self::contains(contains.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_delimited_strings_become_regexes() {
        let p = EndpointPattern::parse("/conversation/[a-z0-9]+$/").unwrap();
        assert!(matches!(p, EndpointPattern::Regex(_)));
        assert!(p.matches("https://x/conversation/abc1"));
        assert!(!p.matches("https://x/conversation/abc1/more"));
    }

    #[test]
    fn other_strings_are_substrings() {
        let p = EndpointPattern::parse("/backend-api/me").unwrap();
        assert!(matches!(p, EndpointPattern::Contains(_)));
        assert!(p.matches("https://chatgpt.com/backend-api/me"));
        assert_eq!(p.to_string(), "/backend-api/me");
    }

    #[test]
    fn invalid_regex_is_rejected() {
        assert!(EndpointPattern::parse("/(unclosed/").is_err());
    }
}
