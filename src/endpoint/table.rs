//! 端点模式表：平台 → (端点 → 模式)，保持插入顺序

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{EndpointKind, EndpointPattern, PatternSpec};
use crate::error::{InterceptError, Result};
use crate::platform::Platform;

/// 配置文件中的一条规则（数组形式以保证顺序）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    /// 平台名，如 `chatgpt`
    pub platform: String,
    /// 端点名，如 `conversationList`
    pub endpoint: String,
    /// 匹配模式
    pub pattern: PatternSpec,
}

/// 端点模式表，加载后只读
#[derive(Debug, Clone, Default)]
pub struct EndpointPatternTable {
    platforms: IndexMap<Platform, IndexMap<EndpointKind, EndpointPattern>>,
}

static CHATGPT_CONVERSATION_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/backend-api/conversation/([^/?#]+)").expect("valid conversation id regex")
});

static CLAUDE_CONVERSATION_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/chat_conversations/([^/?#]+)").expect("valid conversation id regex")
});

impl EndpointPatternTable {
    /// 空表
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置的 ChatGPT / Claude 模式表
    #[must_use]
    pub fn builtin() -> Self {
        // 内置正则是常量，编译失败只可能是开发期错误
        let re = |p: &str| EndpointPattern::regex(p).expect("builtin endpoint regex");

        let mut table = Self::new();
        table
            .insert(Platform::ChatGpt, EndpointKind::UserInfo, re(r"/backend-api/me(?:\?|$)"))
            .insert(
                Platform::ChatGpt,
                EndpointKind::ConversationList,
                re(r"/backend-api/conversations(?:\?|$)"),
            )
            .insert(
                Platform::ChatGpt,
                EndpointKind::SpecificConversation,
                re(r"/backend-api/conversation/[^/?#]+(?:\?|$)"),
            )
            .insert(
                Platform::ChatGpt,
                EndpointKind::ChatCompletion,
                re(r"/backend-api/(?:f/)?conversation(?:\?|$)"),
            )
            .insert(Platform::Claude, EndpointKind::UserInfo, re(r"/api/account(?:\?|$)"))
            .insert(
                Platform::Claude,
                EndpointKind::ChatCompletion,
                re(r"/api/organizations/[^/]+/chat_conversations/[^/?#]+/(?:retry_)?completion(?:\?|$)"),
            )
            .insert(
                Platform::Claude,
                EndpointKind::SpecificConversation,
                re(r"/api/organizations/[^/]+/chat_conversations/[^/?#]+(?:\?|$)"),
            )
            .insert(
                Platform::Claude,
                EndpointKind::ConversationList,
                re(r"/api/organizations/[^/]+/chat_conversations(?:\?|$)"),
            );
        table
    }

    /// 追加一条规则；同一平台下重复的端点会覆盖模式但保留原位置
    pub fn insert(
        &mut self,
        platform: Platform,
        endpoint: EndpointKind,
        pattern: EndpointPattern,
    ) -> &mut Self {
        self.platforms
            .entry(platform)
            .or_default()
            .insert(endpoint, pattern);
        self
    }

    /// 从配置规则构建（规则顺序即匹配顺序）
    pub fn from_rules(rules: &[PatternRule]) -> Result<Self> {
        let mut table = Self::new();
        for rule in rules {
            let platform = Platform::from_name(&rule.platform);
            if platform == Platform::Unknown {
                return Err(InterceptError::classification(format!(
                    "未知平台: {}",
                    rule.platform
                )));
            }
            let endpoint = EndpointKind::from_name(&rule.endpoint).ok_or_else(|| {
                InterceptError::classification(format!("未知端点: {}", rule.endpoint))
            })?;
            let pattern = EndpointPattern::try_from(&rule.pattern)?;
            table.insert(platform, endpoint, pattern);
        }
        Ok(table)
    }

    /// 从 `{ platform: { endpoint: pattern } }` 形式的 JSON 构建，保持文档顺序
    pub fn from_json_str(json: &str) -> Result<Self> {
        let nested: IndexMap<String, IndexMap<String, PatternSpec>> = serde_json::from_str(json)?;
        let rules: Vec<PatternRule> = nested
            .into_iter()
            .flat_map(|(platform, endpoints)| {
                endpoints
                    .into_iter()
                    .map(move |(endpoint, pattern)| PatternRule {
                        platform: platform.clone(),
                        endpoint,
                        pattern,
                    })
            })
            .collect();
        Self::from_rules(&rules)
    }

    /// 对 URL 分类：按插入顺序返回第一个命中的端点
    #[must_use]
    pub fn classify_endpoint(&self, url: &str, platform: Platform) -> Option<EndpointKind> {
        self.platforms
            .get(&platform)?
            .iter()
            .find(|(_, pattern)| pattern.matches(url))
            .map(|(endpoint, _)| *endpoint)
    }

    /// 没有任何规则
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.platforms.values().all(IndexMap::is_empty)
    }

    /// 指定平台的规则（按顺序），便于 CLI 打印
    pub fn rules(&self, platform: Platform) -> impl Iterator<Item = (EndpointKind, &EndpointPattern)> {
        self.platforms
            .get(&platform)
            .into_iter()
            .flat_map(|m| m.iter().map(|(k, p)| (*k, p)))
    }
}

/// 从会话相关 URL 中提取会话 ID
#[must_use]
pub fn conversation_id_from_url(url: &str, platform: Platform) -> Option<String> {
    let re = match platform {
        Platform::ChatGpt => &*CHATGPT_CONVERSATION_ID,
        Platform::Claude => &*CLAUDE_CONVERSATION_ID,
        Platform::Unknown => return None,
    };
    re.captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_is_not_empty() {
        let table = EndpointPatternTable::builtin();
        assert!(!table.is_empty());
        assert_eq!(table.rules(Platform::ChatGpt).count(), 4);
        assert_eq!(table.rules(Platform::Unknown).count(), 0);
    }

    #[test]
    fn extracts_conversation_ids() {
        assert_eq!(
            conversation_id_from_url(
                "https://chatgpt.com/backend-api/conversation/abc-123?x=1",
                Platform::ChatGpt
            )
            .as_deref(),
            Some("abc-123")
        );
        assert_eq!(
            conversation_id_from_url(
                "https://claude.ai/api/organizations/org/chat_conversations/c-9/completion",
                Platform::Claude
            )
            .as_deref(),
            Some("c-9")
        );
        assert_eq!(conversation_id_from_url("https://claude.ai/", Platform::Unknown), None);
    }
}
