//! # 端点分类
//!
//! 按平台查找模式表，按表的插入顺序逐条匹配 URL，返回第一个命中的端点名。
//! 未命中返回 `None`，调用方应当忽略该请求，这不是错误。
//!
//! 模式表必须把更具体的模式写在更通用的模式之前（first-match-wins）。

mod pattern;
mod table;

pub use pattern::{EndpointPattern, PatternSpec};
pub use table::{EndpointPatternTable, PatternRule, conversation_id_from_url};

use std::fmt;

use serde::{Deserialize, Serialize};

/// 被识别的端点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointKind {
    /// 当前用户信息
    UserInfo,
    /// 会话列表
    ConversationList,
    /// 单个会话
    SpecificConversation,
    /// 发送消息 / 流式回复
    ChatCompletion,
}

impl EndpointKind {
    /// 配置与事件中使用的名称
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserInfo => "userInfo",
            Self::ConversationList => "conversationList",
            Self::SpecificConversation => "specificConversation",
            Self::ChatCompletion => "chatCompletion",
        }
    }

    /// 按名称查找端点
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "userInfo" => Some(Self::UserInfo),
            "conversationList" => Some(Self::ConversationList),
            "specificConversation" => Some(Self::SpecificConversation),
            "chatCompletion" => Some(Self::ChatCompletion),
            _ => None,
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
