//! 平台无关的规范化数据结构

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::platform::Platform;

/// 消息作者类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// 用户
    User,
    /// 助手
    Assistant,
}

impl MessageType {
    /// 从平台的角色字段映射；`system` / `tool` 等返回 `None`
    #[must_use]
    pub fn from_role(role: &str) -> Option<Self> {
        match role {
            "user" | "human" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// 交给消息处理器的单条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedMessage {
    /// 作者类型
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// 平台消息 ID
    pub message_id: String,
    /// 正文
    pub content: String,
    /// 消息时间；平台未给出时为处理时间
    pub timestamp: DateTime<Utc>,
    /// 所属会话
    pub conversation_id: Option<String>,
    /// 模型标识
    pub model: Option<String>,
    /// 思考过程（仅助手消息）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

/// 会话列表中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// 会话 ID
    pub id: String,
    /// 标题
    pub title: Option<String>,
    /// 创建时间
    pub created_at: Option<DateTime<Utc>>,
    /// 最后更新时间
    pub updated_at: Option<DateTime<Utc>>,
    /// 所属平台
    pub platform: Platform,
}

/// 会话列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationList {
    /// 所属平台
    pub platform: Platform,
    /// 有 ID 的会话，保持平台返回的顺序
    pub conversations: Vec<ConversationSummary>,
    /// 平台返回的总数（如有）
    pub total: Option<u64>,
}

/// 单个会话的完整内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    /// 会话 ID
    pub id: String,
    /// 标题
    pub title: Option<String>,
    /// 所属平台
    pub platform: Platform,
    /// 会话使用的模型
    pub model: Option<String>,
    /// 用户与助手消息；其他角色已滤除
    pub messages: Vec<ProcessedMessage>,
}

/// 解析时间戳：数字按 Unix 秒（可带小数），字符串按 RFC 3339
#[must_use]
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            if !secs.is_finite() {
                return None;
            }
            #[allow(clippy::cast_possible_truncation)]
            let millis = (secs * 1000.0).round() as i64;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

pub(crate) fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}
