//! ChatGPT 处理器
//!
//! - 会话列表：`{ items: [{ id, title, create_time, update_time }], total }`
//! - 会话详情：`mapping` 树，从 `current_node` 沿 `parent` 回溯得到当前分支
//! - 对话请求：`messages[]` 中作者为 user 的消息
//! - 对话响应：流式重建出的助手消息

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::collaborators::{ConversationHandler, MessageHandler, SpecificConversationHandler};
use super::types::{
    ConversationDetail, ConversationList, ConversationSummary, MessageType, ProcessedMessage,
    parse_timestamp, str_field,
};
use super::{PlatformHandler, assistant_message};
use crate::error::Result;
use crate::events::InterceptedExchange;
use crate::handler_error;
use crate::ldebug;
use crate::logging::{LogComponent, LogStage};
use crate::platform::Platform;

/// 可作为消息正文的内容类型
const TEXT_CONTENT_TYPES: &[&str] = &["text", "multimodal_text"];

/// ChatGPT 处理器
pub struct ChatGptHandler {
    messages: Arc<dyn MessageHandler>,
    conversations: Arc<dyn ConversationHandler>,
    specific_conversations: Arc<dyn SpecificConversationHandler>,
}

impl ChatGptHandler {
    /// 创建处理器
    pub fn new(
        messages: Arc<dyn MessageHandler>,
        conversations: Arc<dyn ConversationHandler>,
        specific_conversations: Arc<dyn SpecificConversationHandler>,
    ) -> Self {
        Self {
            messages,
            conversations,
            specific_conversations,
        }
    }
}

/// `content.parts` 中的字符串部分，以换行拼接
fn message_text(message: &Value) -> Option<String> {
    let content = message.get("content")?;
    let content_type = content
        .get("content_type")
        .and_then(Value::as_str)
        .unwrap_or("text");
    if !TEXT_CONTENT_TYPES.contains(&content_type) {
        return None;
    }
    let text = content
        .get("parts")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .collect::<Vec<_>>()
        .join("\n");
    (!text.is_empty()).then_some(text)
}

fn author_role(message: &Value) -> Option<&str> {
    message.pointer("/author/role").and_then(Value::as_str)
}

fn is_hidden(message: &Value) -> bool {
    message
        .pointer("/metadata/is_visually_hidden_from_conversation")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// 把一条原始消息转换为规范结构；非用户/助手或没有正文的返回 `None`
fn processed_message(
    message: &Value,
    conversation_id: Option<&str>,
    fallback_model: Option<&str>,
) -> Option<ProcessedMessage> {
    if is_hidden(message) {
        return None;
    }
    let message_type = MessageType::from_role(author_role(message)?)?;
    Some(ProcessedMessage {
        message_type,
        message_id: str_field(message, "id")?,
        content: message_text(message)?,
        timestamp: message
            .get("create_time")
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now),
        conversation_id: conversation_id.map(str::to_string),
        model: message
            .pointer("/metadata/model_slug")
            .and_then(Value::as_str)
            .or(fallback_model)
            .map(str::to_string),
        thinking: None,
    })
}

/// 从 `current_node` 回溯到根节点，返回根在前的节点顺序
fn active_branch<'a>(mapping: &'a serde_json::Map<String, Value>, current: &str) -> Vec<&'a Value> {
    let mut branch = Vec::new();
    let mut cursor = Some(current.to_string());
    // 节点数作为步数上限，防止环
    while let Some(id) = cursor.take() {
        if branch.len() >= mapping.len() {
            break;
        }
        let Some(node) = mapping.get(&id) else { break };
        branch.push(node);
        cursor = str_field(node, "parent");
    }
    branch.reverse();
    branch
}

impl PlatformHandler for ChatGptHandler {
    fn platform(&self) -> Platform {
        Platform::ChatGpt
    }

    fn handle_conversation_list(&self, body: &Value) -> Result<()> {
        let items = body
            .get("items")
            .or(Some(body))
            .and_then(Value::as_array)
            .ok_or_else(|| handler_error!(Platform::ChatGpt.as_str(), "会话列表缺少 items 数组"))?;

        let conversations = items
            .iter()
            .filter_map(|item| {
                Some(ConversationSummary {
                    id: str_field(item, "id")?,
                    title: str_field(item, "title"),
                    created_at: item.get("create_time").and_then(parse_timestamp),
                    updated_at: item.get("update_time").and_then(parse_timestamp),
                    platform: Platform::ChatGpt,
                })
            })
            .collect();

        self.conversations.process_conversation_list(ConversationList {
            platform: Platform::ChatGpt,
            conversations,
            total: body.get("total").and_then(Value::as_u64),
        })
    }

    fn handle_specific_conversation(&self, body: &Value) -> Result<()> {
        let id = str_field(body, "conversation_id")
            .or_else(|| str_field(body, "id"))
            .ok_or_else(|| handler_error!(Platform::ChatGpt.as_str(), "会话详情缺少 conversation_id"))?;
        let mapping = body
            .get("mapping")
            .and_then(Value::as_object)
            .ok_or_else(|| handler_error!(Platform::ChatGpt.as_str(), "会话详情缺少 mapping"))?;
        let model = str_field(body, "default_model_slug");

        let messages = match body.get("current_node").and_then(Value::as_str) {
            Some(current) => active_branch(mapping, current)
                .into_iter()
                .filter_map(|node| node.get("message"))
                .filter_map(|m| processed_message(m, Some(&id), model.as_deref()))
                .collect(),
            None => Vec::new(),
        };

        self.specific_conversations
            .process_specific_conversation(ConversationDetail {
                id,
                title: str_field(body, "title"),
                platform: Platform::ChatGpt,
                model,
                messages,
            })
    }

    fn handle_chat_completion(&self, exchange: &InterceptedExchange) -> Result<()> {
        let Some(request) = &exchange.request_body else {
            ldebug!(
                exchange.exchange_id.as_deref().unwrap_or("-"),
                LogStage::Handling,
                LogComponent::ChatGpt,
                "no_request_body",
                "对话请求没有可解析的请求体"
            );
            return Ok(());
        };

        let conversation_id = str_field(request, "conversation_id").or_else(|| {
            exchange
                .messages
                .iter()
                .find_map(|m| m.conversation_id.clone())
        });
        let model = str_field(request, "model");

        let Some(messages) = request.get("messages").and_then(Value::as_array) else {
            return Ok(());
        };
        for message in messages {
            if let Some(processed) =
                processed_message(message, conversation_id.as_deref(), model.as_deref())
                && processed.message_type == MessageType::User
            {
                self.messages.process_message(processed)?;
            }
        }
        Ok(())
    }

    fn handle_assistant_response(&self, exchange: &InterceptedExchange) -> Result<()> {
        let request = exchange.request_body.as_ref();
        let conversation_id = request.and_then(|r| str_field(r, "conversation_id"));
        let model = request.and_then(|r| str_field(r, "model"));

        for state in &exchange.messages {
            if let Some(message) = assistant_message(state, conversation_id.clone(), model.clone()) {
                self.messages.process_message(message)?;
            }
        }
        Ok(())
    }
}
