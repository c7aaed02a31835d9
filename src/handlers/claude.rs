//! Claude 处理器
//!
//! 会话列表是数组，会话详情带 `chat_messages`；对话请求体只有 `prompt`，
//! 会话 ID 需要从请求 URL 中取得。

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::collaborators::{ConversationHandler, MessageHandler, SpecificConversationHandler};
use super::types::{
    ConversationDetail, ConversationList, ConversationSummary, MessageType, ProcessedMessage,
    parse_timestamp, str_field,
};
use super::{PlatformHandler, assistant_message};
use crate::endpoint::conversation_id_from_url;
use crate::error::Result;
use crate::events::InterceptedExchange;
use crate::handler_error;
use crate::ldebug;
use crate::logging::{LogComponent, LogStage};
use crate::platform::Platform;

/// Claude 处理器
pub struct ClaudeHandler {
    messages: Arc<dyn MessageHandler>,
    conversations: Arc<dyn ConversationHandler>,
    specific_conversations: Arc<dyn SpecificConversationHandler>,
}

impl ClaudeHandler {
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

/// `text` 字段，或 `content[]` 中 text 块的拼接
fn chat_message_text(message: &Value) -> Option<String> {
    if let Some(text) = message.get("text").and_then(Value::as_str)
        && !text.is_empty()
    {
        return Some(text.to_string());
    }
    let text = message
        .get("content")?
        .as_array()?
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");
    (!text.is_empty()).then_some(text)
}

fn thinking_text(message: &Value) -> Option<String> {
    let text = message
        .get("content")?
        .as_array()?
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("thinking"))
        .filter_map(|block| block.get("thinking").and_then(Value::as_str))
        .collect::<String>();
    (!text.is_empty()).then_some(text)
}

fn exchange_conversation_id(exchange: &InterceptedExchange) -> Option<String> {
    exchange
        .url
        .as_deref()
        .and_then(|url| conversation_id_from_url(url, Platform::Claude))
}

impl PlatformHandler for ClaudeHandler {
    fn platform(&self) -> Platform {
        Platform::Claude
    }

    fn handle_conversation_list(&self, body: &Value) -> Result<()> {
        let items = body
            .as_array()
            .or_else(|| body.get("data").and_then(Value::as_array))
            .ok_or_else(|| handler_error!(Platform::Claude.as_str(), "会话列表不是数组"))?;

        let conversations = items
            .iter()
            .filter_map(|item| {
                Some(ConversationSummary {
                    id: str_field(item, "uuid")?,
                    title: str_field(item, "name"),
                    created_at: item.get("created_at").and_then(parse_timestamp),
                    updated_at: item.get("updated_at").and_then(parse_timestamp),
                    platform: Platform::Claude,
                })
            })
            .collect();

        self.conversations.process_conversation_list(ConversationList {
            platform: Platform::Claude,
            conversations,
            total: None,
        })
    }

    fn handle_specific_conversation(&self, body: &Value) -> Result<()> {
        let id = str_field(body, "uuid")
            .ok_or_else(|| handler_error!(Platform::Claude.as_str(), "会话详情缺少 uuid"))?;
        let model = str_field(body, "model");

        let messages = body
            .get("chat_messages")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|m| {
                        let message_type =
                            MessageType::from_role(m.get("sender").and_then(Value::as_str)?)?;
                        Some(ProcessedMessage {
                            message_type,
                            message_id: str_field(m, "uuid")?,
                            content: chat_message_text(m)?,
                            timestamp: m
                                .get("created_at")
                                .and_then(parse_timestamp)
                                .unwrap_or_else(Utc::now),
                            conversation_id: Some(id.clone()),
                            model: model.clone(),
                            thinking: (message_type == MessageType::Assistant)
                                .then(|| thinking_text(m))
                                .flatten(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.specific_conversations
            .process_specific_conversation(ConversationDetail {
                id,
                title: str_field(body, "name"),
                platform: Platform::Claude,
                model,
                messages,
            })
    }

    fn handle_chat_completion(&self, exchange: &InterceptedExchange) -> Result<()> {
        let Some(prompt) = exchange
            .request_body
            .as_ref()
            .and_then(|body| body.get("prompt"))
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
        else {
            ldebug!(
                exchange.exchange_id.as_deref().unwrap_or("-"),
                LogStage::Handling,
                LogComponent::Claude,
                "no_prompt",
                "对话请求没有 prompt（可能是重试）"
            );
            return Ok(());
        };

        let request = exchange.request_body.as_ref();
        let message_id = request
            .and_then(|body| body.pointer("/turn_message_uuids/human_message_uuid"))
            .and_then(Value::as_str)
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

        self.messages.process_message(ProcessedMessage {
            message_type: MessageType::User,
            message_id,
            content: prompt.to_string(),
            timestamp: Utc::now(),
            conversation_id: exchange_conversation_id(exchange),
            model: request.and_then(|body| str_field(body, "model")),
            thinking: None,
        })
    }

    fn handle_assistant_response(&self, exchange: &InterceptedExchange) -> Result<()> {
        let conversation_id = exchange_conversation_id(exchange);
        let model = exchange
            .request_body
            .as_ref()
            .and_then(|body| str_field(body, "model"));

        for state in &exchange.messages {
            if let Some(message) = assistant_message(state, conversation_id.clone(), model.clone()) {
                self.messages.process_message(message)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::collaborators::{
        MockConversationHandler, MockMessageHandler, MockSpecificConversationHandler,
    };
    use crate::streaming::StreamingMessageState;
    use serde_json::json;

    const COMPLETION_URL: &str =
        "https://claude.ai/api/organizations/org/chat_conversations/conv-1/completion";

    fn handler(
        messages: MockMessageHandler,
        conversations: MockConversationHandler,
        specific: MockSpecificConversationHandler,
    ) -> ClaudeHandler {
        ClaudeHandler::new(Arc::new(messages), Arc::new(conversations), Arc::new(specific))
    }

    #[test]
    fn conversation_array_is_normalized() {
        let mut conversations = MockConversationHandler::new();
        conversations
            .expect_process_conversation_list()
            .withf(|list| {
                list.platform == Platform::Claude
                    && list.conversations.len() == 1
                    && list.conversations[0].id == "conv-1"
                    && list.conversations[0].title.as_deref() == Some("Rust questions")
            })
            .times(1)
            .returning(|_| Ok(()));

        let h = handler(MockMessageHandler::new(), conversations, MockSpecificConversationHandler::new());
        h.handle_conversation_list(&json!([
            {"uuid": "conv-1", "name": "Rust questions", "created_at": "2024-05-01T12:00:00Z"},
            {"name": "missing uuid"}
        ]))
        .unwrap();
    }

    #[test]
    fn chat_messages_use_text_or_content_blocks() {
        let mut specific = MockSpecificConversationHandler::new();
        specific
            .expect_process_specific_conversation()
            .withf(|detail| {
                detail.messages.len() == 2
                    && detail.messages[0].message_type == MessageType::User
                    && detail.messages[0].content == "hello"
                    && detail.messages[1].content == "hi there"
                    && detail.messages[1].thinking.as_deref() == Some("greet back")
            })
            .times(1)
            .returning(|_| Ok(()));

        let h = handler(MockMessageHandler::new(), MockConversationHandler::new(), specific);
        h.handle_specific_conversation(&json!({
            "uuid": "conv-1",
            "name": "Greeting",
            "chat_messages": [
                {"uuid": "m1", "sender": "human", "text": "hello"},
                {"uuid": "m2", "sender": "assistant", "text": "", "content": [
                    {"type": "thinking", "thinking": "greet back"},
                    {"type": "text", "text": "hi there"}
                ]}
            ]
        }))
        .unwrap();
    }

    #[test]
    fn prompt_becomes_user_message_with_url_conversation() {
        let mut messages = MockMessageHandler::new();
        messages
            .expect_process_message()
            .withf(|m| {
                m.message_type == MessageType::User
                    && m.content == "explain lifetimes"
                    && m.conversation_id.as_deref() == Some("conv-1")
                    && m.message_id == "h-1"
            })
            .times(1)
            .returning(|_| Ok(()));

        let h = handler(messages, MockConversationHandler::new(), MockSpecificConversationHandler::new());
        h.handle_chat_completion(&InterceptedExchange {
            url: Some(COMPLETION_URL.into()),
            request_body: Some(json!({
                "prompt": "explain lifetimes",
                "turn_message_uuids": {"human_message_uuid": "h-1"}
            })),
            ..InterceptedExchange::default()
        })
        .unwrap();
    }

    #[test]
    fn retry_without_prompt_is_skipped() {
        let h = handler(
            MockMessageHandler::new(),
            MockConversationHandler::new(),
            MockSpecificConversationHandler::new(),
        );
        h.handle_chat_completion(&InterceptedExchange {
            url: Some(COMPLETION_URL.into()),
            request_body: Some(json!({})),
            ..InterceptedExchange::default()
        })
        .unwrap();
    }

    #[test]
    fn assistant_message_gets_conversation_from_url() {
        let mut messages = MockMessageHandler::new();
        messages
            .expect_process_message()
            .withf(|m| m.message_id == "msg_1" && m.conversation_id.as_deref() == Some("conv-1"))
            .times(1)
            .returning(|_| Ok(()));

        let h = handler(messages, MockConversationHandler::new(), MockSpecificConversationHandler::new());
        h.handle_assistant_response(&InterceptedExchange {
            url: Some(COMPLETION_URL.into()),
            messages: vec![
                StreamingMessageState {
                    id: Some("msg_1".into()),
                    content: "sure".into(),
                    ..StreamingMessageState::default()
                },
                StreamingMessageState::default(),
            ],
            ..InterceptedExchange::default()
        })
        .unwrap();
    }
}
