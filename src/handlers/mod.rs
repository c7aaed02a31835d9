//! # 平台处理器
//!
//! 每个平台提供同一组四个操作，`PlatformManager` 按事件里的平台字段路由。
//! 处理结果统一转换成平台无关的结构后交给下游协作方。

pub mod chatgpt;
pub mod claude;
pub mod collaborators;
pub mod manager;
pub mod types;

use std::sync::Arc;

use serde_json::Value;

pub use chatgpt::ChatGptHandler;
pub use claude::ClaudeHandler;
pub use collaborators::{ConversationHandler, MessageHandler, SpecificConversationHandler, UserHandler};
#[cfg(any(test, feature = "testing"))]
pub use collaborators::{
    MockConversationHandler, MockMessageHandler, MockSpecificConversationHandler, MockUserHandler,
};
pub use manager::PlatformManager;
pub use types::{
    ConversationDetail, ConversationList, ConversationSummary, MessageType, ProcessedMessage,
    parse_timestamp,
};

use crate::error::Result;
use crate::events::InterceptedExchange;
use crate::logging::{LogComponent, LogStage};
use crate::platform::Platform;
use crate::streaming::StreamingMessageState;
use crate::linfo;

/// 单个平台的处理器
pub trait PlatformHandler: Send + Sync {
    /// 处理器负责的平台
    fn platform(&self) -> Platform;

    /// 会话列表响应体
    fn handle_conversation_list(&self, body: &Value) -> Result<()>;

    /// 单个会话响应体
    fn handle_specific_conversation(&self, body: &Value) -> Result<()>;

    /// 对话请求：提取用户消息
    fn handle_chat_completion(&self, exchange: &InterceptedExchange) -> Result<()>;

    /// 对话响应：提取重建后的助手消息
    fn handle_assistant_response(&self, exchange: &InterceptedExchange) -> Result<()>;
}

/// 下游协作方集合
#[derive(Clone)]
pub struct Collaborators {
    /// 接收用户消息与助手消息
    pub messages: Arc<dyn MessageHandler>,
    /// 接收会话列表
    pub conversations: Arc<dyn ConversationHandler>,
    /// 接收用户信息
    pub users: Arc<dyn UserHandler>,
    /// 接收单个会话详情
    pub specific_conversations: Arc<dyn SpecificConversationHandler>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// 所有协作方都只写日志
    #[must_use]
    pub fn logging() -> Self {
        let sink = Arc::new(LoggingCollaborator);
        Self {
            messages: sink.clone(),
            conversations: sink.clone(),
            users: sink.clone(),
            specific_conversations: sink,
        }
    }
}

/// 只记录日志的协作方实现，供命令行使用
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingCollaborator;

impl MessageHandler for LoggingCollaborator {
    fn process_message(&self, message: ProcessedMessage) -> Result<()> {
        linfo!(
            message.message_id,
            LogStage::Handling,
            LogComponent::PlatformManager,
            "message",
            "收到消息",
            message_type = ?message.message_type,
            conversation_id = ?message.conversation_id,
            model = ?message.model,
            chars = message.content.chars().count()
        );
        Ok(())
    }
}

impl ConversationHandler for LoggingCollaborator {
    fn process_conversation_list(&self, list: ConversationList) -> Result<()> {
        linfo!(
            "system",
            LogStage::Handling,
            LogComponent::PlatformManager,
            "conversation_list",
            "收到会话列表",
            platform = %list.platform,
            count = list.conversations.len()
        );
        Ok(())
    }
}

impl UserHandler for LoggingCollaborator {
    fn process_user_info(&self, body: &Value) -> Result<()> {
        linfo!(
            "system",
            LogStage::Handling,
            LogComponent::PlatformManager,
            "user_info",
            "收到用户信息",
            has_id = body.get("id").is_some() || body.get("uuid").is_some()
        );
        Ok(())
    }
}

impl SpecificConversationHandler for LoggingCollaborator {
    fn process_specific_conversation(&self, detail: ConversationDetail) -> Result<()> {
        linfo!(
            detail.id,
            LogStage::Handling,
            LogComponent::PlatformManager,
            "specific_conversation",
            "收到会话详情",
            platform = %detail.platform,
            messages = detail.messages.len()
        );
        Ok(())
    }
}

/// 把重建出的流式消息转换为助手消息；没有 ID 或正文的跳过
pub(crate) fn assistant_message(
    state: &StreamingMessageState,
    conversation_id: Option<String>,
    model: Option<String>,
) -> Option<ProcessedMessage> {
    let message_id = state.id.clone()?;
    let thinking = state.thinking_text();
    if state.content.is_empty() && thinking.is_empty() {
        return None;
    }
    Some(ProcessedMessage {
        message_type: MessageType::Assistant,
        message_id,
        content: state.content.clone(),
        timestamp: chrono::Utc::now(),
        conversation_id: state.conversation_id.clone().or(conversation_id),
        model: state.model_id.clone().or(model),
        thinking: (!thinking.is_empty()).then_some(thinking),
    })
}
