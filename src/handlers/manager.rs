//! 平台路由
//!
//! 未注册的平台直接返回 `Ok(())`：新平台的流量可能先于处理器出现。
//! 处理器错误在 `route` 处记录并吞掉，不会影响网络请求本身。

use std::collections::HashMap;
use std::sync::Arc;

use super::collaborators::UserHandler;
use super::{ChatGptHandler, ClaudeHandler, Collaborators, PlatformHandler};
use crate::error::Result;
use crate::events::{ExchangeType, InterceptEvent};
use crate::logging::{LogComponent, LogStage};
use crate::platform::Platform;
use crate::{ldebug, lerror};

/// 平台管理器
pub struct PlatformManager {
    handlers: HashMap<Platform, Arc<dyn PlatformHandler>>,
    users: Arc<dyn UserHandler>,
}

impl std::fmt::Debug for PlatformManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformManager")
            .field("platforms", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl PlatformManager {
    /// 注册 ChatGPT 与 Claude 处理器
    #[must_use]
    pub fn new(collaborators: &Collaborators) -> Self {
        let mut manager = Self::empty(Arc::clone(&collaborators.users));
        manager.register(Arc::new(ChatGptHandler::new(
            Arc::clone(&collaborators.messages),
            Arc::clone(&collaborators.conversations),
            Arc::clone(&collaborators.specific_conversations),
        )));
        manager.register(Arc::new(ClaudeHandler::new(
            Arc::clone(&collaborators.messages),
            Arc::clone(&collaborators.conversations),
            Arc::clone(&collaborators.specific_conversations),
        )));
        manager
    }

    /// 不含任何平台处理器
    #[must_use]
    pub fn empty(users: Arc<dyn UserHandler>) -> Self {
        Self {
            handlers: HashMap::new(),
            users,
        }
    }

    /// 注册（或替换）一个平台处理器
    pub fn register(&mut self, handler: Arc<dyn PlatformHandler>) -> &mut Self {
        self.handlers.insert(handler.platform(), handler);
        self
    }

    /// 平台对应的处理器
    #[must_use]
    pub fn handler_for(&self, platform: Platform) -> Option<&dyn PlatformHandler> {
        self.handlers.get(&platform).map(AsRef::as_ref)
    }

    fn with_handler<F>(&self, event: &InterceptEvent, operation: &str, f: F) -> Result<()>
    where
        F: FnOnce(&dyn PlatformHandler) -> Result<()>,
    {
        match self.handler_for(event.platform()) {
            Some(handler) => f(handler),
            None => {
                ldebug!(
                    event.detail.data.exchange_id.as_deref().unwrap_or("-"),
                    LogStage::Handling,
                    LogComponent::PlatformManager,
                    "unsupported_platform",
                    "平台没有处理器，忽略",
                    platform = %event.platform(),
                    handler_operation = operation
                );
                Ok(())
            }
        }
    }

    /// 会话列表；未知平台直接返回 `Ok`
    pub fn handle_conversation_list(&self, event: &InterceptEvent) -> Result<()> {
        self.with_handler(event, "conversation_list", |h| {
            match &event.detail.data.response_body {
                Some(body) => h.handle_conversation_list(body),
                None => Ok(()),
            }
        })
    }

    /// 单个会话
    pub fn handle_specific_conversation(&self, event: &InterceptEvent) -> Result<()> {
        self.with_handler(event, "specific_conversation", |h| {
            match &event.detail.data.response_body {
                Some(body) => h.handle_specific_conversation(body),
                None => Ok(()),
            }
        })
    }

    /// 对话请求中的用户消息
    pub fn handle_chat_completion(&self, event: &InterceptEvent) -> Result<()> {
        self.with_handler(event, "chat_completion", |h| {
            h.handle_chat_completion(&event.detail.data)
        })
    }

    /// 流式重建出的助手消息
    pub fn handle_assistant_response(&self, event: &InterceptEvent) -> Result<()> {
        self.with_handler(event, "assistant_response", |h| {
            h.handle_assistant_response(&event.detail.data)
        })
    }

    /// 按事件类型路由；所有错误在此记录，不向外传播
    pub fn route(&self, event: &InterceptEvent) {
        let results: Vec<(&str, Result<()>)> = match event.kind() {
            ExchangeType::InjectionComplete => Vec::new(),
            ExchangeType::UserInfo => match &event.detail.data.response_body {
                Some(body) => vec![("user_info", self.users.process_user_info(body))],
                None => Vec::new(),
            },
            ExchangeType::ConversationList => {
                vec![("conversation_list", self.handle_conversation_list(event))]
            }
            ExchangeType::SpecificConversation => {
                vec![("specific_conversation", self.handle_specific_conversation(event))]
            }
            ExchangeType::ChatCompletion => vec![
                ("chat_completion", self.handle_chat_completion(event)),
                ("assistant_response", self.handle_assistant_response(event)),
            ],
        };

        for (operation, result) in results {
            if let Err(e) = result {
                lerror!(
                    event.detail.data.exchange_id.as_deref().unwrap_or("-"),
                    LogStage::Handling,
                    LogComponent::PlatformManager,
                    operation,
                    "平台处理器执行失败",
                    platform = %event.platform(),
                    error = %e
                );
            }
        }
    }
}
