//! 下游协作方接口
//!
//! 调用方式为发后即忘；同一数据可能被投递多次，实现方需保证幂等。

use serde_json::Value;

use super::types::{ConversationDetail, ConversationList, ProcessedMessage};
use crate::error::Result;

/// 消息处理
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait MessageHandler: Send + Sync {
    /// 处理一条用户或助手消息
    fn process_message(&self, message: ProcessedMessage) -> Result<()>;
}

/// 会话列表处理
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait ConversationHandler: Send + Sync {
    /// 处理一页会话列表
    fn process_conversation_list(&self, list: ConversationList) -> Result<()>;
}

/// 用户信息处理
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait UserHandler: Send + Sync {
    /// 处理原始用户信息响应体
    fn process_user_info(&self, body: &Value) -> Result<()>;
}

/// 单个会话处理
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait SpecificConversationHandler: Send + Sync {
    /// 处理一个完整会话
    fn process_specific_conversation(&self, detail: ConversationDetail) -> Result<()>;
}
