//! # 拦截事件
//!
//! 拦截器与消费方之间唯一的传输通道。事件结构与页面里派发的
//! `CustomEvent('archimind-network-intercept', { detail: { type, data } })` 一致，
//! 另外附带 `version` 字段，消费方据此拒绝无法识别的结构。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::endpoint::EndpointKind;
use crate::error::{InterceptError, Result};
use crate::ldebug;
use crate::logging::{LogComponent, LogStage};
use crate::platform::Platform;
use crate::streaming::StreamingMessageState;

/// 事件名
pub const INTERCEPT_EVENT_NAME: &str = "archimind-network-intercept";
/// 当前事件结构版本
pub const SCHEMA_VERSION: u32 = 1;

/// 事件类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExchangeType {
    /// 用户信息
    UserInfo,
    /// 会话列表
    ConversationList,
    /// 单个会话
    SpecificConversation,
    /// 对话请求与（流式）回复
    ChatCompletion,
    /// 拦截器已安装
    InjectionComplete,
}

impl ExchangeType {
    /// 线上使用的标签
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserInfo => "userInfo",
            Self::ConversationList => "conversationList",
            Self::SpecificConversation => "specificConversation",
            Self::ChatCompletion => "chatCompletion",
            Self::InjectionComplete => "injectionComplete",
        }
    }
}

impl From<EndpointKind> for ExchangeType {
    fn from(kind: EndpointKind) -> Self {
        match kind {
            EndpointKind::UserInfo => Self::UserInfo,
            EndpointKind::ConversationList => Self::ConversationList,
            EndpointKind::SpecificConversation => Self::SpecificConversation,
            EndpointKind::ChatCompletion => Self::ChatCompletion,
        }
    }
}

/// 一次被分类的网络交换
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptedExchange {
    /// 日志关联 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<String>,
    /// 请求 URL；安装事件中为页面 URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// 所属平台
    #[serde(default)]
    pub platform: Platform,
    /// HTTP 方法
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// 响应状态码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// 能解析为 JSON 的请求体
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    /// 非流式响应的 JSON；流式响应为空，内容见 `messages`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<Value>,
    /// 响应是否按流处理
    #[serde(default)]
    pub is_streaming: bool,
    /// 从发出请求到捕获完成的耗时
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// 从流式响应中重建出的助手消息
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<StreamingMessageState>,
}

/// `detail` 字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDetail {
    /// 事件类型，序列化为 `type`
    #[serde(rename = "type")]
    pub kind: ExchangeType,
    /// 交换内容
    pub data: InterceptedExchange,
}

/// 拦截事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptEvent {
    /// 结构版本，见 [`SCHEMA_VERSION`]
    pub version: u32,
    /// 固定为 [`INTERCEPT_EVENT_NAME`]
    pub event_name: String,
    /// 类型与数据
    pub detail: EventDetail,
}

impl InterceptEvent {
    /// 以当前版本构造事件
    #[must_use]
    pub fn new(kind: ExchangeType, data: InterceptedExchange) -> Self {
        Self {
            version: SCHEMA_VERSION,
            event_name: INTERCEPT_EVENT_NAME.to_string(),
            detail: EventDetail { kind, data },
        }
    }

    /// 拦截器安装完成事件
    #[must_use]
    pub fn injection_complete(page_url: Option<String>, platform: Platform) -> Self {
        Self::new(
            ExchangeType::InjectionComplete,
            InterceptedExchange {
                url: page_url,
                platform,
                ..InterceptedExchange::default()
            },
        )
    }

    /// 事件类型
    #[must_use]
    pub const fn kind(&self) -> ExchangeType {
        self.detail.kind
    }

    /// 事件所属平台
    #[must_use]
    pub const fn platform(&self) -> Platform {
        self.detail.data.platform
    }

    /// 请求 URL
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.detail.data.url.as_deref()
    }

    /// 校验并解析外部传入的事件，拒绝未知的事件名、版本或类型
    pub fn from_value(value: Value) -> Result<Self> {
        let event: Self = serde_json::from_value(value)
            .map_err(|e| InterceptError::schema(format!("无法识别的事件结构: {e}")))?;
        if event.event_name != INTERCEPT_EVENT_NAME {
            return Err(InterceptError::schema(format!(
                "未知事件名: {}",
                event.event_name
            )));
        }
        if event.version != SCHEMA_VERSION {
            return Err(InterceptError::schema(format!(
                "不支持的事件版本: {}",
                event.version
            )));
        }
        Ok(event)
    }

    /// 同 [`Self::from_value`]，输入为 JSON 文本
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| InterceptError::schema(format!("事件不是合法 JSON: {e}")))?;
        Self::from_value(value)
    }
}

/// 事件接收端
pub type EventReceiver = mpsc::UnboundedReceiver<InterceptEvent>;

/// 事件派发端：按调用顺序投递，接收端关闭后静默丢弃
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: mpsc::UnboundedSender<InterceptEvent>,
}

impl EventDispatcher {
    /// 创建一对派发端 / 接收端
    #[must_use]
    pub fn channel() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// 投递一个事件
    pub fn dispatch(&self, event: InterceptEvent) {
        let kind = event.kind();
        let id = event
            .detail
            .data
            .exchange_id
            .clone()
            .unwrap_or_else(|| "-".to_string());
        if self.sender.send(event).is_err() {
            ldebug!(
                id,
                LogStage::Dispatch,
                LogComponent::Interceptor,
                "receiver_closed",
                "事件接收端已关闭，丢弃事件",
                event_type = kind.as_str()
            );
        }
    }

    /// 接收端是否已关闭
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
