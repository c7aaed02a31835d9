//! # Chat Intercept Library
//!
//! AI 聊天网页的网络拦截与流式消息重建核心库：
//! 对请求分类、捕获请求/响应体、把 SSE 增量流还原成完整消息，
//! 并按平台路由给下游处理器。

pub mod app;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod handlers;
pub mod interceptor;
pub mod logging;
pub mod monitor;
pub mod platform;
pub mod streaming;
pub mod utils;

// Re-export commonly used types
pub use app::InterceptSession;
pub use config::AppConfig;
pub use endpoint::{EndpointKind, EndpointPatternTable};
pub use error::{InterceptError, Result};
pub use events::{EventDispatcher, ExchangeType, InterceptEvent, InterceptedExchange};
pub use interceptor::{Fetch, FetchRequest, FetchResponse, InterceptingFetch, ReqwestFetch};
pub use platform::{Platform, detect_platform};
pub use streaming::{StreamingDeltaProcessor, StreamingMessageState};
