//! # 网络拦截器
//!
//! `InterceptingFetch` 包装一个原始 `Fetch` 实现：
//! - 对调用方完全透明，返回的状态码、头和字节与原始实现一致
//! - 原始实现报错时原样返回错误，不发送任何事件
//! - 每个被分类的交换至多发送一个事件；流式响应在逻辑完成时发送

pub mod capture;
pub mod fetch;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::config::InterceptorConfig;
use crate::endpoint::{EndpointKind, EndpointPatternTable, conversation_id_from_url};
use crate::events::{EventDispatcher, InterceptEvent, InterceptedExchange};
use crate::logging::{LogComponent, LogStage};
use crate::platform::{Platform, detect_platform, detect_platform_str};
use crate::streaming::{StreamDialect, StreamingDeltaProcessor};
use crate::utils::content_type_is_json;
use crate::{ldebug, linfo, lwarn};

use capture::{CaptureSink, JsonCollector, capture_buffered, parse_captured_json, tee_body};
pub use fetch::{BodyStream, Fetch, FetchBody, FetchError, FetchRequest, FetchResponse, ReqwestFetch};

/// 拦截器运行参数
#[derive(Debug, Clone)]
pub struct InterceptorContext {
    /// 拦截器所在页面；决定平台。为空时按请求 URL 判断
    pub page_url: Option<Url>,
    /// 流式响应的空闲超时
    pub idle_timeout: Duration,
    /// 捕获响应体的字节上限
    pub max_capture_bytes: usize,
}

impl InterceptorContext {
    /// 由页面 URL 决定的平台
    #[must_use]
    pub fn platform(&self) -> Option<Platform> {
        self.page_url.as_ref().map(detect_platform)
    }
}

impl Default for InterceptorContext {
    fn default() -> Self {
        Self::from(&InterceptorConfig::default())
    }
}

impl From<&InterceptorConfig> for InterceptorContext {
    fn from(config: &InterceptorConfig) -> Self {
        Self {
            page_url: config
                .page_url
                .as_deref()
                .and_then(|raw| Url::parse(raw).ok()),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            max_capture_bytes: config.max_capture_bytes,
        }
    }
}

/// 拦截包装
pub struct InterceptingFetch<F> {
    original: F,
    table: Arc<EndpointPatternTable>,
    dispatcher: EventDispatcher,
    context: InterceptorContext,
}

impl<F: Fetch> InterceptingFetch<F> {
    /// 安装拦截器：包装原始实现并发送 `injectionComplete`
    pub fn install(
        original: F,
        table: Arc<EndpointPatternTable>,
        dispatcher: EventDispatcher,
        context: InterceptorContext,
    ) -> Self {
        let platform = context.platform().unwrap_or_default();
        let page_url = context.page_url.as_ref().map(ToString::to_string);
        linfo!(
            "system",
            LogStage::Injection,
            LogComponent::Interceptor,
            "installed",
            "网络拦截器已安装",
            platform = %platform,
            page_url = ?page_url
        );
        dispatcher.dispatch(InterceptEvent::injection_complete(page_url, platform));

        Self {
            original,
            table,
            dispatcher,
            context,
        }
    }

    /// 被包装的原始实现
    pub const fn original(&self) -> &F {
        &self.original
    }

    /// 运行参数
    pub const fn context(&self) -> &InterceptorContext {
        &self.context
    }

    fn platform_for(&self, url: &str) -> Platform {
        self.context
            .platform()
            .unwrap_or_else(|| detect_platform_str(url))
    }

    fn capture_response(
        &self,
        endpoint: EndpointKind,
        mut exchange: InterceptedExchange,
        response: FetchResponse,
        started: Instant,
    ) -> FetchResponse {
        let id = exchange.exchange_id.clone().unwrap_or_default();
        let streaming = response.is_streaming();
        let encoding = response.content_encoding().map(str::to_string);
        exchange.is_streaming = streaming;
        exchange.status = Some(response.status);

        let FetchResponse {
            status,
            headers,
            body,
        } = response;
        let max_bytes = self.context.max_capture_bytes;

        let body = match body {
            FetchBody::Empty => {
                exchange.duration_ms = Some(elapsed_ms(started));
                self.emit(endpoint, exchange);
                FetchBody::Empty
            }
            FetchBody::Full(bytes) if !streaming => {
                exchange.response_body =
                    parse_captured_json(&id, encoding.as_deref(), &bytes, max_bytes);
                exchange.duration_ms = Some(elapsed_ms(started));
                self.emit(endpoint, exchange);
                FetchBody::Full(bytes)
            }
            FetchBody::Full(bytes) => {
                let sink = self.sink_for(endpoint, &exchange, streaming, encoding, &id);
                let outcome = capture_buffered(&id, sink, &bytes);
                exchange.response_body = outcome.response_body;
                exchange.messages = outcome.messages;
                exchange.duration_ms = Some(elapsed_ms(started));
                self.emit(endpoint, exchange);
                FetchBody::Full(bytes)
            }
            FetchBody::Stream(stream) => {
                let sink = self.sink_for(endpoint, &exchange, streaming, encoding, &id);
                let dispatcher = self.dispatcher.clone();
                FetchBody::Stream(tee_body(
                    id,
                    stream,
                    sink,
                    self.context.idle_timeout,
                    move |outcome| {
                        exchange.response_body = outcome.response_body;
                        exchange.messages = outcome.messages;
                        exchange.duration_ms = Some(elapsed_ms(started));
                        dispatch_exchange(&dispatcher, endpoint, exchange);
                    },
                ))
            }
        };

        FetchResponse::new(status, headers, body)
    }

    fn sink_for(
        &self,
        endpoint: EndpointKind,
        exchange: &InterceptedExchange,
        streaming: bool,
        encoding: Option<String>,
        id: &str,
    ) -> CaptureSink {
        let dialect = if streaming && endpoint == EndpointKind::ChatCompletion {
            StreamDialect::for_platform(exchange.platform)
        } else {
            None
        };
        // 没有增量方言的流按完整 JSON 累积
        let Some(dialect) = dialect else {
            return CaptureSink::Json(JsonCollector::new(
                encoding,
                self.context.max_capture_bytes,
            ));
        };
        let hint = exchange
            .url
            .as_deref()
            .and_then(|url| conversation_id_from_url(url, exchange.platform));
        CaptureSink::Stream(Box::new(
            StreamingDeltaProcessor::new(dialect)
                .with_conversation_hint(hint)
                .with_correlation_id(id),
        ))
    }

    fn emit(&self, endpoint: EndpointKind, exchange: InterceptedExchange) {
        dispatch_exchange(&self.dispatcher, endpoint, exchange);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn dispatch_exchange(
    dispatcher: &EventDispatcher,
    endpoint: EndpointKind,
    exchange: InterceptedExchange,
) {
    ldebug!(
        exchange.exchange_id.as_deref().unwrap_or("-"),
        LogStage::Dispatch,
        LogComponent::Interceptor,
        "emit",
        "发送拦截事件",
        endpoint = %endpoint,
        streaming = exchange.is_streaming,
        messages = exchange.messages.len()
    );
    dispatcher.dispatch(InterceptEvent::new(endpoint.into(), exchange));
}

/// 解析请求体 JSON；失败时记录警告并返回 `None`
fn parse_request_body(id: &str, request: &FetchRequest) -> Option<Value> {
    let body = request.body.as_ref().filter(|b| !b.is_empty())?;
    let declared_json = request
        .headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(content_type_is_json);
    let looks_like_json = matches!(
        body.iter().find(|b| !b.is_ascii_whitespace()),
        Some(b'{' | b'[')
    );
    if !declared_json && !looks_like_json {
        return None;
    }
    match serde_json::from_slice(body) {
        Ok(value) => Some(value),
        Err(e) => {
            lwarn!(
                id,
                LogStage::Request,
                LogComponent::Interceptor,
                "invalid_request_body",
                "请求体不是合法 JSON，按空处理",
                error = %e
            );
            None
        }
    }
}

#[async_trait]
impl<F: Fetch> Fetch for InterceptingFetch<F> {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let platform = self.platform_for(&request.url);
        let Some(endpoint) = self.table.classify_endpoint(&request.url, platform) else {
            return self.original.fetch(request).await;
        };

        let exchange_id = Uuid::new_v4().to_string();
        ldebug!(
            exchange_id,
            LogStage::Classification,
            LogComponent::Classifier,
            "classified",
            "请求已分类",
            endpoint = %endpoint,
            platform = %platform,
            url = %request.url
        );

        let exchange = InterceptedExchange {
            exchange_id: Some(exchange_id.clone()),
            url: Some(request.url.clone()),
            platform,
            method: Some(request.method.to_string()),
            request_body: parse_request_body(&exchange_id, &request),
            ..InterceptedExchange::default()
        };

        let started = Instant::now();
        let response = match self.original.fetch(request).await {
            Ok(response) => response,
            Err(err) => {
                ldebug!(
                    exchange_id,
                    LogStage::Response,
                    LogComponent::Interceptor,
                    "original_failed",
                    "原始请求失败，不发送事件",
                    error = %err
                );
                return Err(err);
            }
        };

        Ok(self.capture_response(endpoint, exchange, response, started))
    }
}
