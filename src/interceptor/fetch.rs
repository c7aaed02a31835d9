//! 网络请求抽象
//!
//! `Fetch` 是被包装的原始实现所在的接缝：拦截器只依赖这个 trait，
//! 测试里可以注入假的原始实现。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use http::{HeaderMap, HeaderValue, Method, header};
use serde_json::Value;

/// 流式响应体
pub type BodyStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// 原始请求失败；拦截器原样交还给调用方
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// 调用方或上游中止
    #[error("请求已中止")]
    Aborted,
    /// 连接失败
    #[error("网络错误: {0}")]
    Network(String),
    /// 响应体中途出错
    #[error("响应体读取失败: {0}")]
    Body(String),
}

/// 请求
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// HTTP 方法
    pub method: Method,
    /// 完整 URL
    pub url: String,
    /// 请求头
    pub headers: HeaderMap,
    /// 请求体
    pub body: Option<Bytes>,
}

impl FetchRequest {
    /// 无请求体的请求
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// GET 请求
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// 带 JSON 请求体的 POST
    #[must_use]
    pub fn post_json(url: impl Into<String>, body: &Value) -> Self {
        let mut request = Self::new(Method::POST, url);
        request
            .headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request.body = Some(Bytes::from(body.to_string()));
        request
    }

    /// 替换请求体
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// 设置一个请求头
    #[must_use]
    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// 响应体
pub enum FetchBody {
    /// 无响应体
    Empty,
    /// 已完整缓冲
    Full(Bytes),
    /// 按块到达
    Stream(BodyStream),
}

impl fmt::Debug for FetchBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl FetchBody {
    /// 读取完整响应体
    pub async fn bytes(self) -> Result<Bytes, FetchError> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Full(bytes) => Ok(bytes),
            Self::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

/// 响应
#[derive(Debug)]
pub struct FetchResponse {
    /// 状态码
    pub status: u16,
    /// 响应头
    pub headers: HeaderMap,
    /// 响应体
    pub body: FetchBody,
}

impl FetchResponse {
    /// 组装响应
    #[must_use]
    pub fn new(status: u16, headers: HeaderMap, body: FetchBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// 便于测试构造的 JSON 响应
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::new(status, headers, FetchBody::Full(Bytes::from(body.to_string())))
    }

    fn header_str(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `Content-Type`
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header_str(header::CONTENT_TYPE)
    }

    /// `Content-Encoding`
    #[must_use]
    pub fn content_encoding(&self) -> Option<&str> {
        self.header_str(header::CONTENT_ENCODING)
    }

    /// 是否为流式响应：`text/event-stream`，或分块传输、无固定长度且不是 JSON
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        let content_type = self.content_type().unwrap_or_default().to_ascii_lowercase();
        if content_type.contains("text/event-stream") {
            return true;
        }
        let chunked = self
            .header_str(header::TRANSFER_ENCODING)
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
        chunked
            && !self.headers.contains_key(header::CONTENT_LENGTH)
            && !crate::utils::content_type_is_json(&content_type)
    }
}

/// 原始请求实现
#[async_trait]
pub trait Fetch: Send + Sync {
    /// 发出请求
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

#[async_trait]
impl<T: Fetch + ?Sized> Fetch for Arc<T> {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        (**self).fetch(request).await
    }
}

/// 基于 reqwest 的真实网络实现
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    /// 使用给定的客户端
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(err: &reqwest::Error) -> FetchError {
    if err.is_body() || err.is_decode() {
        FetchError::Body(err.to_string())
    } else {
        FetchError::Network(err.to_string())
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| map_reqwest_error(&e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| map_reqwest_error(&e)))
            .boxed();

        Ok(FetchResponse::new(status, headers, FetchBody::Stream(stream)))
    }
}
