//! 拦截器的透明性与事件发送时机

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue, Method, header};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_stream::wrappers::ReceiverStream;

use chat_intercept::endpoint::EndpointPatternTable;
use chat_intercept::events::{EventDispatcher, EventReceiver, ExchangeType, InterceptEvent};
use chat_intercept::interceptor::{
    Fetch, FetchBody, FetchError, FetchRequest, FetchResponse, InterceptingFetch,
    InterceptorContext,
};
use chat_intercept::platform::Platform;

/// 按脚本返回一次响应，并记录收到的请求
struct ScriptedFetch {
    response: Mutex<Option<Result<FetchResponse, FetchError>>>,
    seen: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetch {
    fn new(response: Result<FetchResponse, FetchError>) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Some(response)),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Fetch for ScriptedFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.seen.lock().unwrap().push(request);
        self.response
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(FetchError::Network("script exhausted".into())))
    }
}

fn install(original: Arc<ScriptedFetch>) -> (InterceptingFetch<Arc<ScriptedFetch>>, EventReceiver) {
    let (dispatcher, mut receiver) = EventDispatcher::channel();
    let fetch = InterceptingFetch::install(
        original,
        Arc::new(EndpointPatternTable::builtin()),
        dispatcher,
        InterceptorContext::default(),
    );
    let first = receiver.try_recv().unwrap();
    assert_eq!(first.kind(), ExchangeType::InjectionComplete);
    (fetch, receiver)
}

fn sse_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream; charset=utf-8"));
    headers
}

fn sse(value: &Value) -> Bytes {
    Bytes::from(format!("data: {value}\n\n"))
}

fn chatgpt_stream_chunks() -> Vec<Bytes> {
    vec![
        sse(&json!({"o": "add", "v": {
            "message": {"id": "m1", "author": {"role": "assistant"}, "content": {"parts": [""]}},
            "conversation_id": "conv-1"
        }})),
        sse(&json!({"p": "/message/content/parts/0", "o": "append", "v": "Hello"})),
        sse(&json!({"v": " world"})),
        Bytes::from_static(b"data: [DONE]\n\n"),
    ]
}

fn stream_of(chunks: Vec<Bytes>) -> FetchBody {
    FetchBody::Stream(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
}

#[tokio::test]
async fn injection_complete_is_dispatched_first() {
    let (dispatcher, mut receiver) = EventDispatcher::channel();
    let context = InterceptorContext {
        page_url: Some(url::Url::parse("https://claude.ai/new").unwrap()),
        ..InterceptorContext::default()
    };
    let _fetch = InterceptingFetch::install(
        ScriptedFetch::new(Err(FetchError::Aborted)),
        Arc::new(EndpointPatternTable::builtin()),
        dispatcher,
        context,
    );

    let event = receiver.try_recv().unwrap();
    assert_eq!(event.kind(), ExchangeType::InjectionComplete);
    assert_eq!(event.platform(), Platform::Claude);
    assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn json_response_is_returned_unchanged_and_reported() {
    let payload = json!({"email": "a@example.com", "id": "user-1"});
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("x-request-id", HeaderValue::from_static("req-42"));
    let raw = Bytes::from(serde_json::to_vec(&payload).unwrap());
    let original = ScriptedFetch::new(Ok(FetchResponse::new(
        203,
        headers.clone(),
        FetchBody::Full(raw.clone()),
    )));
    let (fetch, mut receiver) = install(Arc::clone(&original));

    let response = fetch
        .fetch(FetchRequest::get("https://chatgpt.com/backend-api/me"))
        .await
        .unwrap();

    assert_eq!(response.status, 203);
    assert_eq!(response.headers, headers);
    assert_eq!(response.body.bytes().await.unwrap(), raw);
    assert_eq!(original.seen.lock().unwrap()[0].url, "https://chatgpt.com/backend-api/me");

    let event = receiver.try_recv().unwrap();
    assert_eq!(event.kind(), ExchangeType::UserInfo);
    assert_eq!(event.platform(), Platform::ChatGpt);
    assert_eq!(event.detail.data.status, Some(203));
    assert_eq!(event.detail.data.response_body, Some(payload));
    assert!(!event.detail.data.is_streaming);
    assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn original_error_is_returned_unchanged_without_event() {
    let original = ScriptedFetch::new(Err(FetchError::Network("connection reset".into())));
    let (fetch, mut receiver) = install(original);

    let result = fetch
        .fetch(FetchRequest::get("https://chatgpt.com/backend-api/conversations?offset=0"))
        .await;

    let Err(err) = result else {
        panic!("expected the original error");
    };
    assert_eq!(err, FetchError::Network("connection reset".into()));
    assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn unclassified_request_passes_through_without_event() {
    let original = ScriptedFetch::new(Ok(FetchResponse::new(
        200,
        HeaderMap::new(),
        FetchBody::Full(Bytes::from_static(b"console.log(1)")),
    )));
    let (fetch, mut receiver) = install(Arc::clone(&original));

    let response = fetch
        .fetch(FetchRequest::get("https://chatgpt.com/static/app.js"))
        .await
        .unwrap();

    assert_eq!(response.body.bytes().await.unwrap(), Bytes::from_static(b"console.log(1)"));
    assert_eq!(original.seen.lock().unwrap().len(), 1);
    assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn streaming_completion_emits_once_with_reconstructed_message() {
    let chunks = chatgpt_stream_chunks();
    let expected: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();
    let original = ScriptedFetch::new(Ok(FetchResponse::new(200, sse_headers(), stream_of(chunks))));
    let (fetch, mut receiver) = install(original);

    let request = FetchRequest::post_json(
        "https://chatgpt.com/backend-api/conversation",
        &json!({"action": "next", "messages": [{"id": "u1", "author": {"role": "user"}}]}),
    );
    let response = fetch.fetch(request).await.unwrap();
    assert!(response.is_streaming());

    let body = response.body.bytes().await.unwrap();
    assert_eq!(body.to_vec(), expected);

    let event: InterceptEvent = receiver.recv().await.unwrap();
    assert_eq!(event.kind(), ExchangeType::ChatCompletion);
    let exchange = &event.detail.data;
    assert!(exchange.is_streaming);
    assert_eq!(exchange.response_body, None);
    assert_eq!(exchange.request_body.as_ref().unwrap()["action"], json!("next"));
    assert_eq!(exchange.messages.len(), 1);
    assert_eq!(exchange.messages[0].id.as_deref(), Some("m1"));
    assert_eq!(exchange.messages[0].conversation_id.as_deref(), Some("conv-1"));
    assert_eq!(exchange.messages[0].content, "Hello world");

    // 上游结束后不会再补发
    tokio::task::yield_now().await;
    assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn stream_without_done_marker_emits_at_upstream_end() {
    let mut chunks = chatgpt_stream_chunks();
    chunks.pop();
    let original = ScriptedFetch::new(Ok(FetchResponse::new(200, sse_headers(), stream_of(chunks))));
    let (fetch, mut receiver) = install(original);

    let response = fetch
        .fetch(FetchRequest::get("https://chatgpt.com/backend-api/conversation"))
        .await
        .unwrap();
    response.body.bytes().await.unwrap();

    let event = receiver.recv().await.unwrap();
    assert_eq!(event.detail.data.messages[0].content, "Hello world");
}

#[tokio::test]
async fn caller_dropping_the_body_suppresses_the_event() {
    let (upstream_tx, upstream_rx) = mpsc::channel::<Result<Bytes, FetchError>>(4);
    let body = FetchBody::Stream(ReceiverStream::new(upstream_rx).boxed());
    let original = ScriptedFetch::new(Ok(FetchResponse::new(200, sse_headers(), body)));
    let (fetch, mut receiver) = install(original);

    let response = fetch
        .fetch(FetchRequest::get("https://chatgpt.com/backend-api/conversation"))
        .await
        .unwrap();
    let FetchBody::Stream(mut stream) = response.body else {
        panic!("streaming body expected");
    };

    let chunks = chatgpt_stream_chunks();
    upstream_tx.send(Ok(chunks[0].clone())).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), chunks[0]);
    drop(stream);

    // 下一块转发失败后 tee 任务退出并释放上游
    upstream_tx.send(Ok(chunks[1].clone())).await.unwrap();
    upstream_tx.closed().await;

    assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn upstream_body_error_reaches_caller_without_event() {
    let body = FetchBody::Stream(
        futures::stream::iter(vec![
            Ok(chatgpt_stream_chunks()[0].clone()),
            Err(FetchError::Body("truncated".into())),
        ])
        .boxed(),
    );
    let original = ScriptedFetch::new(Ok(FetchResponse::new(200, sse_headers(), body)));
    let (fetch, mut receiver) = install(original);

    let response = fetch
        .fetch(FetchRequest::get("https://chatgpt.com/backend-api/conversation"))
        .await
        .unwrap();
    assert_eq!(response.body.bytes().await, Err(FetchError::Body("truncated".into())));

    tokio::task::yield_now().await;
    assert_eq!(receiver.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn unparseable_request_body_still_emits_with_empty_request_body() {
    let original = ScriptedFetch::new(Ok(FetchResponse::json(200, &json!({"items": []}))));
    let (fetch, mut receiver) = install(original);

    let request = FetchRequest::new(Method::POST, "https://chatgpt.com/backend-api/conversations")
        .with_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .with_body("{truncated");
    fetch.fetch(request).await.unwrap();

    let event = receiver.try_recv().unwrap();
    assert_eq!(event.kind(), ExchangeType::ConversationList);
    assert_eq!(event.detail.data.request_body, None);
    assert_eq!(event.detail.data.response_body, Some(json!({"items": []})));
}

#[tokio::test]
async fn buffered_event_stream_is_still_reconstructed() {
    let body: Vec<u8> = chatgpt_stream_chunks().iter().flat_map(|c| c.to_vec()).collect();
    let original = ScriptedFetch::new(Ok(FetchResponse::new(
        200,
        sse_headers(),
        FetchBody::Full(Bytes::from(body)),
    )));
    let (fetch, mut receiver) = install(original);

    fetch
        .fetch(FetchRequest::get("https://chatgpt.com/backend-api/conversation"))
        .await
        .unwrap();

    let event = receiver.try_recv().unwrap();
    assert!(event.detail.data.is_streaming);
    assert_eq!(event.detail.data.messages[0].content, "Hello world");
}

#[tokio::test]
async fn chunked_list_without_content_type_is_collected_as_json() {
    let mut headers = HeaderMap::new();
    headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    let body = stream_of(vec![
        Bytes::from_static(b"{\"items\":[{\"id\":"),
        Bytes::from_static(b"\"c1\"}],\"total\":1}"),
    ]);
    let original = ScriptedFetch::new(Ok(FetchResponse::new(200, headers, body)));
    let (fetch, mut receiver) = install(original);

    let response = fetch
        .fetch(FetchRequest::get("https://chatgpt.com/backend-api/conversations?offset=0"))
        .await
        .unwrap();
    assert!(response.is_streaming());
    response.body.bytes().await.unwrap();

    let event = receiver.recv().await.unwrap();
    assert_eq!(event.kind(), ExchangeType::ConversationList);
    assert!(event.detail.data.is_streaming);
    assert_eq!(
        event.detail.data.response_body,
        Some(json!({"items": [{"id": "c1"}], "total": 1}))
    );
    assert!(event.detail.data.messages.is_empty());
}

#[tokio::test]
async fn buffered_chunked_user_info_keeps_its_body() {
    let mut headers = HeaderMap::new();
    headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    let original = ScriptedFetch::new(Ok(FetchResponse::new(
        200,
        headers,
        FetchBody::Full(Bytes::from_static(b"{\"id\":\"user-1\"}")),
    )));
    let (fetch, mut receiver) = install(original);

    fetch
        .fetch(FetchRequest::get("https://chatgpt.com/backend-api/me"))
        .await
        .unwrap();

    let event = receiver.try_recv().unwrap();
    assert_eq!(event.kind(), ExchangeType::UserInfo);
    assert_eq!(event.detail.data.response_body, Some(json!({"id": "user-1"})));
}
