//! 平台路由与端到端会话

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, HeaderValue, header};
use mockall::mock;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use chat_intercept::config::AppConfig;
use chat_intercept::events::{ExchangeType, InterceptEvent, InterceptedExchange};
use chat_intercept::handlers::{
    Collaborators, ConversationDetail, ConversationHandler, ConversationList, MessageHandler,
    MessageType, PlatformManager, ProcessedMessage, SpecificConversationHandler, UserHandler,
};
use chat_intercept::interceptor::{Fetch, FetchBody, FetchError, FetchRequest, FetchResponse};
use chat_intercept::platform::Platform;
use chat_intercept::{InterceptError, InterceptSession};

mock! {
    Users {}
    impl UserHandler for Users {
        fn process_user_info(&self, body: &Value) -> chat_intercept::Result<()>;
    }
}

/// 记录所有投递内容的协作方
#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<ProcessedMessage>>,
    lists: Mutex<Vec<ConversationList>>,
    details: Mutex<Vec<ConversationDetail>>,
    users: Mutex<Vec<Value>>,
}

impl MessageHandler for Recorder {
    fn process_message(&self, message: ProcessedMessage) -> chat_intercept::Result<()> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

impl ConversationHandler for Recorder {
    fn process_conversation_list(&self, list: ConversationList) -> chat_intercept::Result<()> {
        self.lists.lock().unwrap().push(list);
        Ok(())
    }
}

impl SpecificConversationHandler for Recorder {
    fn process_specific_conversation(&self, detail: ConversationDetail) -> chat_intercept::Result<()> {
        self.details.lock().unwrap().push(detail);
        Ok(())
    }
}

impl UserHandler for Recorder {
    fn process_user_info(&self, body: &Value) -> chat_intercept::Result<()> {
        self.users.lock().unwrap().push(body.clone());
        Ok(())
    }
}

fn recording() -> (Arc<Recorder>, Collaborators) {
    let recorder = Arc::new(Recorder::default());
    let collaborators = Collaborators {
        messages: recorder.clone(),
        conversations: recorder.clone(),
        users: recorder.clone(),
        specific_conversations: recorder.clone(),
    };
    (recorder, collaborators)
}

fn event(kind: ExchangeType, platform: Platform, response_body: Option<Value>) -> InterceptEvent {
    InterceptEvent::new(
        kind,
        InterceptedExchange {
            platform,
            response_body,
            ..InterceptedExchange::default()
        },
    )
}

#[test]
fn unsupported_platform_is_a_silent_no_op() {
    let (recorder, collaborators) = recording();
    let manager = PlatformManager::new(&collaborators);
    let list = event(
        ExchangeType::ConversationList,
        Platform::Unknown,
        Some(json!({"items": [{"id": "x"}]})),
    );

    assert!(manager.handle_conversation_list(&list).is_ok());
    assert!(manager.handle_chat_completion(&list).is_ok());
    manager.route(&list);
    assert!(recorder.lists.lock().unwrap().is_empty());
    assert!(recorder.users.lock().unwrap().is_empty());
}

#[test]
fn user_info_goes_to_user_collaborator() {
    let mut users = MockUsers::new();
    users
        .expect_process_user_info()
        .withf(|body| body["email"] == "a@example.com")
        .times(1)
        .returning(|_| Ok(()));
    let (_, collaborators) = recording();
    let collaborators = Collaborators {
        users: Arc::new(users),
        ..collaborators
    };

    let manager = PlatformManager::new(&collaborators);
    manager.route(&event(
        ExchangeType::UserInfo,
        Platform::ChatGpt,
        Some(json!({"email": "a@example.com"})),
    ));
}

#[test]
fn collaborator_failure_is_contained_by_route() {
    let mut users = MockUsers::new();
    users
        .expect_process_user_info()
        .times(1)
        .returning(|_| Err(InterceptError::handler("存储不可用", "claude")));
    let (_, collaborators) = recording();
    let manager = PlatformManager::new(&Collaborators {
        users: Arc::new(users),
        ..collaborators
    });

    manager.route(&event(ExchangeType::UserInfo, Platform::Claude, Some(json!({}))));
}

#[test]
fn claude_conversation_list_and_detail_are_normalized() {
    let (recorder, collaborators) = recording();
    let manager = PlatformManager::new(&collaborators);

    manager.route(&event(
        ExchangeType::ConversationList,
        Platform::Claude,
        Some(json!([
            {"uuid": "c1", "name": "Rust", "created_at": "2025-01-02T03:04:05Z", "updated_at": "2025-01-02T04:00:00Z"},
            {"name": "no id"}
        ])),
    ));
    manager.route(&event(
        ExchangeType::SpecificConversation,
        Platform::Claude,
        Some(json!({
            "uuid": "c1",
            "name": "Rust",
            "chat_messages": [
                {"uuid": "h1", "sender": "human", "text": "hello", "created_at": "2025-01-02T03:04:05Z"},
                {"uuid": "a1", "sender": "assistant", "content": [
                    {"type": "thinking", "thinking": "greet back"},
                    {"type": "text", "text": "hi!"}
                ]}
            ]
        })),
    ));

    let lists = recorder.lists.lock().unwrap();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].conversations.len(), 1);
    assert_eq!(lists[0].conversations[0].id, "c1");
    assert_eq!(lists[0].conversations[0].title.as_deref(), Some("Rust"));

    let details = recorder.details.lock().unwrap();
    let detail = &details[0];
    assert_eq!(detail.id, "c1");
    assert_eq!(detail.messages.len(), 2);
    assert_eq!(detail.messages[0].message_type, MessageType::User);
    assert_eq!(detail.messages[1].message_type, MessageType::Assistant);
    assert_eq!(detail.messages[1].content, "hi!");
    assert_eq!(detail.messages[1].thinking.as_deref(), Some("greet back"));
}

#[test]
fn malformed_list_is_reported_not_panicking() {
    let (recorder, collaborators) = recording();
    let manager = PlatformManager::new(&collaborators);
    let list = event(
        ExchangeType::ConversationList,
        Platform::ChatGpt,
        Some(json!({"unexpected": true})),
    );

    assert!(manager.handle_conversation_list(&list).is_err());
    manager.route(&list);
    assert!(recorder.lists.lock().unwrap().is_empty());
}

/// 返回一个 ChatGPT 流式对话响应
struct ChatGptStream;

#[async_trait]
impl Fetch for ChatGptStream {
    async fn fetch(&self, _request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let frames = [
            json!({"o": "add", "v": {
                "message": {
                    "id": "a1",
                    "author": {"role": "assistant"},
                    "content": {"content_type": "text", "parts": [""]},
                    "metadata": {"model_slug": "gpt-4o"}
                },
                "conversation_id": "conv-9"
            }}),
            json!({"p": "/message/content/parts/0", "o": "append", "v": "Hello"}),
            json!({"v": " world"}),
        ];
        let mut chunks: Vec<Result<Bytes, FetchError>> = frames
            .iter()
            .map(|f| Ok(Bytes::from(format!("data: {f}\n\n"))))
            .collect();
        chunks.push(Ok(Bytes::from_static(b"data: [DONE]\n\n")));

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        Ok(FetchResponse::new(
            200,
            headers,
            FetchBody::Stream(futures::stream::iter(chunks).boxed()),
        ))
    }
}

#[tokio::test]
async fn chat_completion_stream_reaches_message_collaborator() {
    let (recorder, collaborators) = recording();
    let session = Arc::new(InterceptSession::new(AppConfig::default(), &collaborators).unwrap());
    let fetch = session.install(ChatGptStream);

    let running = Arc::clone(&session);
    let handle = tokio::spawn(async move { running.run().await });

    let request = FetchRequest::post_json(
        "https://chatgpt.com/backend-api/conversation",
        &json!({
            "action": "next",
            "conversation_id": "conv-9",
            "model": "gpt-4o",
            "messages": [{
                "id": "u1",
                "author": {"role": "user"},
                "content": {"content_type": "text", "parts": ["Say hello"]}
            }]
        }),
    );
    let response = fetch.fetch(request).await.unwrap();
    response.body.bytes().await.unwrap();

    session.shutdown();
    handle.await.unwrap().unwrap();

    let messages = recorder.messages.lock().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].message_type, MessageType::User);
    assert_eq!(messages[0].message_id, "u1");
    assert_eq!(messages[0].content, "Say hello");
    assert_eq!(messages[1].message_type, MessageType::Assistant);
    assert_eq!(messages[1].message_id, "a1");
    assert_eq!(messages[1].content, "Hello world");
    assert_eq!(messages[1].conversation_id.as_deref(), Some("conv-9"));
    assert_eq!(messages[1].model.as_deref(), Some("gpt-4o"));
}

#[tokio::test]
async fn listeners_see_events_alongside_the_manager() {
    let (_, collaborators) = recording();
    let session = Arc::new(InterceptSession::new(AppConfig::default(), &collaborators).unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.monitor().add_listener(
        chat_intercept::monitor::ListenerFilter::EventType(ExchangeType::ChatCompletion),
        Arc::new(move |event: &InterceptEvent| {
            sink.lock().unwrap().push(event.detail.data.messages.len());
        }),
    );
    let fetch = session.install(ChatGptStream);

    let running = Arc::clone(&session);
    let handle = tokio::spawn(async move { running.run().await });
    let response = fetch
        .fetch(FetchRequest::get("https://chatgpt.com/backend-api/conversation"))
        .await
        .unwrap();
    response.body.bytes().await.unwrap();
    session.shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1]);
    assert!(session.monitor().is_interceptor_ready());
}
