//! 增量操作（delta）的类型化表示与各平台帧解析
//!
//! 原始帧在边界处只解析一次，之后统一交给 `StreamingMessageState::apply`。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::platform::Platform;

/// 消息分段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// 推理过程
    Thinking,
    /// 最终回复
    Response,
}

/// `add` 操作携带的新消息信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageStart {
    /// 消息 ID
    pub id: Option<String>,
    /// 所属会话
    pub conversation_id: Option<String>,
    /// 模型标识（ChatGPT 的 `model_slug`，Claude 的 `model`）
    pub model_id: Option<String>,
    /// 作者角色
    pub role: Option<String>,
    /// add 帧里已经带上的正文
    pub initial: Option<(StepKind, String)>,
}

/// patch 数组中的单个元素
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// `/message/status`
    Status(String),
    /// `/message/metadata`
    Metadata(Map<String, Value>),
    /// patch 中夹带的正文追加
    Append {
        /// 目标分段
        kind: StepKind,
        /// 追加的文本
        text: String,
    },
    /// 未识别的路径
    Ignored,
}

/// 一次增量操作
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaOp {
    /// 开始一条新消息
    Add(MessageStart),
    /// 追加正文
    Append {
        /// 目标分段
        kind: StepKind,
        /// 追加的文本
        text: String,
    },
    /// 显式打开一个分段（Claude 的 `content_block_start`）
    OpenStep(StepKind),
    /// 关闭当前分段
    CloseStep,
    /// 一组补丁
    Patch(Vec<PatchOp>),
    /// 流结束标记
    Done,
}

/// 流的线格式方言
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDialect {
    /// ChatGPT v1 delta encoding（`o`/`p`/`v`）
    ChatGpt,
    /// Claude 事件流（`message_start` / `content_block_*`）
    Claude,
}

impl StreamDialect {
    /// 平台对应的方言；未知平台没有
    #[must_use]
    pub const fn for_platform(platform: Platform) -> Option<Self> {
        match platform {
            Platform::ChatGpt => Some(Self::ChatGpt),
            Platform::Claude => Some(Self::Claude),
            Platform::Unknown => None,
        }
    }
}

const CONTENT_PATH_PREFIX: &str = "/message/content";
const STATUS_PATH: &str = "/message/status";
const METADATA_PATH: &str = "/message/metadata";

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn content_kind(path: &str) -> Option<StepKind> {
    if !path.starts_with(CONTENT_PATH_PREFIX) {
        return None;
    }
    if path.contains("/thoughts") {
        Some(StepKind::Thinking)
    } else {
        Some(StepKind::Response)
    }
}

/// 有状态的帧解析器（ChatGPT 的简写帧需要记住上一次追加路径）
#[derive(Debug, Clone)]
pub struct DeltaParser {
    dialect: StreamDialect,
    conversation_hint: Option<String>,
    last_append_path: Option<String>,
}

impl DeltaParser {
    /// 创建解析器
    #[must_use]
    pub const fn new(dialect: StreamDialect) -> Self {
        Self {
            dialect,
            conversation_hint: None,
            last_append_path: None,
        }
    }

    /// Claude 的流里不带会话 ID，需要从 URL 中取得
    #[must_use]
    pub fn with_conversation_hint(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_hint = conversation_id;
        self
    }

    /// 当前方言
    #[must_use]
    pub const fn dialect(&self) -> StreamDialect {
        self.dialect
    }

    /// 把一帧 JSON 解析为零个或多个操作
    pub fn parse(&mut self, event: Option<&str>, value: &Value) -> Vec<DeltaOp> {
        match self.dialect {
            StreamDialect::ChatGpt => self.parse_chatgpt(value).into_iter().collect(),
            StreamDialect::Claude => self.parse_claude(event, value),
        }
    }

    fn parse_chatgpt(&mut self, frame: &Value) -> Option<DeltaOp> {
        let obj = frame.as_object()?;
        let v = obj.get("v");

        match obj.get("o").and_then(Value::as_str) {
            Some("add") => v.and_then(Self::chatgpt_add),
            Some("append") => {
                let path = obj.get("p").and_then(Value::as_str)?;
                let text = v?.as_str()?;
                let kind = content_kind(path)?;
                self.last_append_path = Some(path.to_string());
                Some(DeltaOp::Append {
                    kind,
                    text: text.to_string(),
                })
            }
            Some("patch") => Some(DeltaOp::Patch(self.chatgpt_patch(v?.as_array()?))),
            Some("replace") => {
                let path = obj.get("p").and_then(Value::as_str)?;
                let element = self.chatgpt_patch_element(path, "replace", v?);
                Some(DeltaOp::Patch(vec![element]))
            }
            Some(_) => None,
            None => match v? {
                add @ Value::Object(_) => Self::chatgpt_add(add),
                // 简写帧：沿用上一次的追加路径
                Value::String(text) => {
                    let path = obj
                        .get("p")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or_else(|| self.last_append_path.clone())?;
                    let kind = content_kind(&path)?;
                    self.last_append_path = Some(path);
                    Some(DeltaOp::Append {
                        kind,
                        text: text.clone(),
                    })
                }
                Value::Array(items) => Some(DeltaOp::Patch(self.chatgpt_patch(items))),
                _ => None,
            },
        }
    }

    fn chatgpt_add(v: &Value) -> Option<DeltaOp> {
        let message = v.get("message")?;
        let content = message.get("content");
        let content_type = content
            .and_then(|c| c.get("content_type"))
            .and_then(Value::as_str);
        let initial_kind = if content_type == Some("thoughts") {
            StepKind::Thinking
        } else {
            StepKind::Response
        };
        let initial = content
            .and_then(|c| c.get("parts"))
            .and_then(|parts| parts.get(0))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(|s| (initial_kind, s.to_string()));

        Some(DeltaOp::Add(MessageStart {
            id: str_field(message, "id"),
            conversation_id: str_field(v, "conversation_id"),
            model_id: message
                .get("metadata")
                .and_then(|m| m.get("model_slug"))
                .and_then(Value::as_str)
                .map(str::to_string),
            role: message
                .get("author")
                .and_then(|a| a.get("role"))
                .and_then(Value::as_str)
                .map(str::to_string),
            initial,
        }))
    }

    fn chatgpt_patch(&mut self, items: &[Value]) -> Vec<PatchOp> {
        items
            .iter()
            .map(|item| {
                let path = item.get("p").and_then(Value::as_str).unwrap_or_default();
                let op = item.get("o").and_then(Value::as_str).unwrap_or_default();
                item.get("v")
                    .map_or(PatchOp::Ignored, |v| self.chatgpt_patch_element(path, op, v))
            })
            .collect()
    }

    fn chatgpt_patch_element(&mut self, path: &str, op: &str, v: &Value) -> PatchOp {
        if path == STATUS_PATH {
            return v
                .as_str()
                .map_or(PatchOp::Ignored, |s| PatchOp::Status(s.to_string()));
        }
        if path == METADATA_PATH {
            return v
                .as_object()
                .map_or(PatchOp::Ignored, |m| PatchOp::Metadata(m.clone()));
        }
        if op == "append"
            && let (Some(kind), Some(text)) = (content_kind(path), v.as_str())
        {
            self.last_append_path = Some(path.to_string());
            return PatchOp::Append {
                kind,
                text: text.to_string(),
            };
        }
        PatchOp::Ignored
    }

    fn parse_claude(&self, event: Option<&str>, frame: &Value) -> Vec<DeltaOp> {
        let kind = frame
            .get("type")
            .and_then(Value::as_str)
            .or(event)
            .unwrap_or_default();

        match kind {
            "message_start" => {
                let message = frame.get("message").unwrap_or(&Value::Null);
                vec![DeltaOp::Add(MessageStart {
                    id: str_field(message, "id").or_else(|| str_field(message, "uuid")),
                    conversation_id: self.conversation_hint.clone(),
                    model_id: str_field(message, "model"),
                    role: Some(str_field(message, "role").unwrap_or_else(|| "assistant".into())),
                    initial: None,
                })]
            }
            "content_block_start" => {
                let block = frame.get("content_block").unwrap_or(&Value::Null);
                let (step, text_key) = match block.get("type").and_then(Value::as_str) {
                    Some("thinking") => (StepKind::Thinking, "thinking"),
                    Some("text") => (StepKind::Response, "text"),
                    _ => return Vec::new(),
                };
                let mut ops = vec![DeltaOp::OpenStep(step)];
                if let Some(text) = block.get(text_key).and_then(Value::as_str)
                    && !text.is_empty()
                {
                    ops.push(DeltaOp::Append {
                        kind: step,
                        text: text.to_string(),
                    });
                }
                ops
            }
            "content_block_delta" => {
                let delta = frame.get("delta").unwrap_or(&Value::Null);
                let (step, text) = match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => (StepKind::Response, delta.get("text")),
                    Some("thinking_delta") => (StepKind::Thinking, delta.get("thinking")),
                    _ => return Vec::new(),
                };
                text.and_then(Value::as_str)
                    .map(|t| DeltaOp::Append {
                        kind: step,
                        text: t.to_string(),
                    })
                    .into_iter()
                    .collect()
            }
            "content_block_stop" => vec![DeltaOp::CloseStep],
            "message_delta" => frame
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(Value::as_str)
                .map(|reason| DeltaOp::Patch(vec![PatchOp::Status(reason.to_string())]))
                .into_iter()
                .collect(),
            "message_stop" => vec![DeltaOp::Done],
            // 旧版 completion 事件：整段文本增量
            "completion" => {
                let mut ops = Vec::new();
                if let Some(text) = frame.get("completion").and_then(Value::as_str) {
                    ops.push(DeltaOp::Append {
                        kind: StepKind::Response,
                        text: text.to_string(),
                    });
                }
                if let Some(reason) = frame.get("stop_reason").and_then(Value::as_str) {
                    ops.push(DeltaOp::Patch(vec![PatchOp::Status(reason.to_string())]));
                }
                ops
            }
            _ => Vec::new(),
        }
    }
}
