//! 流式消息状态与归约函数

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::delta::{DeltaOp, MessageStart, PatchOp, StepKind};

/// 标记消息完成的状态值
pub const STATUS_FINISHED: &str = "finished_successfully";
const IS_COMPLETE: &str = "is_complete";

/// JS 语义下的真值判断
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// 消息中的一个分段（思考或回复）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStep {
    /// 分段类型，序列化为 `type`
    #[serde(rename = "type")]
    pub kind: StepKind,
    /// 分段文本
    pub content: String,
    /// 补丁合并进来的元数据，`is_complete` 标记分段结束
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MessageStep {
    /// 创建一个未完成的分段
    #[must_use]
    pub fn new(kind: StepKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            metadata: Map::new(),
        }
    }

    /// 元数据中的 `is_complete` 为真
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.metadata.get(IS_COMPLETE).is_some_and(truthy)
    }

    fn mark_complete(&mut self) {
        self.metadata.insert(IS_COMPLETE.to_string(), Value::Bool(true));
    }
}

/// 正在重建的一条助手消息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingMessageState {
    /// 消息 ID
    pub id: Option<String>,
    /// 所属会话
    pub conversation_id: Option<String>,
    /// 模型标识
    pub model_id: Option<String>,
    /// 作者角色，缺省视为助手
    pub role: Option<String>,
    /// 最近一次补丁写入的状态
    pub status: Option<String>,
    /// 回复文本的简单拼接（不区分分段）
    pub content: String,
    /// 按到达顺序排列的分段
    pub steps: Vec<MessageStep>,
}

impl StreamingMessageState {
    /// 空状态
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前打开的分段：最后一个且尚未完成
    #[must_use]
    pub fn open_step(&self) -> Option<&MessageStep> {
        self.steps.last().filter(|s| !s.is_complete())
    }

    /// 是否已有值得交付的内容
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.id.is_some() || !self.steps.is_empty() || !self.content.is_empty()
    }

    /// 作者是否为助手（未知作者按助手处理）
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        self.role.as_deref().is_none_or(|r| r == "assistant")
    }

    /// 思考部分的拼接文本
    #[must_use]
    pub fn thinking_text(&self) -> String {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::Thinking)
            .map(|s| s.content.as_str())
            .collect()
    }

    /// 归约：按到达顺序应用一个操作
    pub fn apply(&mut self, op: &DeltaOp) {
        match op {
            DeltaOp::Add(start) => self.reset(start),
            DeltaOp::Append { kind, text } => self.append(*kind, text),
            DeltaOp::OpenStep(kind) => self.steps.push(MessageStep::new(*kind, "")),
            DeltaOp::CloseStep => self.complete_open_step(),
            DeltaOp::Patch(items) => {
                for item in items {
                    self.apply_patch(item);
                }
            }
            DeltaOp::Done => {}
        }
    }

    fn reset(&mut self, start: &MessageStart) {
        *self = Self {
            id: start.id.clone(),
            conversation_id: start.conversation_id.clone(),
            model_id: start.model_id.clone(),
            role: start.role.clone(),
            ..Self::default()
        };
        if let Some((kind, text)) = &start.initial {
            self.append(*kind, text);
        }
    }

    fn append(&mut self, kind: StepKind, text: &str) {
        if text.is_empty() {
            return;
        }
        if kind == StepKind::Response {
            self.content.push_str(text);
        }
        match self.steps.last_mut() {
            Some(step) if step.kind == kind && !step.is_complete() => step.content.push_str(text),
            _ => self.steps.push(MessageStep::new(kind, text)),
        }
    }

    fn complete_open_step(&mut self) {
        if let Some(step) = self.steps.last_mut()
            && !step.is_complete()
        {
            step.mark_complete();
        }
    }

    fn apply_patch(&mut self, item: &PatchOp) {
        match item {
            PatchOp::Status(status) => {
                self.status = Some(status.clone());
                if status == STATUS_FINISHED {
                    self.complete_open_step();
                }
            }
            PatchOp::Metadata(map) => {
                if !map.get(IS_COMPLETE).is_some_and(truthy) {
                    return;
                }
                if let Some(step) = self.steps.last_mut() {
                    for (key, value) in map {
                        if key != IS_COMPLETE {
                            step.metadata.insert(key.clone(), value.clone());
                        }
                    }
                    step.mark_complete();
                }
            }
            PatchOp::Append { kind, text } => self.append(*kind, text),
            PatchOp::Ignored => {}
        }
    }
}
