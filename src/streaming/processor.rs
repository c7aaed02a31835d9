//! 流式增量处理器
//!
//! 每个流式响应使用一个独立实例：多个并发流共用一个处理器会互相污染状态。

use bytes::BytesMut;
use tokio_util::codec::Decoder as _;

use super::delta::{DeltaOp, DeltaParser, StreamDialect};
use super::state::StreamingMessageState;
use crate::logging::{LogComponent, LogStage};
use crate::utils::event_stream::{EventPayload, EventStream, EventStreamData};
use crate::{ldebug, lwarn};

/// 处理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// 解码出的 SSE 帧数（含 `[DONE]` 与坏帧）
    pub frames: usize,
    /// 已应用到状态上的操作数
    pub applied: usize,
    /// JSON 或 UTF-8 解析失败的帧数
    pub malformed: usize,
    /// 空闲超时放弃的次数
    pub abandoned: usize,
    /// 放弃后、下一个 `add` 之前被忽略的操作数
    pub skipped: usize,
}

/// SSE 增量流 → 完整消息
#[derive(Debug)]
pub struct StreamingDeltaProcessor {
    correlation_id: String,
    parser: DeltaParser,
    decoder: EventStreamData,
    buffer: BytesMut,
    state: StreamingMessageState,
    finished: Vec<StreamingMessageState>,
    done: bool,
    /// 放弃后等待下一个 `add`；期间的增量属于已丢弃的消息
    orphaned: bool,
    stats: ProcessorStats,
}

impl StreamingDeltaProcessor {
    /// 按方言创建处理器
    #[must_use]
    pub fn new(dialect: StreamDialect) -> Self {
        Self {
            correlation_id: "stream".to_string(),
            parser: DeltaParser::new(dialect),
            decoder: EventStreamData::new(),
            buffer: BytesMut::new(),
            state: StreamingMessageState::new(),
            finished: Vec::new(),
            done: false,
            orphaned: false,
            stats: ProcessorStats::default(),
        }
    }

    /// 会话 ID 提示，见 [`DeltaParser::with_conversation_hint`]
    #[must_use]
    pub fn with_conversation_hint(mut self, conversation_id: Option<String>) -> Self {
        self.parser = self.parser.with_conversation_hint(conversation_id);
        self
    }

    /// 日志关联 ID（通常是交换 ID）
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// 喂入一段原始字节，返回本次应用的操作数
    ///
    /// 收到 `[DONE]` 之后的输入全部忽略。
    pub fn feed(&mut self, chunk: &[u8]) -> usize {
        if self.done {
            return 0;
        }
        self.buffer.extend_from_slice(chunk);

        let mut applied = 0;
        while !self.done {
            match self.decoder.decode(&mut self.buffer) {
                Ok(Some(frame)) => applied += self.handle_frame(&frame),
                Ok(None) => break,
                Err(e) => {
                    // 非 UTF-8 行已从缓冲区移除，继续处理后续帧
                    self.stats.malformed += 1;
                    lwarn!(
                        self.correlation_id,
                        LogStage::Streaming,
                        LogComponent::StreamProcessor,
                        "invalid_line",
                        "SSE 行不是合法 UTF-8，已跳过",
                        error = %e
                    );
                }
            }
        }
        if self.done {
            self.buffer.clear();
        }
        applied
    }

    /// 流结束：冲刷缓冲区中没有以空行结尾的最后一帧
    pub fn finish(&mut self) -> usize {
        let mut applied = 0;
        while !self.done {
            match self.decoder.decode_eof(&mut self.buffer) {
                Ok(Some(frame)) => applied += self.handle_frame(&frame),
                Ok(None) => break,
                Err(e) => {
                    self.stats.malformed += 1;
                    lwarn!(
                        self.correlation_id,
                        LogStage::Streaming,
                        LogComponent::StreamProcessor,
                        "invalid_tail",
                        "流尾部数据无法解码",
                        error = %e
                    );
                    break;
                }
            }
        }
        self.buffer.clear();
        applied
    }

    fn handle_frame(&mut self, frame: &EventStream) -> usize {
        self.stats.frames += 1;
        match frame.payload() {
            EventPayload::Done => {
                self.done = true;
                ldebug!(
                    self.correlation_id,
                    LogStage::Streaming,
                    LogComponent::StreamProcessor,
                    "stream_done",
                    "收到 [DONE]，停止处理",
                    frames = self.stats.frames
                );
                0
            }
            EventPayload::Empty => 0,
            EventPayload::Malformed(e) => {
                self.stats.malformed += 1;
                lwarn!(
                    self.correlation_id,
                    LogStage::Streaming,
                    LogComponent::StreamProcessor,
                    "malformed_frame",
                    "帧 JSON 解析失败，已跳过",
                    error = %e
                );
                0
            }
            EventPayload::Json(value) => {
                let before = self.stats.applied;
                for op in &self.parser.parse(frame.event.as_deref(), &value) {
                    self.apply(op);
                }
                self.stats.applied - before
            }
        }
    }

    /// 应用一个已解析的操作
    pub fn apply(&mut self, op: &DeltaOp) {
        if self.done {
            return;
        }
        match op {
            DeltaOp::Add(_) => {
                self.orphaned = false;
                let previous = std::mem::take(&mut self.state);
                if previous.has_content() && previous.is_assistant() {
                    self.finished.push(previous);
                }
            }
            DeltaOp::Done => self.done = true,
            _ if self.orphaned => {
                self.stats.skipped += 1;
                return;
            }
            _ => {}
        }
        self.state.apply(op);
        self.stats.applied += 1;
    }

    /// 空闲超时：丢弃当前正在重建的消息
    pub fn abandon(&mut self) {
        if self.state.has_content() {
            lwarn!(
                self.correlation_id,
                LogStage::Streaming,
                LogComponent::StreamProcessor,
                "message_abandoned",
                "流空闲超时，放弃当前消息",
                message_id = ?self.state.id
            );
        }
        self.state = StreamingMessageState::new();
        self.orphaned = true;
        self.stats.abandoned += 1;
    }

    /// 是否已收到结束标记
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// 当前正在重建的消息
    #[must_use]
    pub const fn state(&self) -> &StreamingMessageState {
        &self.state
    }

    /// 处理统计
    #[must_use]
    pub const fn stats(&self) -> ProcessorStats {
        self.stats
    }

    /// 线格式方言
    #[must_use]
    pub const fn dialect(&self) -> StreamDialect {
        self.parser.dialect()
    }

    /// 取出所有已重建的助手消息（包括当前消息）
    pub fn take_messages(&mut self) -> Vec<StreamingMessageState> {
        let mut messages = std::mem::take(&mut self.finished);
        let current = std::mem::take(&mut self.state);
        if current.has_content() && current.is_assistant() {
            messages.push(current);
        }
        messages
    }
}
