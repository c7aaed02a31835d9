//! 响应体捕获
//!
//! 流式响应体经过一个后台 tee 任务：每个分块原样、按序转交给调用方，
//! 同时喂给捕获端。调用方看到的字节与原始响应完全一致。

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::fetch::{BodyStream, FetchError};
use crate::logging::{LogComponent, LogStage};
use crate::streaming::{StreamingDeltaProcessor, StreamingMessageState};
use crate::utils::decompress_for_capture;
use crate::{ldebug, lwarn};

/// tee 通道容量（分块数）
const TEE_CHANNEL_CAPACITY: usize = 32;

/// 把捕获到的完整响应体解析为 JSON；超限或非 JSON 时返回 `None`
pub(crate) fn parse_captured_json(
    correlation_id: &str,
    encoding: Option<&str>,
    bytes: &[u8],
    max_bytes: usize,
) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    if bytes.len() > max_bytes {
        ldebug!(
            correlation_id,
            LogStage::Response,
            LogComponent::Capture,
            "capture_skipped",
            "响应体超过捕获上限，不解析",
            size = bytes.len(),
            max = max_bytes
        );
        return None;
    }
    let decoded = decompress_for_capture(encoding, bytes, max_bytes);
    match serde_json::from_slice(&decoded) {
        Ok(value) => Some(value),
        Err(e) => {
            lwarn!(
                correlation_id,
                LogStage::Response,
                LogComponent::Capture,
                "invalid_json",
                "响应体不是合法 JSON",
                error = %e
            );
            None
        }
    }
}

/// 非流式响应体的累积器
#[derive(Debug)]
pub(crate) struct JsonCollector {
    buffer: BytesMut,
    encoding: Option<String>,
    max_bytes: usize,
    overflowed: bool,
}

impl JsonCollector {
    pub(crate) fn new(encoding: Option<String>, max_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            encoding,
            max_bytes,
            overflowed: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.overflowed {
            return;
        }
        if self.buffer.len() + chunk.len() > self.max_bytes {
            self.overflowed = true;
            self.buffer.clear();
            return;
        }
        self.buffer.extend_from_slice(chunk);
    }

    fn finish(self, correlation_id: &str) -> Option<Value> {
        if self.overflowed {
            ldebug!(
                correlation_id,
                LogStage::Response,
                LogComponent::Capture,
                "capture_overflow",
                "响应体超过捕获上限，已放弃解析",
                max = self.max_bytes
            );
            return None;
        }
        parse_captured_json(
            correlation_id,
            self.encoding.as_deref(),
            &self.buffer,
            self.max_bytes,
        )
    }
}

/// 捕获端
#[derive(Debug)]
pub(crate) enum CaptureSink {
    /// 完整缓冲后解析为 JSON
    Json(JsonCollector),
    /// 流式增量重建
    Stream(Box<StreamingDeltaProcessor>),
}

/// 捕获结果
#[derive(Debug, Default)]
pub(crate) struct CaptureOutcome {
    pub response_body: Option<Value>,
    pub messages: Vec<StreamingMessageState>,
}

impl CaptureSink {
    fn on_chunk(&mut self, chunk: &[u8]) {
        match self {
            Self::Json(collector) => collector.push(chunk),
            Self::Stream(processor) => {
                processor.feed(chunk);
            }
        }
    }

    fn on_idle(&mut self) {
        if let Self::Stream(processor) = self {
            processor.abandon();
        }
    }

    /// 流式重建已收到结束标记
    fn is_done(&self) -> bool {
        matches!(self, Self::Stream(processor) if processor.is_done())
    }

    fn finish(self, correlation_id: &str) -> CaptureOutcome {
        match self {
            Self::Json(collector) => CaptureOutcome {
                response_body: collector.finish(correlation_id),
                messages: Vec::new(),
            },
            Self::Stream(mut processor) => {
                processor.finish();
                let stats = processor.stats();
                ldebug!(
                    correlation_id,
                    LogStage::Streaming,
                    LogComponent::Capture,
                    "stream_captured",
                    "流式响应重建完成",
                    frames = stats.frames,
                    applied = stats.applied,
                    malformed = stats.malformed,
                    abandoned = stats.abandoned,
                    skipped = stats.skipped
                );
                CaptureOutcome {
                    response_body: None,
                    messages: processor.take_messages(),
                }
            }
        }
    }
}

/// 已完整缓冲的响应体一次性交给捕获端
pub(crate) fn capture_buffered(correlation_id: &str, mut sink: CaptureSink, bytes: &[u8]) -> CaptureOutcome {
    sink.on_chunk(bytes);
    sink.finish(correlation_id)
}

/// 启动 tee 任务，返回交给调用方的响应体流
///
/// `on_complete` 至多调用一次：流式重建收到结束标记时，或上游正常结束时。
/// 上游出错或调用方提前丢弃响应体时不调用。
pub(crate) fn tee_body<F>(
    correlation_id: String,
    upstream: BodyStream,
    sink: CaptureSink,
    idle_timeout: Duration,
    on_complete: F,
) -> BodyStream
where
    F: FnOnce(CaptureOutcome) + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Bytes, FetchError>>(TEE_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut upstream = upstream;
        let mut sink = Some(sink);
        let mut on_complete = Some(on_complete);
        let mut idle_reported = false;

        loop {
            let next = match tokio::time::timeout(idle_timeout, upstream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    if !idle_reported {
                        idle_reported = true;
                        lwarn!(
                            correlation_id,
                            LogStage::Streaming,
                            LogComponent::Capture,
                            "idle_timeout",
                            "上游空闲超时",
                            timeout_secs = idle_timeout.as_secs()
                        );
                        if let Some(sink) = sink.as_mut() {
                            sink.on_idle();
                        }
                    }
                    continue;
                }
            };
            idle_reported = false;

            match next {
                Some(Ok(chunk)) => {
                    if let Some(active) = sink.as_mut() {
                        active.on_chunk(&chunk);
                        if active.is_done()
                            && let (Some(sink), Some(callback)) = (sink.take(), on_complete.take())
                        {
                            callback(sink.finish(&correlation_id));
                        }
                    }
                    if tx.send(Ok(chunk)).await.is_err() {
                        ldebug!(
                            correlation_id,
                            LogStage::Response,
                            LogComponent::Capture,
                            "caller_dropped",
                            "调用方已丢弃响应体，停止转发"
                        );
                        return;
                    }
                }
                Some(Err(err)) => {
                    lwarn!(
                        correlation_id,
                        LogStage::Response,
                        LogComponent::Capture,
                        "upstream_error",
                        "上游响应体出错，不发送事件",
                        error = %err
                    );
                    let _ = tx.send(Err(err)).await;
                    return;
                }
                None => break,
            }
        }

        if let (Some(sink), Some(callback)) = (sink, on_complete) {
            callback(sink.finish(&correlation_id));
        }
    });

    ReceiverStream::new(rx).boxed()
}
