//! SSE 帧解码器（`tokio_util::codec::Decoder`）
//!
//! 逐行消费缓冲区，遇到空行时产出一帧。`data:` 行原样累积，
//! JSON 解析留给调用方，这样单帧 JSON 损坏不会影响同一缓冲区里的后续帧。

use bytes::BytesMut;
use serde_json::Value;
use std::io;
use tokio_util::codec::Decoder;

/// 流结束标记
pub const DONE_SENTINEL: &str = "[DONE]";

/// 一个完整的 SSE 帧
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStream {
    /// `event:` 行
    pub event: Option<String>,
    /// `id:` 行
    pub id: Option<String>,
    /// 多行 `data:` 以换行连接
    pub data: String,
    /// `retry:` 行（毫秒）
    pub retry: Option<u64>,
}

/// 帧数据的解析结果
#[derive(Debug)]
pub enum EventPayload {
    /// `data: [DONE]`
    Done,
    /// 没有 data 行（仅 event/id/retry）
    Empty,
    /// 合法 JSON
    Json(Value),
    /// 无法解析的数据
    Malformed(serde_json::Error),
}

impl EventStream {
    /// 解析 data 字段
    #[must_use]
    pub fn payload(&self) -> EventPayload {
        let payload = self.data.trim();
        if payload.is_empty() {
            EventPayload::Empty
        } else if payload == DONE_SENTINEL {
            EventPayload::Done
        } else {
            match serde_json::from_str::<Value>(payload) {
                Ok(v) => EventPayload::Json(v),
                Err(e) => EventPayload::Malformed(e),
            }
        }
    }
}

/// SSE 帧解码器，按行累积直到空行
#[derive(Debug, Clone, Default)]
pub struct EventStreamData {
    current: EventStream,
    has_any: bool,
    has_data: bool,
}

impl EventStreamData {
    /// 空解码器
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self) -> Option<EventStream> {
        if !self.has_any {
            return None;
        }
        self.has_any = false;
        self.has_data = false;
        Some(std::mem::take(&mut self.current))
    }

    fn process_line(&mut self, line: &str) -> Option<EventStream> {
        if line.is_empty() {
            return self.emit();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let f = &line[..idx];
                let v = &line[idx + 1..];
                (f, v.strip_prefix(' ').unwrap_or(v))
            }
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_data = true;
                self.has_any = true;
            }
            "event" => {
                self.current.event = Some(value.to_string());
                self.has_any = true;
            }
            "id" => {
                self.current.id = Some(value.to_string());
                self.has_any = true;
            }
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.current.retry = Some(ms);
                }
                self.has_any = true;
            }
            _ => {}
        }
        None
    }

    fn take_one_line(src: &mut BytesMut) -> io::Result<Option<String>> {
        if let Some(pos) = src.iter().position(|b| *b == b'\n') {
            let mut line_bytes = src.split_to(pos + 1);
            line_bytes.truncate(line_bytes.len() - 1);
            if line_bytes.ends_with(b"\r") {
                line_bytes.truncate(line_bytes.len() - 1);
            }
            let line = String::from_utf8(line_bytes.to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Some(line))
        } else {
            Ok(None)
        }
    }
}

impl Decoder for EventStreamData {
    type Item = EventStream;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        while let Some(line) = Self::take_one_line(src)? {
            if let Some(ev) = self.process_line(&line) {
                return Ok(Some(ev));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        if let Some(ev) = self.decode(src)? {
            return Ok(Some(ev));
        }
        if !src.is_empty() {
            let last = String::from_utf8(src.split_to(src.len()).to_vec())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let last = last.trim_end_matches(['\r', '\n']);
            if let Some(ev) = self.process_line(last) {
                return Ok(Some(ev));
            }
        }
        Ok(self.emit())
    }
}
